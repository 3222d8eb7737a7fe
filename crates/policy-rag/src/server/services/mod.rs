pub mod embeddings;
pub mod generation;
pub mod lancedb;
pub mod model_hub;
pub mod retrieval;
pub mod vector_database;
