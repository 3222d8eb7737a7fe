pub mod clause;
pub mod sample_data;
