//! Shared application state and background service loading

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::server::services::embeddings::{Embedder, OnnxEmbedder};
use crate::server::services::generation::{LocalGenerator, TextGenerator};
use crate::server::services::lancedb::LanceDbService;
use crate::server::services::retrieval::RetrievalPipeline;
use crate::server::services::vector_database::{check_embedding_dimension, VectorDatabase};

/// Services that become available once loaded. Each is set at most once.
#[derive(Default)]
pub struct ServiceRegistry {
  embedder: OnceCell<Arc<dyn Embedder>>,
  vector_db: OnceCell<Arc<dyn VectorDatabase>>,
  generator: OnceCell<Arc<dyn TextGenerator>>,
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
  pub settings: Arc<Settings>,
  pub metrics: Arc<Metrics>,
  services: Arc<ServiceRegistry>,
}

impl AppState {
  pub fn new(settings: Settings) -> Result<Self> {
    Ok(Self {
      settings: Arc::new(settings),
      metrics: Arc::new(Metrics::new()?),
      services: Arc::new(ServiceRegistry::default()),
    })
  }

  /// Returns false when an embedder was already installed
  pub fn install_embedder(&self, embedder: Arc<dyn Embedder>) -> bool {
    self.services.embedder.set(embedder).is_ok()
  }

  /// Returns false when a vector store was already installed
  pub fn install_vector_db(&self, vector_db: Arc<dyn VectorDatabase>) -> bool {
    self.services.vector_db.set(vector_db).is_ok()
  }

  /// Returns false when a generator was already installed
  pub fn install_generator(&self, generator: Arc<dyn TextGenerator>) -> bool {
    self.services.generator.set(generator).is_ok()
  }

  pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
    self.services.embedder.get().cloned()
  }

  pub fn vector_db(&self) -> Option<Arc<dyn VectorDatabase>> {
    self.services.vector_db.get().cloned()
  }

  pub fn generator(&self) -> Option<Arc<dyn TextGenerator>> {
    self.services.generator.get().cloned()
  }

  /// Searches need the embedder and the vector store; generation is optional
  pub fn is_ready(&self) -> bool {
    self.services.embedder.get().is_some() && self.services.vector_db.get().is_some()
  }

  /// Assemble a pipeline from the services loaded so far
  pub fn pipeline(&self) -> Result<RetrievalPipeline, ServiceError> {
    let embedder = self.embedder().ok_or_else(|| ServiceError::unavailable("embedding model"))?;
    let vector_db = self.vector_db().ok_or_else(|| ServiceError::unavailable("vector store"))?;

    Ok(RetrievalPipeline::new(embedder, vector_db, self.generator(), self.metrics.clone()))
  }
}

/// Connect the vector store and load the models, installing each as it becomes ready.
/// Failures are logged and leave the service unready.
#[cfg(not(tarpaulin_include))]
pub async fn initialize_services(state: AppState) {
  let settings = state.settings.clone();

  let vector_db = async {
    match LanceDbService::new(&settings.store.vector_db_path, &settings.store.collection_name).await {
      Ok(service) => {
        match service.count_clauses().await {
          Ok(0) => {
            tracing::warn!(table = %settings.store.collection_name, "Clause table is empty; run seed_policy_clauses first")
          }
          Ok(count) => tracing::info!(clauses = count, "Vector store ready"),
          Err(e) => tracing::warn!(error = %e, "Could not count stored clauses"),
        }
        state.install_vector_db(Arc::new(service));
      }
      Err(e) => tracing::error!(error = %e, "Failed to open vector store"),
    }
  };

  let embedder = async {
    match OnnxEmbedder::load(&settings.embedding.source()).await {
      Ok(embedder) => {
        state.install_embedder(Arc::new(embedder));
      }
      Err(e) => tracing::error!(model = %settings.embedding.embedding_model, error = %e, "Failed to load embedding model"),
    }
  };

  let generator = async {
    if settings.disable_generation {
      tracing::info!("Generation disabled; analysis requests will be rejected");
      return;
    }
    match LocalGenerator::load(&settings.llm_source(), settings.max_new_tokens, settings.temperature).await {
      Ok(generator) => {
        state.install_generator(Arc::new(generator));
      }
      Err(e) => tracing::error!(model = %settings.llm_model, error = %e, "Failed to load language model"),
    }
  };

  tokio::join!(vector_db, embedder, generator);

  if let (Some(embedder), Some(vector_db)) = (state.embedder(), state.vector_db()) {
    if let Err(e) = check_embedding_dimension(embedder.as_ref(), vector_db.as_ref()).await {
      tracing::error!(error = %e, "Embedding model does not match the stored clauses");
    }
  }
  tracing::info!(
    ready = state.is_ready(),
    generator_loaded = state.generator().is_some(),
    "Service initialization finished"
  );
}
