//! Model file retrieval from the Hugging Face hub and ONNX session setup

use anyhow::{anyhow, Result};
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch},
  session::Session,
};
use std::path::{Path, PathBuf};

use crate::config::Device;

const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";

/// Where a model lives and how it should run
#[derive(Debug, Clone)]
pub struct ModelSource {
  pub repo_id: String,
  pub model_file: String,
  pub cache_dir: Option<PathBuf>,
  pub device: Device,
}

/// Local paths of a downloaded model
#[derive(Debug, Clone)]
pub struct ModelFiles {
  pub model_path: PathBuf,
  pub tokenizer_path: PathBuf,
  pub config_path: Option<PathBuf>,
  pub generation_config_path: Option<PathBuf>,
}

/// Fetch the ONNX graph, tokenizer and configuration files of a model
pub async fn download_model(source: &ModelSource) -> Result<ModelFiles> {
  let mut builder = ApiBuilder::new().with_progress(false);
  if let Some(cache_dir) = &source.cache_dir {
    builder = builder.with_cache_dir(cache_dir.clone());
  }
  let api = builder.build().map_err(|e| anyhow!("HF API initialization failed: {}", e))?;
  let repo = api.model(source.repo_id.clone());

  tracing::info!(model = %source.repo_id, file = %source.model_file, "Fetching model files");

  let tokenizer_path = repo
    .get(TOKENIZER_FILE)
    .await
    .map_err(|e| anyhow!("Failed to download tokenizer for {}: {}", source.repo_id, e))?;

  let model_path = repo
    .get(&source.model_file)
    .await
    .map_err(|e| anyhow!("Failed to download {} from {}: {}", source.model_file, source.repo_id, e))?;

  ensure_external_data_file(&repo, &source.model_file).await;

  Ok(ModelFiles {
    model_path,
    tokenizer_path,
    config_path: optional_file(&repo, CONFIG_FILE).await,
    generation_config_path: optional_file(&repo, GENERATION_CONFIG_FILE).await,
  })
}

async fn optional_file(repo: &ApiRepo, file: &str) -> Option<PathBuf> {
  match repo.get(file).await {
    Ok(path) => Some(path),
    Err(e) => {
      tracing::debug!(file, error = %e, "Optional model file unavailable");
      None
    }
  }
}

/// Large graphs keep their weights next to the graph in `<file>_data`
async fn ensure_external_data_file(repo: &ApiRepo, model_file: &str) {
  let external_data = format!("{model_file}_data");
  if optional_file(repo, &external_data).await.is_some() {
    tracing::info!(file = %external_data, "Downloaded external weight file");
  }
}

/// Build an ONNX session on the requested device
pub fn load_session(model_path: &Path, device: Device) -> Result<Session> {
  let session = Session::builder()?
    .with_execution_providers(execution_providers(device))?
    .commit_from_file(model_path)
    .map_err(|e| anyhow!("Failed to load ONNX model {}: {}", model_path.display(), e))?;

  Ok(session)
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
  let mut providers = Vec::new();

  match device {
    Device::Cuda => providers.push(CUDAExecutionProvider::default().build().error_on_failure()),
    Device::Auto if is_cuda_available() => providers.push(CUDAExecutionProvider::default().build()),
    Device::Auto | Device::Cpu => {}
  }

  providers.push(CPUExecutionProvider::default().build());
  providers
}

fn is_cuda_available() -> bool {
  std::process::Command::new("nvidia-smi")
    .output()
    .map(|output| output.status.success())
    .unwrap_or(false)
}
