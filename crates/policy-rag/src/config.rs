//! Service configuration
//!
//! Every setting can be given as a command-line flag or an environment
//! variable. A `.env` file in the working directory is loaded first, so its
//! values behave exactly like exported variables.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::server::services::model_hub::ModelSource;

/// Hardware the ONNX sessions should run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Device {
  Cpu,
  Cuda,
  /// CUDA when `nvidia-smi` reports a GPU, CPU otherwise
  Auto,
}

/// Console log rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
  Pretty,
  Json,
}

/// Embedding model and model download settings, shared by the server and the seeder
#[derive(Debug, Clone, Args)]
pub struct EmbeddingSettings {
  /// Hugging Face repository of the sentence-embedding model
  #[arg(long, env = "EMBEDDING_MODEL", default_value = "sentence-transformers/all-MiniLM-L6-v2")]
  pub embedding_model: String,

  /// ONNX graph inside the embedding repository
  #[arg(long, env = "EMBEDDING_MODEL_FILE", default_value = "onnx/model.onnx")]
  pub embedding_model_file: String,

  #[arg(long, env = "EMBEDDING_DEVICE", value_enum, default_value = "cpu")]
  pub embedding_device: Device,

  /// Cache directory for downloaded model files
  #[arg(long, env = "MODEL_CACHE_DIR")]
  pub model_cache_dir: Option<PathBuf>,
}

impl EmbeddingSettings {
  pub fn source(&self) -> ModelSource {
    ModelSource {
      repo_id: self.embedding_model.clone(),
      model_file: self.embedding_model_file.clone(),
      cache_dir: self.model_cache_dir.clone(),
      device: self.embedding_device,
    }
  }
}

/// Location of the clause store
#[derive(Debug, Clone, Args)]
pub struct StoreSettings {
  /// Directory holding the LanceDB database
  #[arg(long, env = "VECTOR_DB_PATH", default_value = "./.lancedb")]
  pub vector_db_path: PathBuf,

  /// Table storing the policy clauses
  #[arg(long, env = "COLLECTION_NAME", default_value = "policy_clauses")]
  pub collection_name: String,
}

#[derive(Debug, Clone, Args)]
pub struct LoggingSettings {
  /// Debug mode (lowers the default log level to debug)
  #[arg(long, env = "DEBUG")]
  pub debug: bool,

  /// Default log level when RUST_LOG is unset
  #[arg(long, env = "LOG_LEVEL", default_value = "info")]
  pub log_level: String,

  #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
  pub log_format: LogFormat,
}

impl LoggingSettings {
  /// Effective default log level
  pub fn effective_log_level(&self) -> &str {
    if self.debug {
      "debug"
    } else {
      &self.log_level
    }
  }
}

/// Server settings
#[derive(Debug, Clone, Args)]
pub struct Settings {
  /// Server bind address
  #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
  pub bind: SocketAddr,

  /// Display name reported by the root endpoint
  #[arg(long, env = "APP_NAME", default_value = "Policy Intelligence API")]
  pub app_name: String,

  /// Path prefix for versioned API routes
  #[arg(long, env = "API_PREFIX", default_value = "/api/v1")]
  pub api_prefix: String,

  /// Result count used when a search request does not specify one
  #[arg(long, env = "MAX_RESULTS", default_value_t = 10)]
  pub max_results: usize,

  /// Hugging Face repository of the causal language model
  #[arg(long, env = "LLM_MODEL", default_value = "onnx-community/Qwen2.5-0.5B-Instruct")]
  pub llm_model: String,

  /// ONNX graph inside the language model repository
  #[arg(long, env = "LLM_MODEL_FILE", default_value = "onnx/model.onnx")]
  pub llm_model_file: String,

  #[arg(long, env = "LLM_DEVICE", value_enum, default_value = "cpu")]
  pub llm_device: Device,

  /// Upper bound on tokens produced per analysis
  #[arg(long, env = "MAX_NEW_TOKENS", default_value_t = 256)]
  pub max_new_tokens: usize,

  /// Sampling temperature; 0 selects greedy decoding
  #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.7)]
  pub temperature: f32,

  /// Skip loading the language model (RAG requests then return 503)
  #[arg(long, env = "DISABLE_GENERATION")]
  pub disable_generation: bool,

  #[command(flatten)]
  pub embedding: EmbeddingSettings,

  #[command(flatten)]
  pub store: StoreSettings,

  #[command(flatten)]
  pub logging: LoggingSettings,
}

#[derive(Parser)]
struct SettingsOnly {
  #[command(flatten)]
  settings: Settings,
}

impl Settings {
  /// Parse settings from an explicit argument list (the first item is the program name)
  pub fn from_args<I, T>(args: I) -> Result<Self>
  where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
  {
    let parsed = SettingsOnly::try_parse_from(args)?;
    parsed.settings.validate()?;
    Ok(parsed.settings)
  }

  /// Reject combinations clap cannot express on its own
  pub fn validate(&self) -> Result<()> {
    if !(1..=50).contains(&self.max_results) {
      return Err(anyhow!("max_results must be between 1 and 50, got {}", self.max_results));
    }
    if !self.temperature.is_finite() || self.temperature < 0.0 {
      return Err(anyhow!("temperature must be a non-negative number, got {}", self.temperature));
    }
    if self.max_new_tokens == 0 {
      return Err(anyhow!("max_new_tokens must be at least 1"));
    }
    if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
      return Err(anyhow!("api_prefix must start with '/' and not end with one, got '{}'", self.api_prefix));
    }
    Ok(())
  }

  /// Route of the policy search endpoint
  pub fn search_route(&self) -> String {
    format!("{}/policy/search", self.api_prefix)
  }

  pub fn llm_source(&self) -> ModelSource {
    ModelSource {
      repo_id: self.llm_model.clone(),
      model_file: self.llm_model_file.clone(),
      cache_dir: self.embedding.model_cache_dir.clone(),
      device: self.llm_device,
    }
  }
}

/// Load `.env` into the process environment if one is found, returning its path.
/// Runs before logging is installed, so callers log the result themselves.
pub fn load_dotenv() -> Option<PathBuf> {
  dotenvy::dotenv().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn test_defaults_match_documented_values() -> Result<()> {
    let settings = Settings::from_args(["policy_rag_server"])?;

    assert_eq!(settings.bind.port(), 8000);
    assert_eq!(settings.app_name, "Policy Intelligence API");
    assert_eq!(settings.api_prefix, "/api/v1");
    assert_eq!(settings.max_results, 10);
    assert_eq!(settings.embedding.embedding_model, "sentence-transformers/all-MiniLM-L6-v2");
    assert_eq!(settings.embedding.embedding_device, Device::Cpu);
    assert_eq!(settings.max_new_tokens, 256);
    assert!((settings.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(settings.store.collection_name, "policy_clauses");
    assert_eq!(settings.logging.log_format, LogFormat::Pretty);
    assert!(!settings.disable_generation);
    Ok(())
  }

  #[test]
  #[serial]
  fn test_flags_override_defaults() -> Result<()> {
    let settings = Settings::from_args([
      "policy_rag_server",
      "--bind",
      "127.0.0.1:9100",
      "--max-results",
      "25",
      "--embedding-device",
      "auto",
      "--log-format",
      "json",
      "--disable-generation",
    ])?;

    assert_eq!(settings.bind.to_string(), "127.0.0.1:9100");
    assert_eq!(settings.max_results, 25);
    assert_eq!(settings.embedding.embedding_device, Device::Auto);
    assert_eq!(settings.logging.log_format, LogFormat::Json);
    assert!(settings.disable_generation);
    Ok(())
  }

  #[test]
  #[serial]
  fn test_environment_variables_are_read() -> Result<()> {
    std::env::set_var("COLLECTION_NAME", "auto_clauses");
    std::env::set_var("MAX_NEW_TOKENS", "64");
    let settings = Settings::from_args(["policy_rag_server"]);
    std::env::remove_var("COLLECTION_NAME");
    std::env::remove_var("MAX_NEW_TOKENS");

    let settings = settings?;
    assert_eq!(settings.store.collection_name, "auto_clauses");
    assert_eq!(settings.max_new_tokens, 64);
    Ok(())
  }

  #[test]
  #[serial]
  fn test_out_of_range_max_results_rejected() {
    assert!(Settings::from_args(["policy_rag_server", "--max-results", "0"]).is_err());
    assert!(Settings::from_args(["policy_rag_server", "--max-results", "51"]).is_err());
  }

  #[test]
  #[serial]
  fn test_api_prefix_shape_enforced() {
    assert!(Settings::from_args(["policy_rag_server", "--api-prefix", "api"]).is_err());
    assert!(Settings::from_args(["policy_rag_server", "--api-prefix", "/api/"]).is_err());
  }

  #[test]
  #[serial]
  fn test_search_route_and_debug_level() -> Result<()> {
    let settings = Settings::from_args(["policy_rag_server", "--api-prefix", "/v2", "--debug"])?;
    assert_eq!(settings.search_route(), "/v2/policy/search");
    assert_eq!(settings.logging.effective_log_level(), "debug");
    Ok(())
  }

  #[test]
  #[serial]
  fn test_model_sources_share_cache_dir() -> Result<()> {
    let settings = Settings::from_args([
      "policy_rag_server",
      "--model-cache-dir",
      "/tmp/models",
      "--llm-device",
      "cuda",
    ])?;

    let embedding = settings.embedding.source();
    let llm = settings.llm_source();
    assert_eq!(embedding.repo_id, "sentence-transformers/all-MiniLM-L6-v2");
    assert_eq!(llm.repo_id, "onnx-community/Qwen2.5-0.5B-Instruct");
    assert_eq!(llm.device, Device::Cuda);
    assert_eq!(embedding.cache_dir, llm.cache_dir);
    assert_eq!(embedding.cache_dir, Some(PathBuf::from("/tmp/models")));
    Ok(())
  }

  #[test]
  #[serial]
  fn test_load_dotenv_reports_loaded_file() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join(".env"), "POLICY_RAG_DOTENV_CHECK=loaded\n")?;
    let original_dir = std::env::current_dir()?;

    std::env::set_current_dir(dir.path())?;
    let loaded = load_dotenv();
    std::env::set_current_dir(original_dir)?;

    let path = loaded.ok_or_else(|| anyhow!("no .env file reported"))?;
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(".env"));
    assert_eq!(std::env::var("POLICY_RAG_DOTENV_CHECK").as_deref(), Ok("loaded"));
    std::env::remove_var("POLICY_RAG_DOTENV_CHECK");
    Ok(())
  }
}
