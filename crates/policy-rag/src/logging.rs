//! Structured logging setup

use anyhow::{anyhow, Result};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingSettings};

/// Library targets that log far more than is useful at info level
const NOISY_TARGETS: &[&str] = &["lance", "lance_datafusion", "lancedb", "datafusion", "ort", "hf_hub"];

/// Build the filter directive string for the given default level.
///
/// `RUST_LOG`, when set, replaces the whole directive.
pub fn filter_directives(default_level: &str) -> String {
  let mut directives = vec![default_level.to_lowercase()];
  directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
  directives.join(",")
}

/// Install the global tracing subscriber
pub fn init(settings: &LoggingSettings) -> Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(filter_directives(settings.effective_log_level())))
    .map_err(|e| anyhow!("Invalid log level '{}': {}", settings.log_level, e))?;

  let registry = tracing_subscriber::registry().with(filter);

  let result = match settings.log_format {
    LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    LogFormat::Json => registry.with(fmt::layer().json().flatten_event(true)).try_init(),
  };

  result.map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
