//! Prometheus collectors for request latency and pipeline stages

use anyhow::{anyhow, Result};
use prometheus::{
  Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
  TextEncoder,
};
use std::time::Duration;

const HTTP_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const STAGE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0];
const GENERATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Pipeline stage being timed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Embedding,
  VectorSearch,
  Generation,
}

struct StageCollectors {
  operations: IntCounter,
  duration: Histogram,
}

/// All service metrics, registered in a private registry
pub struct Metrics {
  registry: Registry,
  http_requests: IntCounterVec,
  http_duration: HistogramVec,
  active_requests: IntGauge,
  embedding: StageCollectors,
  vector_search: StageCollectors,
  generation: StageCollectors,
}

impl Metrics {
  pub fn new() -> Result<Self> {
    let registry = Registry::new();

    let http_requests = IntCounterVec::new(
      Opts::new("http_requests_total", "Total number of HTTP requests"),
      &["method", "endpoint", "status_code"],
    )?;
    let http_duration = HistogramVec::new(
      HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
        .buckets(HTTP_BUCKETS.to_vec()),
      &["method", "endpoint"],
    )?;
    let active_requests = IntGauge::new("active_requests", "Number of active HTTP requests")?;

    registry.register(Box::new(http_requests.clone()))?;
    registry.register(Box::new(http_duration.clone()))?;
    registry.register(Box::new(active_requests.clone()))?;

    let embedding = stage_collectors(&registry, "embedding", "Embedding", STAGE_BUCKETS)?;
    let vector_search = stage_collectors(&registry, "vector_search", "Vector search", STAGE_BUCKETS)?;
    let generation = stage_collectors(&registry, "generation", "Generation", GENERATION_BUCKETS)?;

    Ok(Self {
      registry,
      http_requests,
      http_duration,
      active_requests,
      embedding,
      vector_search,
      generation,
    })
  }

  /// Mark a request as in flight until the returned guard is dropped
  pub fn track_active(&self) -> ActiveRequestGuard {
    self.active_requests.inc();
    ActiveRequestGuard { gauge: self.active_requests.clone() }
  }

  /// Record a finished HTTP request
  pub fn observe_request(&self, method: &str, endpoint: &str, status_code: u16, elapsed: Duration) {
    let status = status_code.to_string();
    self.http_requests.with_label_values(&[method, endpoint, status.as_str()]).inc();
    self.http_duration.with_label_values(&[method, endpoint]).observe(elapsed.as_secs_f64());
  }

  /// Record one pipeline stage attempt. Only successes are counted as operations.
  pub fn observe_stage(&self, stage: Stage, elapsed: Duration, succeeded: bool) {
    let collectors = match stage {
      Stage::Embedding => &self.embedding,
      Stage::VectorSearch => &self.vector_search,
      Stage::Generation => &self.generation,
    };

    collectors.duration.observe(elapsed.as_secs_f64());
    if succeeded {
      collectors.operations.inc();
    }
  }

  /// Render every collector in the Prometheus text exposition format
  pub fn render(&self) -> Result<String> {
    TextEncoder::new()
      .encode_to_string(&self.registry.gather())
      .map_err(|e| anyhow!("Failed to encode metrics: {}", e))
  }
}

fn stage_collectors(
  registry: &Registry,
  prefix: &str,
  label: &str,
  buckets: &[f64],
) -> Result<StageCollectors> {
  let operations = IntCounter::new(
    format!("{prefix}_operations_total"),
    format!("Total number of {} operations", label.to_lowercase()),
  )?;
  let duration = Histogram::with_opts(
    HistogramOpts::new(
      format!("{prefix}_duration_seconds"),
      format!("{label} operation duration in seconds"),
    )
    .buckets(buckets.to_vec()),
  )?;

  registry.register(Box::new(operations.clone()))?;
  registry.register(Box::new(duration.clone()))?;

  Ok(StageCollectors { operations, duration })
}

/// Decrements the active request gauge on drop
pub struct ActiveRequestGuard {
  gauge: IntGauge,
}

impl Drop for ActiveRequestGuard {
  fn drop(&mut self) {
    self.gauge.dec();
  }
}
