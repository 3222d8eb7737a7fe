//! Grounded claim analysis from an ONNX causal language model

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

use super::model_hub::{download_model, load_session, ModelSource};
use crate::server::models::clause::ClauseMatch;

pub const NO_CLAUSES_ANALYSIS: &str = "No relevant policy clauses were found to analyze this claim.";

const ANALYSIS_MARKER: &str = "ANALYSIS:";
const PAST_KEY_VALUES_PREFIX: &str = "past_key_values.";

/// Produces an analysis of a claim against retrieved clauses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn generate_analysis(&self, query: &str, clauses: &[ClauseMatch]) -> Result<String>;
}

/// Prompt asking the model to judge coverage and cite clause ids
pub fn build_prompt(query: &str, clauses: &[ClauseMatch]) -> String {
  let context = clauses
    .iter()
    .map(|c| format!("- [{}] {}", c.clause.clause_id, c.clause.clause_text))
    .collect::<Vec<_>>()
    .join("\n");

  format!(
    "Instruct: You are an expert Insurance Policy Analyst. Based on the following policy clauses, \
     analyze the user's claim description. State if it is likely covered and cite the clause ID.\n\n\
     POLICY CLAUSES:\n{context}\n\n\
     USER CLAIM: {query}\n\n\
     {ANALYSIS_MARKER}"
  )
}

/// Keep only the text after the last analysis marker, trimmed
pub fn extract_analysis(generated: &str) -> String {
  match generated.rfind(ANALYSIS_MARKER) {
    Some(index) => generated[index + ANALYSIS_MARKER.len()..].trim().to_string(),
    None => generated.trim().to_string(),
  }
}

/// Logits of the final position of a `[1, seq, vocab]` output
pub fn last_token_logits<'a>(shape: &[i64], data: &'a [f32]) -> Result<&'a [f32]> {
  if shape.len() != 3 || shape[1] < 1 || shape[2] < 1 {
    return Err(anyhow!("Unexpected logits shape {:?}", shape));
  }
  let sequence = shape[1] as usize;
  let vocab = shape[2] as usize;
  let start = (sequence - 1) * vocab;

  data
    .get(start..start + vocab)
    .ok_or_else(|| anyhow!("Logits hold {} values, shape {:?} needs {}", data.len(), shape, sequence * vocab))
}

/// Pick the next token id. A temperature of zero selects the most likely token.
pub fn sample_next_token<R: Rng + ?Sized>(logits: &[f32], temperature: f32, rng: &mut R) -> Result<u32> {
  let (best, max_logit) = logits
    .iter()
    .copied()
    .enumerate()
    .filter(|(_, logit)| logit.is_finite())
    .max_by(|a, b| a.1.total_cmp(&b.1))
    .ok_or_else(|| anyhow!("No finite logits to sample from"))?;

  if temperature <= 0.0 {
    return Ok(best as u32);
  }

  let weights: Vec<f64> = logits
    .iter()
    .map(|&logit| if logit.is_finite() { (((logit - max_logit) / temperature) as f64).exp() } else { 0.0 })
    .collect();
  let total: f64 = weights.iter().sum();
  if !total.is_finite() || total <= 0.0 {
    return Ok(best as u32);
  }

  let mut remaining = rng.random::<f64>() * total;
  for (index, weight) in weights.iter().enumerate() {
    if remaining < *weight {
      return Ok(index as u32);
    }
    remaining -= weight;
  }

  Ok(best as u32)
}

/// One or several token ids, as written in model config files
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenIds {
  Single(u32),
  Many(Vec<u32>),
}

impl TokenIds {
  fn ids(&self) -> Vec<u32> {
    match self {
      Self::Single(id) => vec![*id],
      Self::Many(ids) => ids.clone(),
    }
  }
}

/// Decoder geometry from `config.json`
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
  num_hidden_layers: usize,
  num_attention_heads: usize,
  #[serde(default)]
  num_key_value_heads: Option<usize>,
  hidden_size: usize,
  #[serde(default)]
  head_dim: Option<usize>,
  #[serde(default)]
  eos_token_id: Option<TokenIds>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerationConfig {
  #[serde(default)]
  eos_token_id: Option<TokenIds>,
}

impl DecoderConfig {
  pub fn layers(&self) -> usize {
    self.num_hidden_layers
  }

  pub fn key_value_heads(&self) -> usize {
    self.num_key_value_heads.unwrap_or(self.num_attention_heads)
  }

  pub fn head_dim(&self) -> usize {
    self.head_dim.unwrap_or(self.hidden_size / self.num_attention_heads.max(1))
  }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
  let contents =
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// End-of-sequence ids declared by either config file
fn eos_token_ids(config: &DecoderConfig, generation: &GenerationConfig) -> HashSet<u32> {
  config.eos_token_id.iter().chain(generation.eos_token_id.iter()).flat_map(TokenIds::ids).collect()
}

/// Per-layer key/value tensors carried between decoding steps
type KeyValueCache = Vec<(Array4<f32>, Array4<f32>)>;

/// A loaded decoder session, its tokenizer and geometry
pub struct CausalLanguageModel {
  session: Session,
  tokenizer: Tokenizer,
  config: DecoderConfig,
  eos_ids: HashSet<u32>,
  input_names: Vec<String>,
}

#[cfg(not(tarpaulin_include))]
impl CausalLanguageModel {
  /// Download (or reuse cached) model files and build the session
  pub async fn load(source: &ModelSource) -> Result<Self> {
    let files = download_model(source).await?;
    let device = source.device;

    let config_path = files
      .config_path
      .clone()
      .ok_or_else(|| anyhow!("Model {} has no config.json", source.repo_id))?;

    tokio::task::spawn_blocking(move || {
      let config: DecoderConfig = read_json(&config_path)?;
      let generation = match &files.generation_config_path {
        Some(path) => read_json(path)?,
        None => GenerationConfig::default(),
      };
      let tokenizer = Tokenizer::from_file(&files.tokenizer_path)
        .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
      let session = load_session(&files.model_path, device)?;
      let input_names = session.inputs.iter().map(|input| input.name.to_string()).collect();

      let eos_ids = eos_token_ids(&config, &generation);
      if eos_ids.is_empty() {
        tracing::warn!("Language model declares no end-of-sequence token; output stops at the token limit");
      }

      Ok(Self { session, tokenizer, config, eos_ids, input_names })
    })
    .await
    .map_err(|e| anyhow!("Language model loader panicked: {}", e))?
  }

  fn uses_cache(&self) -> bool {
    self.input_names.iter().any(|name| name.starts_with(PAST_KEY_VALUES_PREFIX))
  }

  fn expects(&self, name: &str) -> bool {
    self.input_names.iter().any(|n| n == name)
  }

  /// Continue `prompt` by at most `max_new_tokens`, returning only the new text
  pub fn generate<R: Rng + ?Sized>(
    &mut self,
    prompt: &str,
    max_new_tokens: usize,
    temperature: f32,
    rng: &mut R,
  ) -> Result<String> {
    let encoding = self.tokenizer.encode(prompt, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let mut tokens: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    if tokens.is_empty() {
      return Err(anyhow!("Prompt produced no tokens"));
    }

    let use_cache = self.uses_cache();
    let layers = self.config.layers();
    let mut cache: Option<KeyValueCache> = None;
    let mut generated: Vec<u32> = Vec::new();

    for _ in 0..max_new_tokens {
      let inputs = if use_cache { self.cached_inputs(&tokens, cache.as_ref())? } else { self.full_inputs(&tokens)? };

      let outputs = self.session.run(inputs)?;
      let (shape, data) = outputs
        .get("logits")
        .ok_or_else(|| anyhow!("Model produced no 'logits' output"))?
        .try_extract_tensor::<f32>()?;
      let next = sample_next_token(last_token_logits(shape.as_ref(), data)?, temperature, rng)?;

      if use_cache {
        cache = Some(collect_present(&outputs, layers)?);
      }
      drop(outputs);

      if self.eos_ids.contains(&next) {
        break;
      }
      tokens.push(next as i64);
      generated.push(next);
    }

    tracing::debug!(prompt_tokens = encoding.get_ids().len(), new_tokens = generated.len(), "Decoding finished");

    self.tokenizer.decode(&generated, true).map_err(|e| anyhow!("Failed to decode generated tokens: {}", e))
  }

  fn full_inputs(&self, tokens: &[i64]) -> Result<HashMap<String, Value>> {
    let mut inputs = HashMap::new();
    inputs.insert("input_ids".to_string(), sequence_tensor(tokens.to_vec())?);
    inputs.insert("attention_mask".to_string(), sequence_tensor(vec![1; tokens.len()])?);
    if self.expects("position_ids") {
      inputs.insert("position_ids".to_string(), sequence_tensor((0..tokens.len() as i64).collect())?);
    }
    Ok(inputs)
  }

  /// Feed only the tokens the cache has not seen yet
  fn cached_inputs(&self, tokens: &[i64], cache: Option<&KeyValueCache>) -> Result<HashMap<String, Value>> {
    let past_len = cache.and_then(|layers| layers.first()).map(|(key, _)| key.shape()[2]).unwrap_or(0);
    let total_len = tokens.len();

    let mut inputs = HashMap::new();
    inputs.insert("input_ids".to_string(), sequence_tensor(tokens[past_len..].to_vec())?);
    inputs.insert("attention_mask".to_string(), sequence_tensor(vec![1; total_len])?);
    if self.expects("position_ids") {
      inputs.insert("position_ids".to_string(), sequence_tensor((past_len as i64..total_len as i64).collect())?);
    }

    let heads = self.config.key_value_heads();
    let head_dim = self.config.head_dim();
    for layer in 0..self.config.layers() {
      let (key, value) = match cache.and_then(|layers| layers.get(layer)) {
        Some((key, value)) => (key.clone(), value.clone()),
        None => (Array4::zeros((1, heads, 0, head_dim)), Array4::zeros((1, heads, 0, head_dim))),
      };
      inputs.insert(format!("{PAST_KEY_VALUES_PREFIX}{layer}.key"), Value::from_array(key)?.into());
      inputs.insert(format!("{PAST_KEY_VALUES_PREFIX}{layer}.value"), Value::from_array(value)?.into());
    }

    Ok(inputs)
  }
}

fn sequence_tensor(values: Vec<i64>) -> Result<Value> {
  let array = Array2::from_shape_vec((1, values.len()), values)?;
  Ok(Value::from_array(array)?.into())
}

fn owned_tensor(outputs: &ort::session::SessionOutputs<'_>, name: &str) -> Result<Array4<f32>> {
  let (shape, data) = outputs
    .get(name)
    .ok_or_else(|| anyhow!("Model produced no '{}' output", name))?
    .try_extract_tensor::<f32>()?;
  to_array4(shape.as_ref(), data)
}

fn collect_present(outputs: &ort::session::SessionOutputs<'_>, layers: usize) -> Result<KeyValueCache> {
  (0..layers)
    .map(|layer| {
      Ok((
        owned_tensor(outputs, &format!("present.{layer}.key"))?,
        owned_tensor(outputs, &format!("present.{layer}.value"))?,
      ))
    })
    .collect()
}

/// Copy a rank-4 tensor out of session-owned memory
fn to_array4(shape: &[i64], data: &[f32]) -> Result<Array4<f32>> {
  let dims: [usize; 4] = shape
    .iter()
    .map(|&d| d as usize)
    .collect::<Vec<_>>()
    .try_into()
    .map_err(|_| anyhow!("Expected a rank-4 cache tensor, got shape {:?}", shape))?;
  Ok(Array4::from_shape_vec(dims, data.to_vec())?)
}

/// [`TextGenerator`] running a [`CausalLanguageModel`] on the blocking pool
pub struct LocalGenerator {
  model: Arc<Mutex<CausalLanguageModel>>,
  max_new_tokens: usize,
  temperature: f32,
}

#[cfg(not(tarpaulin_include))]
impl LocalGenerator {
  pub async fn load(source: &ModelSource, max_new_tokens: usize, temperature: f32) -> Result<Self> {
    let model = CausalLanguageModel::load(source).await?;
    tracing::info!(
      model = %source.repo_id,
      layers = model.config.layers(),
      kv_cache = model.uses_cache(),
      "Language model loaded"
    );

    Ok(Self { model: Arc::new(Mutex::new(model)), max_new_tokens, temperature })
  }
}

#[cfg(not(tarpaulin_include))]
#[async_trait]
impl TextGenerator for LocalGenerator {
  async fn generate_analysis(&self, query: &str, clauses: &[ClauseMatch]) -> Result<String> {
    if clauses.is_empty() {
      return Ok(NO_CLAUSES_ANALYSIS.to_string());
    }

    let prompt = build_prompt(query, clauses);
    let model = self.model.clone();
    let max_new_tokens = self.max_new_tokens;
    let temperature = self.temperature;

    let generated = tokio::task::spawn_blocking(move || {
      let mut model = model.lock().map_err(|_| anyhow!("Language model lock poisoned"))?;
      model.generate(&prompt, max_new_tokens, temperature, &mut rand::rng())
    })
    .await
    .map_err(|e| anyhow!("Generation task panicked: {}", e))??;

    Ok(extract_analysis(&generated))
  }
}
