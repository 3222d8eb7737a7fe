//! Sentence embeddings from an ONNX encoder model

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ndarray::Array2;
use ort::{session::Session, value::Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};

use super::model_hub::{download_model, load_session, ModelSource};

/// Position embedding limit of BERT-style encoders
const MAX_SEQUENCE_LENGTH: usize = 512;
const DIMENSION_PROBE: &str = "dimension probe";

/// Maps text to fixed-length vectors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
  /// Unit-length embedding of `text`
  async fn embed(&self, text: &str) -> Result<Vec<f32>>;

  /// Embeddings for several texts, in input order
  async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

  /// Length of every vector this embedder produces
  fn dimension(&self) -> usize;
}

/// Trait for extracting tensor data - allows testing without ONNX complexity
trait EmbeddingOutput {
  fn get_tensor(&self, key: &str) -> Option<&dyn TensorData>;
}

trait TensorData {
  fn extract_f32_data(&self) -> Result<(&[i64], &[f32])>;
}

trait TokenEncoding {
  fn get_ids(&self) -> &[u32];
  fn get_attention_mask(&self) -> &[u32];
  fn get_type_ids(&self) -> &[u32];
}

trait SessionInputs {
  fn input_names(&self) -> Vec<String>;
}

trait TextTokenizer {
  fn encode_text(&self, text: &str) -> Result<Box<dyn TokenizerOutput>>;
}

trait TokenizerOutput: std::fmt::Debug + TokenEncoding {}

#[cfg(not(tarpaulin_include))]
impl<'s> EmbeddingOutput for ort::session::SessionOutputs<'s> {
  fn get_tensor(&self, key: &str) -> Option<&dyn TensorData> {
    self.get(key).map(|v| v as &dyn TensorData)
  }
}

#[cfg(not(tarpaulin_include))]
impl TensorData for ort::value::Value {
  fn extract_f32_data(&self) -> Result<(&[i64], &[f32])> {
    let (shape, data) = self.try_extract_tensor::<f32>()?;
    Ok((shape.as_ref(), data))
  }
}

#[cfg(not(tarpaulin_include))]
impl TokenEncoding for tokenizers::Encoding {
  fn get_ids(&self) -> &[u32] {
    self.get_ids()
  }
  fn get_attention_mask(&self) -> &[u32] {
    self.get_attention_mask()
  }
  fn get_type_ids(&self) -> &[u32] {
    self.get_type_ids()
  }
}

impl TokenizerOutput for tokenizers::Encoding {}

#[cfg(not(tarpaulin_include))]
impl SessionInputs for Session {
  fn input_names(&self) -> Vec<String> {
    self.inputs.iter().map(|input| input.name.to_string()).collect()
  }
}

#[cfg(not(tarpaulin_include))]
impl TextTokenizer for Tokenizer {
  fn encode_text(&self, text: &str) -> Result<Box<dyn TokenizerOutput>> {
    let encoding = self.encode(text, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    Ok(Box::new(encoding))
  }
}

/// A loaded encoder session and its tokenizer
pub struct EmbeddingModel {
  session: Session,
  tokenizer: Tokenizer,
}

#[cfg(not(tarpaulin_include))]
impl EmbeddingModel {
  /// Download (or reuse cached) model files and build the session
  pub async fn load(source: &ModelSource) -> Result<Self> {
    let files = download_model(source).await?;
    let device = source.device;

    tokio::task::spawn_blocking(move || {
      let tokenizer = Self::load_tokenizer(&files.tokenizer_path)?;
      let session = load_session(&files.model_path, device)?;
      Ok(Self { session, tokenizer })
    })
    .await
    .map_err(|e| anyhow!("Embedding model loader panicked: {}", e))?
  }

  fn load_tokenizer(path: &std::path::Path) -> Result<Tokenizer> {
    let mut tokenizer =
      Tokenizer::from_file(path).map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

    tokenizer.with_padding(None);
    tokenizer
      .with_truncation(Some(TruncationParams { max_length: MAX_SEQUENCE_LENGTH, ..Default::default() }))
      .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;

    Ok(tokenizer)
  }

  /// Generate a unit-length embedding for a single text
  pub fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
    let tokens = Self::tokenize(text, &self.tokenizer)?;
    let input = Self::prepare(tokens.as_ref(), &self.session)?;
    let output = self.session.run(input)?;
    let raw_embedding = Self::extract_embedding(&output, tokens.get_attention_mask())?;
    Ok(normalize_embedding(raw_embedding))
  }
}

impl EmbeddingModel {
  fn tokenize(text: &str, tokenizer: &dyn TextTokenizer) -> Result<Box<dyn TokenizerOutput>> {
    let tokens = tokenizer.encode_text(text)?;
    if tokens.get_ids().is_empty() {
      return Err(anyhow!("Text produced no tokens"));
    }
    Ok(tokens)
  }

  fn prepare(tokens: &dyn TokenEncoding, session: &dyn SessionInputs) -> Result<HashMap<String, Value>> {
    let model_input_names = session.input_names();
    let expects = |name: &str| model_input_names.iter().any(|n| n == name);

    let mut input = HashMap::new();
    input.insert("input_ids".to_string(), to_tensor(tokens.get_ids())?);
    input.insert("attention_mask".to_string(), to_tensor(tokens.get_attention_mask())?);

    if expects("token_type_ids") {
      input.insert("token_type_ids".to_string(), to_tensor(tokens.get_type_ids())?);
    }

    if expects("position_ids") {
      let position_ids: Vec<u32> = (0..tokens.get_ids().len() as u32).collect();
      input.insert("position_ids".to_string(), to_tensor(&position_ids)?);
    }

    Ok(input)
  }

  fn extract_embedding(output: &dyn EmbeddingOutput, attention_mask: &[u32]) -> Result<Vec<f32>> {
    let tensor = output
      .get_tensor("last_hidden_state")
      .or_else(|| output.get_tensor("0"))
      .ok_or_else(|| anyhow!("No output found from model - expected 'last_hidden_state' or '0'"))?;

    let (shape, data) = tensor.extract_f32_data()?;
    mean_pool(shape, data, attention_mask)
  }
}

fn to_tensor<T: Copy + Into<i64>>(values: &[T]) -> Result<Value> {
  let ids: Vec<i64> = values.iter().map(|&x| x.into()).collect();
  let array = Array2::from_shape_vec((1, values.len()), ids)?;
  Ok(Value::from_array(array)?.into())
}

/// Mean of the token vectors of a `[1, seq, hidden]` output, counting only
/// attended tokens. An unusable mask falls back to every token.
pub fn mean_pool(shape: &[i64], data: &[f32], attention_mask: &[u32]) -> Result<Vec<f32>> {
  if shape.len() != 3 {
    return Err(anyhow!("Expected a [batch, sequence, hidden] output, got shape {:?}", shape));
  }
  let seq_length = shape[1] as usize;
  let hidden_size = shape[2] as usize;
  if data.len() < seq_length * hidden_size {
    return Err(anyhow!("Output holds {} values, shape {:?} needs {}", data.len(), shape, seq_length * hidden_size));
  }

  let use_mask = attention_mask.len() == seq_length && attention_mask.iter().any(|&m| m != 0);

  let mut embedding = vec![0.0f32; hidden_size];
  let mut counted = 0usize;
  for token_idx in 0..seq_length {
    if use_mask && attention_mask[token_idx] == 0 {
      continue;
    }
    let start = token_idx * hidden_size;
    for (sum, &value) in embedding.iter_mut().zip(&data[start..start + hidden_size]) {
      *sum += value;
    }
    counted += 1;
  }

  if counted > 0 {
    for value in embedding.iter_mut() {
      *value /= counted as f32;
    }
  }

  Ok(embedding)
}

/// Scale to unit length; zero vectors are returned unchanged
pub fn normalize_embedding(mut embedding: Vec<f32>) -> Vec<f32> {
  let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

  if magnitude < f32::EPSILON {
    tracing::warn!("Zero-magnitude embedding detected - returning unchanged");
    return embedding;
  }

  for value in embedding.iter_mut() {
    *value /= magnitude;
  }
  embedding
}

/// [`Embedder`] running an [`EmbeddingModel`] on the blocking pool
pub struct OnnxEmbedder {
  model: Arc<Mutex<EmbeddingModel>>,
  dimension: usize,
}

#[cfg(not(tarpaulin_include))]
impl OnnxEmbedder {
  /// Load the model and detect its output dimension
  pub async fn load(source: &ModelSource) -> Result<Self> {
    let model = Arc::new(Mutex::new(EmbeddingModel::load(source).await?));
    let probe = run_blocking(model.clone(), vec![DIMENSION_PROBE.to_string()]).await?;
    let dimension = probe.first().map(Vec::len).unwrap_or_default();
    if dimension == 0 {
      return Err(anyhow!("Embedding model {} produced an empty vector", source.repo_id));
    }

    tracing::info!(model = %source.repo_id, dimension, "Embedding model loaded");
    Ok(Self { model, dimension })
  }
}

async fn run_blocking(model: Arc<Mutex<EmbeddingModel>>, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
  tokio::task::spawn_blocking(move || {
    let mut model = model.lock().map_err(|_| anyhow!("Embedding model lock poisoned"))?;
    texts.iter().map(|text| model.embed(text)).collect()
  })
  .await
  .map_err(|e| anyhow!("Embedding task panicked: {}", e))?
}

#[cfg(not(tarpaulin_include))]
#[async_trait]
impl Embedder for OnnxEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    let mut embeddings = run_blocking(self.model.clone(), vec![text.to_string()]).await?;
    embeddings.pop().ok_or_else(|| anyhow!("Embedding model returned no vector"))
  }

  async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    run_blocking(self.model.clone(), texts.to_vec()).await
  }

  fn dimension(&self) -> usize {
    self.dimension
  }
}
