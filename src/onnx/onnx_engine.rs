//! # ONNX Embedding Engine
//!
//! Sentence embeddings with ONNX Runtime and a HuggingFace tokenizer.
//!
//! A batch of texts is tokenized, truncated to the configured sequence
//! length, right-padded to the longest sequence and run through the network
//! in one call. Token-level outputs (`[batch, seq, hidden]`) are pooled with
//! the configured mode; sentence-level outputs (`[batch, hidden]`) are used
//! as they are. Optional L2 normalization is applied last.
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = OnnxEmbeddingEngine::new(model_path, tokenizer_path, &OnnxConfig::default())?;
//! let embeddings = engine.embed_texts(&["Hello world".to_string()]).await?;
//! ```

use std::path::Path;

use ndarray::{ArrayViewD, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info, instrument};

use crate::models::config::PoolingMode;
use crate::models::EmbeddingError;

/// Input run once after loading to learn the output dimension
const SAMPLE_TEXT: &str = "dimension sample";

/// Preferred output for token-level models
const HIDDEN_STATE_OUTPUT: &str = "last_hidden_state";

/// Configuration for ONNX Runtime and post-processing
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to ONNX Runtime library (DLL/so/dylib), if not on the default search path
    pub library_path: Option<String>,
    /// Thread pool size for inference
    pub thread_pool_size: usize,
    /// Maximum tokens per input
    pub max_seq_length: usize,
    pub pooling_mode: PoolingMode,
    pub normalize: bool,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            thread_pool_size: 4,
            max_seq_length: 256,
            pooling_mode: PoolingMode::Mean,
            normalize: false,
        }
    }
}

/// Token ids and attention mask for a padded batch, row-major `[batch, seq_len]`
#[derive(Debug, Clone, PartialEq)]
struct PaddedBatch {
    batch_size: usize,
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

/// ONNX-based embedding engine for generating text embeddings
pub struct OnnxEmbeddingEngine {
    /// ONNX Runtime session for model inference
    session: Session,
    /// HuggingFace tokenizer for text preprocessing
    tokenizer: Tokenizer,
    config: OnnxConfig,
    /// Name of the output tensor read after inference
    output_name: String,
    /// Whether the network declares a `token_type_ids` input
    uses_token_type_ids: bool,
}

fn load_failed<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> EmbeddingError {
    move |e| EmbeddingError::ModelLoadFailed {
        error: format!("{}: {}", stage, e),
    }
}

fn embedding_failed<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> EmbeddingError {
    move |e| EmbeddingError::EmbeddingFailed {
        error: format!("{}: {}", stage, e),
    }
}

impl OnnxEmbeddingEngine {
    /// Create a new ONNX embedding engine
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file (model.onnx)
    /// * `tokenizer_path` - Path to the tokenizer configuration file (tokenizer.json)
    /// * `onnx_config` - ONNX Runtime and pooling configuration
    pub fn new(model_path: &Path, tokenizer_path: &Path, onnx_config: &OnnxConfig) -> Result<Self, EmbeddingError> {
        info!("Initializing ONNX embedding engine with model: {}", model_path.display());

        if let Some(library_path) = &onnx_config.library_path {
            std::env::set_var("ORT_DYLIB_PATH", library_path);
            debug!("Set ORT_DYLIB_PATH to: {}", library_path);
        }

        let session = Session::builder()
            .map_err(load_failed("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_failed("Failed to set optimization level"))?
            .with_intra_threads(onnx_config.thread_pool_size)
            .map_err(load_failed("Failed to set threads"))?
            .commit_from_file(model_path)
            .map_err(load_failed("Failed to load ONNX model"))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(load_failed("Failed to load tokenizer"))?;

        let uses_token_type_ids = session.inputs.iter().any(|i| i.name == "token_type_ids");
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name == HIDDEN_STATE_OUTPUT)
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .ok_or_else(|| EmbeddingError::ModelLoadFailed {
                error: "Model declares no outputs".to_string(),
            })?;

        debug!(
            "Session ready: output={}, token_type_ids={}",
            output_name, uses_token_type_ids
        );

        Ok(Self {
            session,
            tokenizer,
            config: onnx_config.clone(),
            output_name,
            uses_token_type_ids,
        })
    }

    /// Embed a fixed sample text and return the length of the vector it produces
    pub async fn measure_dimension(&mut self) -> Result<usize, EmbeddingError> {
        let embeddings = self
            .embed_texts(&[SAMPLE_TEXT.to_string()])
            .await
            .map_err(load_failed("Sample inference failed"))?;

        match embeddings.first() {
            Some(embedding) if !embedding.is_empty() => Ok(embedding.len()),
            _ => Err(EmbeddingError::ModelLoadFailed {
                error: "Model produced an empty embedding for the sample text".to_string(),
            }),
        }
    }

    /// Generate embeddings for a batch of texts
    ///
    /// Returns one vector per input, in input order. An empty batch returns
    /// an empty result without running the model.
    #[instrument(skip(self, texts), fields(text_count = texts.len()))]
    pub async fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.encode(texts)?;
        let shape = [batch.batch_size as i64, batch.seq_len as i64];

        let mut inputs = vec![
            (
                "input_ids",
                Tensor::from_array((shape, batch.input_ids.clone()))
                    .map_err(embedding_failed("Failed to create input_ids tensor"))?,
            ),
            (
                "attention_mask",
                Tensor::from_array((shape, batch.attention_mask.clone()))
                    .map_err(embedding_failed("Failed to create attention_mask tensor"))?,
            ),
        ];

        if self.uses_token_type_ids {
            // All zeros for single-sequence inputs
            let token_type_ids = vec![0i64; batch.input_ids.len()];
            inputs.push((
                "token_type_ids",
                Tensor::from_array((shape, token_type_ids))
                    .map_err(embedding_failed("Failed to create token_type_ids tensor"))?,
            ));
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(embedding_failed("ONNX inference failed"))?;

        let (out_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(embedding_failed("Failed to extract output tensor"))?;

        let dims: Vec<usize> = out_shape.iter().map(|&x| x as usize).collect();
        let output_array = ArrayViewD::from_shape(dims.as_slice(), data)
            .map_err(embedding_failed("Failed to create output array view"))?;

        let pooled = pool(&output_array, &batch.attention_mask, self.config.pooling_mode)?;
        if pooled.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed {
                error: format!("Model returned {} embeddings for {} inputs", pooled.len(), texts.len()),
            });
        }

        debug!("Generated {} embeddings", pooled.len());

        if self.config.normalize {
            Ok(pooled.iter().map(|e| normalize_embedding(e)).collect())
        } else {
            Ok(pooled)
        }
    }

    fn encode(&self, texts: &[String]) -> Result<PaddedBatch, EmbeddingError> {
        let mut sequences = Vec::with_capacity(texts.len());
        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(embedding_failed("Tokenization failed"))?;
            sequences.push((encoding.get_ids().to_vec(), encoding.get_attention_mask().to_vec()));
        }

        Ok(pad_batch(&sequences, self.config.max_seq_length))
    }
}

/// Truncate each `(ids, mask)` pair to `max_len` and right-pad with zeros
/// to the longest remaining sequence.
fn pad_batch(sequences: &[(Vec<u32>, Vec<u32>)], max_len: usize) -> PaddedBatch {
    let seq_len = sequences
        .iter()
        .map(|(ids, _)| ids.len().min(max_len))
        .max()
        .unwrap_or(0);

    let mut input_ids = vec![0i64; sequences.len() * seq_len];
    let mut attention_mask = vec![0i64; sequences.len() * seq_len];

    for (row, (ids, mask)) in sequences.iter().enumerate() {
        let offset = row * seq_len;
        for (col, (&id, &m)) in ids.iter().zip(mask.iter()).take(seq_len).enumerate() {
            input_ids[offset + col] = id as i64;
            attention_mask[offset + col] = m as i64;
        }
    }

    PaddedBatch {
        batch_size: sequences.len(),
        seq_len,
        input_ids,
        attention_mask,
    }
}

/// Reduce model output to one vector per batch row
///
/// # Arguments
/// * `output` - `[batch, seq_len, hidden]` token embeddings or `[batch, hidden]` sentence embeddings
/// * `attention_mask` - row-major `[batch, seq_len]` mask, 1 for real tokens
fn pool(output: &ArrayViewD<f32>, attention_mask: &[i64], mode: PoolingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match output.ndim() {
        2 => Ok(output
            .outer_iter()
            .map(|row| row.iter().copied().collect())
            .collect()),
        3 => {
            let tokens = output
                .view()
                .into_dimensionality::<Ix3>()
                .map_err(embedding_failed("Unexpected output shape"))?;
            let (batch_size, seq_len, hidden_size) = tokens.dim();

            if seq_len == 0 {
                return Err(EmbeddingError::EmbeddingFailed {
                    error: "Model output has no tokens to pool".to_string(),
                });
            }

            if attention_mask.len() != batch_size * seq_len {
                return Err(EmbeddingError::EmbeddingFailed {
                    error: format!(
                        "Attention mask length {} doesn't match output shape [{}, {}]",
                        attention_mask.len(),
                        batch_size,
                        seq_len
                    ),
                });
            }

            let mut pooled = Vec::with_capacity(batch_size);
            for row in 0..batch_size {
                let embedding = match mode {
                    PoolingMode::Cls => (0..hidden_size).map(|h| tokens[[row, 0, h]]).collect(),
                    PoolingMode::Mean => {
                        let mask = &attention_mask[row * seq_len..(row + 1) * seq_len];
                        let mut sum = vec![0.0f32; hidden_size];
                        let mut valid_tokens = 0usize;

                        for (seq_idx, &m) in mask.iter().enumerate() {
                            if m != 1 {
                                continue;
                            }
                            for (h, value) in sum.iter_mut().enumerate() {
                                *value += tokens[[row, seq_idx, h]];
                            }
                            valid_tokens += 1;
                        }

                        if valid_tokens == 0 {
                            return Err(EmbeddingError::EmbeddingFailed {
                                error: "No valid tokens found in attention mask".to_string(),
                            });
                        }

                        sum.iter().map(|v| v / valid_tokens as f32).collect()
                    }
                };
                pooled.push(embedding);
            }
            Ok(pooled)
        }
        n => Err(EmbeddingError::EmbeddingFailed {
            error: format!("Expected 2D or 3D output tensor, got {}D", n),
        }),
    }
}

/// L2-normalize; a zero vector is returned unchanged
fn normalize_embedding(embedding: &[f32]) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return embedding.to_vec();
    }
    embedding.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn test_pad_batch_truncates_and_pads() {
        let sequences = vec![
            (vec![101, 7, 8, 9, 102], vec![1, 1, 1, 1, 1]),
            (vec![101, 102], vec![1, 1]),
        ];

        let batch = pad_batch(&sequences, 4);
        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.seq_len, 4);
        assert_eq!(batch.input_ids, vec![101, 7, 8, 9, 101, 102, 0, 0]);
        assert_eq!(batch.attention_mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_mean_pooling_ignores_padding() {
        // batch=2, seq=2, hidden=2; second row has one padding token
        let output = ArrayD::from_shape_vec(
            vec![2, 2, 2],
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 99.0, 99.0],
        )
        .unwrap();
        let mask = vec![1, 1, 1, 0];

        let pooled = pool(&output.view(), &mask, PoolingMode::Mean).unwrap();
        assert_eq!(pooled, vec![vec![2.0, 3.0], vec![10.0, 20.0]]);
    }

    #[test]
    fn test_cls_pooling_takes_first_token() {
        let output = ArrayD::from_shape_vec(vec![1, 3, 2], vec![5.0, 6.0, 1.0, 1.0, 2.0, 2.0]).unwrap();
        let pooled = pool(&output.view(), &[1, 1, 1], PoolingMode::Cls).unwrap();
        assert_eq!(pooled, vec![vec![5.0, 6.0]]);
    }

    #[test]
    fn test_sentence_level_output_passes_through() {
        let output = ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let pooled = pool(&output.view(), &[], PoolingMode::Mean).unwrap();
        assert_eq!(pooled, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_mean_pooling_without_tokens_fails() {
        let output = ArrayD::from_shape_vec(vec![1, 2, 1], vec![1.0, 2.0]).unwrap();
        assert!(pool(&output.view(), &[0, 0], PoolingMode::Mean).is_err());
        assert!(pool(&output.view(), &[1], PoolingMode::Mean).is_err());
    }

    #[test]
    fn test_pooling_empty_sequence_fails() {
        let output = ArrayD::from_shape_vec(vec![2, 0, 3], Vec::new()).unwrap();
        for mode in [PoolingMode::Cls, PoolingMode::Mean] {
            let err = pool(&output.view(), &[], mode).unwrap_err();
            assert!(matches!(err, EmbeddingError::EmbeddingFailed { .. }));
        }
    }

    #[test]
    fn test_normalize_embedding() {
        let normalized = normalize_embedding(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        assert_eq!(normalize_embedding(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
