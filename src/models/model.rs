//! Model definitions and traits
//!
//! `EmbeddingModel` is a loaded, ready-to-run model. `ModelLoader` turns a
//! model identifier into one. The cache only ever talks to these two traits,
//! so the ONNX backend can be swapped for a fake in tests.

use async_trait::async_trait;

use crate::models::config::PoolingMode;
use crate::models::{Embedding, EmbeddingResult};

/// Information about a loaded model
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Identifier the model was requested under
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
    /// Maximum sequence length
    pub max_sequence_length: usize,
    /// Pooling mode
    pub pooling_mode: PoolingMode,
    /// Whether outputs are L2-normalized
    pub normalize: bool,
    /// Model file path
    pub model_path: String,
}

/// Core embedding model trait
#[async_trait]
pub trait EmbeddingModel: Send {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Get the embedding dimension
    fn dimension(&self) -> usize {
        self.info().dimension
    }

    /// Generate embeddings for a single text
    async fn embed_text(&mut self, text: &str) -> EmbeddingResult<Embedding>;

    /// Generate embeddings for a batch of texts, one vector per text, in order
    async fn embed_batch(&mut self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>>;
}

/// Builds a model instance for an identifier
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, identifier: &str) -> EmbeddingResult<Box<dyn EmbeddingModel>>;
}

/// ONNX-based embedding model implementation
#[cfg(feature = "onnx")]
pub mod onnx {
    use super::*;
    use crate::models::config::EmbeddingModelsConfig;
    use crate::onnx::{ModelFiles, OnnxConfig, OnnxEmbeddingEngine};
    use tracing::info;

    /// ONNX embedding model
    pub struct OnnxEmbeddingModel {
        info: ModelInfo,
        engine: OnnxEmbeddingEngine,
    }

    #[async_trait]
    impl EmbeddingModel for OnnxEmbeddingModel {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        async fn embed_text(&mut self, text: &str) -> EmbeddingResult<Embedding> {
            let embeddings = self.engine.embed_texts(&[text.to_string()]).await
                .map_err(|e| crate::EmbeddingError::InferenceError {
                    model_name: self.info.name.clone(),
                    error: e.to_string(),
                })?;

            embeddings.into_iter().next().ok_or_else(|| crate::EmbeddingError::InferenceError {
                model_name: self.info.name.clone(),
                error: "No embedding returned".to_string(),
            })
        }

        async fn embed_batch(&mut self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
            self.engine.embed_texts(texts).await
                .map_err(|e| crate::EmbeddingError::InferenceError {
                    model_name: self.info.name.clone(),
                    error: e.to_string(),
                })
        }
    }

    /// Loads models from disk with ONNX Runtime
    pub struct OnnxModelLoader {
        config: EmbeddingModelsConfig,
    }

    impl OnnxModelLoader {
        pub fn new(config: EmbeddingModelsConfig) -> Self {
            Self { config }
        }

        /// Engine settings for an identifier: explicit overrides first, then
        /// what the model directory declares, then global defaults.
        fn onnx_config_for(&self, identifier: &str, files: &ModelFiles) -> OnnxConfig {
            let overrides = self.config.get_model(identifier);

            OnnxConfig {
                library_path: self.config.global.onnx_runtime_path.clone(),
                thread_pool_size: self.config.global.num_threads,
                max_seq_length: self.config.max_sequence_length_for(identifier),
                pooling_mode: overrides
                    .and_then(|m| m.pooling_mode)
                    .or(files.pooling_mode)
                    .unwrap_or(self.config.global.pooling_mode),
                normalize: overrides
                    .and_then(|m| m.normalize)
                    .or(files.normalize)
                    .unwrap_or(self.config.global.normalize),
            }
        }
    }

    #[async_trait]
    impl ModelLoader for OnnxModelLoader {
        async fn load(&self, identifier: &str) -> EmbeddingResult<Box<dyn EmbeddingModel>> {
            let model_dir = self.config.resolve_model_dir(identifier)?;
            let files = ModelFiles::locate(&model_dir)?;
            let onnx_config = self.onnx_config_for(identifier, &files);

            let mut engine = OnnxEmbeddingEngine::new(&files.model_path, &files.tokenizer_path, &onnx_config)?;
            let dimension = engine.measure_dimension().await?;

            let info = ModelInfo {
                name: identifier.to_string(),
                dimension,
                max_sequence_length: onnx_config.max_seq_length,
                pooling_mode: onnx_config.pooling_mode,
                normalize: onnx_config.normalize,
                model_path: files.model_path.to_string_lossy().to_string(),
            };

            info!(
                "Loaded model {} from {} (dim={}, max_seq_len={}, pooling={:?}, normalize={})",
                info.name,
                info.model_path,
                info.dimension,
                info.max_sequence_length,
                info.pooling_mode,
                info.normalize
            );

            Ok(Box::new(OnnxEmbeddingModel { info, engine }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::path::PathBuf;

        fn files(pooling_mode: Option<PoolingMode>, normalize: Option<bool>) -> ModelFiles {
            ModelFiles {
                model_path: PathBuf::from("m/model.onnx"),
                tokenizer_path: PathBuf::from("m/tokenizer.json"),
                pooling_mode,
                normalize,
            }
        }

        fn loader() -> OnnxModelLoader {
            let config = EmbeddingModelsConfig::from_str(
                r#"
                [global]
                pooling_mode = "mean"
                normalize = false
                max_sequence_length = 128
                num_threads = 2
                onnx_runtime_path = "/opt/ort/libonnxruntime.so"

                [models.pinned]
                pooling_mode = "mean"
                normalize = false
                max_sequence_length = 64
            "#,
            )
            .unwrap();
            OnnxModelLoader::new(config)
        }

        #[test]
        fn test_override_beats_directory() {
            let config = loader().onnx_config_for("pinned", &files(Some(PoolingMode::Cls), Some(true)));
            assert_eq!(config.pooling_mode, PoolingMode::Mean);
            assert!(!config.normalize);
            assert_eq!(config.max_seq_length, 64);
        }

        #[test]
        fn test_directory_beats_global() {
            let config = loader().onnx_config_for("st-model", &files(Some(PoolingMode::Cls), Some(true)));
            assert_eq!(config.pooling_mode, PoolingMode::Cls);
            assert!(config.normalize);
            assert_eq!(config.max_seq_length, 128);
        }

        #[test]
        fn test_global_defaults_fill_the_rest() {
            let config = loader().onnx_config_for("plain", &files(None, None));
            assert_eq!(config.pooling_mode, PoolingMode::Mean);
            assert!(!config.normalize);
            assert_eq!(config.thread_pool_size, 2);
            assert_eq!(config.library_path.as_deref(), Some("/opt/ort/libonnxruntime.so"));
        }
    }
}
