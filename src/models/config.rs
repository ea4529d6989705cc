//! Configuration for the embedding models
//!
//! Loads the optional `embedding_bridge.toml` file. Every section has
//! defaults, so an empty file (or no file at all) is a valid configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How token embeddings are reduced to one sentence vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingMode {
    /// Attention-masked mean over all tokens
    Mean,
    /// First token ([CLS]) embedding
    Cls,
}

impl Default for PoolingMode {
    fn default() -> Self {
        PoolingMode::Mean
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmbeddingModelsConfig {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,
    /// Per-identifier overrides
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    /// Monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Directory that model identifiers are resolved against
    pub models_dir: PathBuf,
    /// Tokens kept per input, longer inputs are truncated
    pub max_sequence_length: usize,
    /// ONNX Runtime intra-op threads
    pub num_threads: usize,
    /// Pooling used when neither the model directory nor an override says otherwise
    pub pooling_mode: PoolingMode,
    /// L2-normalize when neither the model directory nor an override says otherwise
    pub normalize: bool,
    /// Path to the ONNX Runtime shared library (sets `ORT_DYLIB_PATH`)
    pub onnx_runtime_path: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            max_sequence_length: 256,
            num_threads: 4,
            pooling_mode: PoolingMode::Mean,
            normalize: false,
            onnx_runtime_path: None,
        }
    }
}

/// Overrides for one model identifier
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelConfig {
    /// Model directory, used instead of resolving the identifier
    pub path: Option<PathBuf>,
    pub pooling_mode: Option<PoolingMode>,
    pub normalize: Option<bool>,
    pub max_sequence_length: Option<usize>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl EmbeddingModelsConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::models::EmbeddingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self, crate::models::EmbeddingError> {
        let config: EmbeddingModelsConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Get the overrides for an identifier, if any
    pub fn get_model(&self, identifier: &str) -> Option<&ModelConfig> {
        self.models.get(identifier)
    }

    /// Effective sequence length for an identifier
    pub fn max_sequence_length_for(&self, identifier: &str) -> usize {
        self.get_model(identifier)
            .and_then(|m| m.max_sequence_length)
            .unwrap_or(self.global.max_sequence_length)
    }

    /// Directory holding the files for an identifier.
    ///
    /// An explicit `path` override wins, then the identifier itself when it
    /// names a directory, then `models_dir/<identifier>`.
    pub fn resolve_model_dir(&self, identifier: &str) -> Result<PathBuf, crate::models::EmbeddingError> {
        if let Some(path) = self.get_model(identifier).and_then(|m| m.path.as_ref()) {
            return if path.is_dir() {
                Ok(path.clone())
            } else {
                Err(crate::models::EmbeddingError::ModelDirNotFound {
                    path: path.display().to_string(),
                })
            };
        }

        let direct = Path::new(identifier);
        if direct.is_dir() {
            return Ok(direct.to_path_buf());
        }

        let candidate = self.global.models_dir.join(identifier);
        if candidate.is_dir() {
            Ok(candidate)
        } else {
            Err(crate::models::EmbeddingError::ModelDirNotFound {
                path: candidate.display().to_string(),
            })
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::models::EmbeddingError> {
        if self.global.max_sequence_length == 0 {
            return Err(crate::models::EmbeddingError::ConfigError {
                message: "global.max_sequence_length must be greater than zero".to_string(),
            });
        }

        if self.global.num_threads == 0 {
            return Err(crate::models::EmbeddingError::ConfigError {
                message: "global.num_threads must be greater than zero".to_string(),
            });
        }

        for (identifier, model) in &self.models {
            if model.max_sequence_length == Some(0) {
                return Err(crate::models::EmbeddingError::ConfigError {
                    message: format!("Model '{}' has max_sequence_length = 0", identifier),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EmbeddingModelsConfig::from_str("").unwrap();
        assert_eq!(config.global.models_dir, PathBuf::from("models"));
        assert_eq!(config.global.max_sequence_length, 256);
        assert_eq!(config.global.pooling_mode, PoolingMode::Mean);
        assert_eq!(config.monitoring.log_level, "info");
        assert!(config.models.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_model_overrides() {
        let config_str = r#"
            [global]
            models_dir = "/opt/models"
            max_sequence_length = 128
            normalize = true

            [models."bge-small"]
            path = "/data/bge-small-en"
            pooling_mode = "cls"
            max_sequence_length = 512

            [monitoring]
            log_level = "debug"
        "#;

        let config = EmbeddingModelsConfig::from_str(config_str).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.global.normalize);

        let bge = config.get_model("bge-small").unwrap();
        assert_eq!(bge.path, Some(PathBuf::from("/data/bge-small-en")));
        assert_eq!(bge.pooling_mode, Some(PoolingMode::Cls));
        assert_eq!(bge.normalize, None);

        assert_eq!(config.max_sequence_length_for("bge-small"), 512);
        assert_eq!(config.max_sequence_length_for("other"), 128);
        assert_eq!(config.monitoring.log_level, "debug");
    }

    #[test]
    fn test_resolve_model_dir() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("minilm")).unwrap();
        let pinned = tempfile::tempdir().unwrap();

        let config_str = format!(
            "[global]\nmodels_dir = {:?}\n\n[models.pinned]\npath = {:?}\n",
            root.path().display().to_string(),
            pinned.path().display().to_string(),
        );
        let config = EmbeddingModelsConfig::from_str(&config_str).unwrap();

        assert_eq!(config.resolve_model_dir("minilm").unwrap(), root.path().join("minilm"));
        assert_eq!(config.resolve_model_dir("pinned").unwrap(), pinned.path());

        let absolute = root.path().join("minilm").display().to_string();
        assert_eq!(config.resolve_model_dir(&absolute).unwrap(), PathBuf::from(&absolute));

        let err = config.resolve_model_dir("does-not-exist").unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn test_unknown_pooling_mode_rejected() {
        let config_str = r#"
            [global]
            pooling_mode = "max"
        "#;

        assert!(EmbeddingModelsConfig::from_str(config_str).is_err());
    }

    #[test]
    fn test_zero_sequence_length_invalid() {
        let config_str = r#"
            [models.tiny]
            max_sequence_length = 0
        "#;

        let config = EmbeddingModelsConfig::from_str(config_str).unwrap();
        assert!(config.validate().is_err());

        let config = EmbeddingModelsConfig::from_str("[global]\nnum_threads = 0").unwrap();
        assert!(config.validate().is_err());
    }
}
