//! Model directory layout
//!
//! A model directory holds `tokenizer.json` and the network as either
//! `model.onnx` or `onnx/model.onnx`. Directories exported by
//! sentence-transformers also carry `modules.json` and
//! `1_Pooling/config.json`, which say how the token embeddings are pooled
//! and whether the result is normalized.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::config::PoolingMode;
use crate::models::EmbeddingError;

const MODEL_CANDIDATES: [&str; 2] = ["model.onnx", "onnx/model.onnx"];
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Files of one model directory and what the directory declares about pooling
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    /// Pooling declared by `1_Pooling/config.json`
    pub pooling_mode: Option<PoolingMode>,
    /// Normalization declared by `modules.json`
    pub normalize: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    #[serde(rename = "type")]
    module_type: String,
}

#[derive(Debug, Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_mean_tokens: bool,
}

impl ModelFiles {
    /// Find the model files inside `dir`
    pub fn locate(dir: &Path) -> Result<Self, EmbeddingError> {
        let model_path = MODEL_CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.is_file())
            .ok_or_else(|| EmbeddingError::ModelLoadFailed {
                error: format!("No model.onnx found in {}", dir.display()),
            })?;

        let tokenizer_path = dir.join(TOKENIZER_FILE);
        if !tokenizer_path.is_file() {
            return Err(EmbeddingError::ModelLoadFailed {
                error: format!("Tokenizer not found: {}", tokenizer_path.display()),
            });
        }

        Ok(Self {
            model_path,
            tokenizer_path,
            pooling_mode: read_pooling_mode(dir)?,
            normalize: read_normalize(dir)?,
        })
    }
}

fn read_pooling_mode(dir: &Path) -> Result<Option<PoolingMode>, EmbeddingError> {
    let path = dir.join("1_Pooling").join("config.json");
    if !path.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let config: PoolingConfig = serde_json::from_str(&content).map_err(|e| EmbeddingError::ModelLoadFailed {
        error: format!("Invalid pooling config {}: {}", path.display(), e),
    })?;

    if config.pooling_mode_cls_token && !config.pooling_mode_mean_tokens {
        Ok(Some(PoolingMode::Cls))
    } else {
        Ok(Some(PoolingMode::Mean))
    }
}

fn read_normalize(dir: &Path) -> Result<Option<bool>, EmbeddingError> {
    let path = dir.join("modules.json");
    if !path.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let modules: Vec<ModuleEntry> = serde_json::from_str(&content).map_err(|e| EmbeddingError::ModelLoadFailed {
        error: format!("Invalid modules.json {}: {}", path.display(), e),
    })?;

    Ok(Some(modules.iter().any(|m| m.module_type.ends_with("Normalize"))))
}
