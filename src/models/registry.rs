//! Model cache
//!
//! Maps model identifiers to loaded models. Models are loaded on first use
//! through the injected `ModelLoader` and kept for the life of the process.
//! A failed load leaves no entry behind, so the next request retries it.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::model::{EmbeddingModel, ModelLoader};
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};

/// Lazily populated, never evicting cache of loaded models
pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    /// Loaded models
    models: HashMap<String, Box<dyn EmbeddingModel>>,
}

impl ModelRegistry {
    /// Create an empty registry that loads models with `loader`
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            models: HashMap::new(),
        }
    }

    /// Load `identifier` unless it is already cached
    pub async fn ensure_loaded(&mut self, identifier: &str) -> EmbeddingResult<()> {
        if self.models.contains_key(identifier) {
            return Ok(());
        }

        info!("Loading model {}", identifier);
        let model = self.loader.load(identifier).await?;
        self.models.insert(identifier.to_string(), model);
        debug!("{} model(s) cached", self.models.len());
        Ok(())
    }

    /// Output dimension of a loaded model
    pub fn dimension_of(&self, identifier: &str) -> EmbeddingResult<usize> {
        Ok(self.get(identifier)?.dimension())
    }

    /// Embed one text with a loaded model
    pub async fn embed_one(&mut self, identifier: &str, text: &str) -> EmbeddingResult<Embedding> {
        self.get_mut(identifier)?.embed_text(text).await
    }

    /// Embed a batch of texts with a loaded model; all or nothing
    pub async fn embed_many(&mut self, identifier: &str, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        let embeddings = self.get_mut(identifier)?.embed_batch(texts).await?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::InferenceError {
                model_name: identifier.to_string(),
                error: format!("expected {} embeddings, got {}", texts.len(), embeddings.len()),
            });
        }

        Ok(embeddings)
    }

    /// Check if a model is loaded
    pub fn is_model_loaded(&self, identifier: &str) -> bool {
        self.models.contains_key(identifier)
    }

    /// Identifiers of all loaded models, sorted
    pub fn loaded_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    fn get(&self, identifier: &str) -> EmbeddingResult<&dyn EmbeddingModel> {
        self.models
            .get(identifier)
            .map(|model| &**model)
            .ok_or_else(|| EmbeddingError::ModelNotFound {
                model_name: identifier.to_string(),
            })
    }

    fn get_mut(&mut self, identifier: &str) -> EmbeddingResult<&mut Box<dyn EmbeddingModel>> {
        self.models
            .get_mut(identifier)
            .ok_or_else(|| EmbeddingError::ModelNotFound {
                model_name: identifier.to_string(),
            })
    }
}
