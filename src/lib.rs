//! Embedding Bridge Library
//!
//! Line-delimited JSON embedding server over stdin/stdout with a lazily
//! loaded, process-lifetime model cache.

pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod protocol;
pub mod server;

// Re-exports
pub use models::{Embedding, EmbeddingError, EmbeddingModel, ModelLoader, ModelRegistry};
#[cfg(feature = "onnx")]
pub use models::model::onnx::OnnxModelLoader;
pub use protocol::{Request, Response, ResponseBody};
pub use server::EmbeddingServer;
