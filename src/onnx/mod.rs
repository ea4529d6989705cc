//! ONNX Runtime backend for the model loader

pub mod layout;
pub mod onnx_engine;

pub use layout::ModelFiles;
pub use onnx_engine::{OnnxConfig, OnnxEmbeddingEngine};
