//! Server module

pub mod config;
pub mod server;

pub use config::{load_config, log_filter};
pub use server::EmbeddingServer;
