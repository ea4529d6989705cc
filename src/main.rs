//! Embedding Bridge Main
//!
//! Serves embedding requests over stdin/stdout. Logs go to stderr.

use embedding_bridge::server::{load_config, log_filter};
use embedding_bridge::{EmbeddingServer, ModelRegistry, OnnxModelLoader};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(&config.monitoring.log_level).into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    info!(
        "Embedding bridge started (models_dir={})",
        config.global.models_dir.display()
    );

    let mut server = EmbeddingServer::new(ModelRegistry::new(OnnxModelLoader::new(config)));
    server.serve_stdio().await?;

    info!("Shutting down with models loaded: {:?}", server.registry().loaded_models());
    Ok(())
}
