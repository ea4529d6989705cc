//! Process configuration: where the config file lives and how logging is set up

use std::path::PathBuf;

use crate::models::{EmbeddingModelsConfig, EmbeddingResult};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "EMBEDDING_BRIDGE_CONFIG";

/// Configuration file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "embedding_bridge.toml";

/// Load the configuration.
///
/// A file named by `EMBEDDING_BRIDGE_CONFIG` must exist and parse. Without
/// it, `embedding_bridge.toml` is used if present, otherwise defaults.
pub fn load_config() -> EmbeddingResult<EmbeddingModelsConfig> {
    load_config_from(std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}

pub fn load_config_from(explicit: Option<PathBuf>) -> EmbeddingResult<EmbeddingModelsConfig> {
    let config = match explicit {
        Some(path) => EmbeddingModelsConfig::from_file(path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                EmbeddingModelsConfig::from_file(default_path)?
            } else {
                EmbeddingModelsConfig::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

/// `EnvFilter` directive for a configured log level
pub fn log_filter(log_level: &str) -> String {
    match log_level.to_lowercase().as_str() {
        "trace" => "embedding_bridge=trace,warn".to_string(),
        "debug" => "embedding_bridge=debug,warn".to_string(),
        "info" => "embedding_bridge=info,warn".to_string(),
        "warn" => "embedding_bridge=warn,warn".to_string(),
        "error" => "embedding_bridge=error,error".to_string(),
        "off" => "off".to_string(),
        _ => "embedding_bridge=info,warn".to_string(),
    }
}
