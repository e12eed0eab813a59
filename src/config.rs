use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline_config::PipelineConfig;

/// Application-level constants
pub const APP_NAME: &str = "rxscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RXSCAN_CONFIG";
pub const BIND_ENV: &str = "RXSCAN_BIND";
pub const OLLAMA_URL_ENV: &str = "RXSCAN_OLLAMA_URL";
pub const LLM_MODEL_ENV: &str = "RXSCAN_LLM_MODEL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,rxscan_lib=debug"
}

/// Platform config directory for the app, e.g. ~/.config/rxscan on Linux.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.json"))
}

/// Load, override from the environment and validate the configuration.
///
/// File lookup: `explicit`, then `$RXSCAN_CONFIG`, then the default path if it
/// exists. With no file at all the defaults are used.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    let path = resolve_config_path(explicit, env(CONFIG_ENV), default_config_path());

    let mut config = match &path {
        Some(path) => read_config_file(path)?,
        None => PipelineConfig::default(),
    };
    apply_env_overrides(&mut config, env);
    config.validate()?;

    match &path {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("No config file found, using defaults"),
    }
    Ok(config)
}

fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<String>,
    default: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| from_env.map(PathBuf::from))
        .or_else(|| default.filter(|p| p.is_file()))
}

pub fn read_config_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut PipelineConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(bind) = env(BIND_ENV) {
        config.server.bind = bind;
    }
    if let Some(url) = env(OLLAMA_URL_ENV) {
        config.llm.ollama_url = url.clone();
        config.engines.vision.base_url = url;
    }
    if let Some(model) = env(LLM_MODEL_ENV) {
        config.llm.model = model;
    }
}
