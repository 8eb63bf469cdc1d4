use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix for environment overrides, e.g. `CONDUIT__QUEUES__RESPONSE_QUEUE`.
pub const ENV_PREFIX: &str = "CONDUIT";

/// Load configuration from a file, then apply `CONDUIT__*` environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    build_config(config_path, Some(Environment::with_prefix(ENV_PREFIX).separator("__")))
}

/// Load configuration from the file alone, ignoring the environment
pub fn load_config_file(config_path: &str) -> Result<GatewayConfig> {
    build_config(config_path, None)
}

fn build_config(config_path: &str, env: Option<Environment>) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let mut builder = Config::builder().add_source(File::new(
        config_path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
        format,
    ));
    if let Some(env) = env {
        builder = builder.add_source(env);
    }

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}
