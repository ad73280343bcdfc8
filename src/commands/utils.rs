use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kid_safety::config::{self, SafetyConfig};
use kid_safety::{JsonStore, KidSafetyService};

/// Initialize logging
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Load the configuration, falling back to defaults when no file exists
pub fn load_config(config_path: Option<&Path>) -> Result<SafetyConfig> {
    match config_path {
        Some(path) => config::load_config(path),
        None => config::load_or_default(&config::get_config_path()?),
    }
}

/// Open the file-backed store and build the service over it
pub fn open_service(config_path: Option<&Path>, state_override: Option<PathBuf>) -> Result<KidSafetyService> {
    let config = load_config(config_path)?;
    let state_path = match state_override {
        Some(path) => path,
        None => config.state_path()?,
    };

    let store = JsonStore::open(state_path.clone())
        .with_context(|| format!("Failed to open state file: {}", state_path.display()))?;
    tracing::debug!(path = %state_path.display(), "Opened state file");

    Ok(KidSafetyService::new(Arc::new(store), config))
}

/// Format a timestamp for display
pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
