use anyhow::{Context, Result};
use std::path::PathBuf;

use kid_safety::config::{EXAMPLE_CONFIG, get_config_path};
use kid_safety::platform::ensure_directory_exists;

/// Write the example configuration file
pub fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = output.unwrap_or_else(|| {
        get_config_path().unwrap_or_else(|_| PathBuf::from("kid-safety.yaml"))
    });

    if output_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output_path.display()
        );
    }

    if let Some(parent) = output_path.parent() {
        ensure_directory_exists(parent)?;
    }

    std::fs::write(&output_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Created configuration file: {}", output_path.display());
    println!("\nEdit this file to tune login code lifetimes, password rules and access windows.");
    println!("See the comments in the file for every option.");

    Ok(())
}
