use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::safety::credentials::MAX_EXPIRATION_DAYS;
use crate::safety::maturity::MaturityLevel;
use crate::safety::usage::TimeWindow;

/// Longest a parent approval request may stay pending
pub const MAX_APPROVAL_EXPIRATION_DAYS: u32 = 365;

/// Longest look-back for unresolved emergencies (30 days)
pub const MAX_EMERGENCY_LOCKOUT_HOURS: u32 = 720;

/// Kid safety policy configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub login_codes: LoginCodeConfig,

    #[serde(default)]
    pub maturity: MaturityConfig,

    #[serde(default)]
    pub passwords: PasswordConfig,

    #[serde(default)]
    pub approvals: ApprovalConfig,

    #[serde(default)]
    pub access: AccessConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Login code issuance settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginCodeConfig {
    /// Default expiration per maturity level
    #[serde(default)]
    pub expiration_days: ExpirationWindows,

    /// How many fresh codes to try before giving up on a collision
    #[serde(default = "default_generation_attempts")]
    pub max_generation_attempts: u32,

    /// Pixel size of one QR module in the rendered image
    #[serde(default = "default_qr_module_size")]
    pub qr_module_size: u32,
}

impl Default for LoginCodeConfig {
    fn default() -> Self {
        Self {
            expiration_days: ExpirationWindows::default(),
            max_generation_attempts: default_generation_attempts(),
            qr_module_size: default_qr_module_size(),
        }
    }
}

fn default_generation_attempts() -> u32 {
    5
}

fn default_qr_module_size() -> u32 {
    20
}

/// Default login code lifetime in days, keyed by maturity level
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExpirationWindows {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl ExpirationWindows {
    pub fn days_for(&self, level: MaturityLevel) -> u32 {
        match level {
            MaturityLevel::Low => self.low,
            MaturityLevel::Medium => self.medium,
            MaturityLevel::High => self.high,
        }
    }
}

impl Default for ExpirationWindows {
    fn default() -> Self {
        Self {
            low: 7,
            medium: 30,
            high: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaturityConfig {
    /// Starting value for each behavioral metric on a new score
    #[serde(default = "default_behavioral_metric")]
    pub default_behavioral_metric: f64,
}

impl Default for MaturityConfig {
    fn default() -> Self {
        Self {
            default_behavioral_metric: default_behavioral_metric(),
        }
    }
}

fn default_behavioral_metric() -> f64 {
    50.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PasswordConfig {
    #[serde(default = "default_min_password_length")]
    pub min_length: usize,

    /// Kid password change attempts allowed per window
    #[serde(default = "default_change_attempts")]
    pub max_change_attempts: usize,

    #[serde(default = "default_change_window")]
    pub change_window_seconds: u64,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_password_length(),
            max_change_attempts: default_change_attempts(),
            change_window_seconds: default_change_window(),
        }
    }
}

fn default_min_password_length() -> usize {
    4
}

fn default_change_attempts() -> usize {
    5
}

fn default_change_window() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_approval_expiration")]
    pub expiration_days: u32,

    /// Requests scoring above this may skip the parent
    #[serde(default = "default_auto_approve_safety")]
    pub auto_approve_safety_score: f64,

    /// ...but only for kids trusted above this
    #[serde(default = "default_auto_approve_trust")]
    pub auto_approve_trust_score: f64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_approval_expiration(),
            auto_approve_safety_score: default_auto_approve_safety(),
            auto_approve_trust_score: default_auto_approve_trust(),
        }
    }
}

fn default_approval_expiration() -> u32 {
    7
}

fn default_auto_approve_safety() -> f64 {
    0.9
}

fn default_auto_approve_trust() -> f64 {
    0.8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Window used when a kid account has no weekday override
    #[serde(default)]
    pub default_window: TimeWindow,

    /// How far back an unresolved emergency blocks access
    #[serde(default = "default_emergency_lockout")]
    pub emergency_lockout_hours: u32,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_window: TimeWindow::default(),
            emergency_lockout_hours: default_emergency_lockout(),
        }
    }
}

fn default_emergency_lockout() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentConfig {
    #[serde(default = "default_min_user_safety")]
    pub min_user_safety_score: f64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            min_user_safety_score: default_min_user_safety(),
        }
    }
}

fn default_min_user_safety() -> f64 {
    0.7
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// State file location (platform default when unset)
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

/// Get the platform-specific config file path
pub fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let system_path = PathBuf::from("/etc/kid-safety/kid-safety.yaml");
        if system_path.exists() {
            return Ok(system_path);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "kid-safety") {
            return Ok(dirs.config_dir().join("kid-safety.yaml"));
        }

        anyhow::bail!("Could not determine config file location");
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from(
            "/Library/Application Support/kid-safety/kid-safety.yaml",
        ))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData")
                .unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push("kid-safety");
        path.push("kid-safety.yaml");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}

/// Default state file path, next to the user's local data
pub fn default_state_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "kid-safety")
        .context("Could not determine data directory")?;
    Ok(dirs.data_local_dir().join("kid-safety-state.json"))
}

impl SafetyConfig {
    /// Resolve the configured state path or fall back to the platform default
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.storage.state_path {
            Some(path) => Ok(path.clone()),
            None => default_state_path(),
        }
    }
}

/// Load configuration from YAML file
pub fn load_config(path: &Path) -> Result<SafetyConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: SafetyConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load the config if present, otherwise run with defaults
pub fn load_or_default(path: &Path) -> Result<SafetyConfig> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        Ok(SafetyConfig::default())
    }
}

/// Save configuration to YAML file
pub fn save_config(path: &Path, config: &SafetyConfig) -> Result<()> {
    validate_config(config)?;

    let content = serde_yaml::to_string(config)
        .context("Failed to serialize config to YAML")?;

    crate::platform::atomic_write(path, content.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &SafetyConfig) -> Result<()> {
    let windows = &config.login_codes.expiration_days;
    if windows.low == 0 || windows.medium == 0 || windows.high == 0 {
        anyhow::bail!("Login code expiration days must be greater than zero");
    }
    if !(windows.low <= windows.medium && windows.medium <= windows.high) {
        anyhow::bail!(
            "Login code expiration must not shrink as maturity grows, got low={} medium={} high={}",
            windows.low,
            windows.medium,
            windows.high
        );
    }

    if windows.high > MAX_EXPIRATION_DAYS {
        anyhow::bail!(
            "Login code expiration must not exceed {} days, got {}",
            MAX_EXPIRATION_DAYS,
            windows.high
        );
    }

    if config.login_codes.max_generation_attempts == 0 {
        anyhow::bail!("max_generation_attempts must be at least 1");
    }

    if config.login_codes.qr_module_size == 0 {
        anyhow::bail!("qr_module_size must be at least 1");
    }

    let metric = config.maturity.default_behavioral_metric;
    if !(0.0..=100.0).contains(&metric) {
        anyhow::bail!("default_behavioral_metric must be within 0-100, got {}", metric);
    }

    if config.passwords.min_length == 0 {
        anyhow::bail!("Password min_length must be at least 1");
    }

    if config.passwords.max_change_attempts == 0 {
        anyhow::bail!("max_change_attempts must be at least 1");
    }

    if config.approvals.expiration_days == 0 {
        anyhow::bail!("Approval expiration_days must be greater than zero");
    }
    if config.approvals.expiration_days > MAX_APPROVAL_EXPIRATION_DAYS {
        anyhow::bail!(
            "Approval expiration_days must not exceed {}, got {}",
            MAX_APPROVAL_EXPIRATION_DAYS,
            config.approvals.expiration_days
        );
    }

    if config.access.emergency_lockout_hours > MAX_EMERGENCY_LOCKOUT_HOURS {
        anyhow::bail!(
            "emergency_lockout_hours must not exceed {}, got {}",
            MAX_EMERGENCY_LOCKOUT_HOURS,
            config.access.emergency_lockout_hours
        );
    }

    for (name, value) in [
        ("auto_approve_safety_score", config.approvals.auto_approve_safety_score),
        ("auto_approve_trust_score", config.approvals.auto_approve_trust_score),
        ("min_user_safety_score", config.content.min_user_safety_score),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be within 0.0-1.0, got {}", name, value);
        }
    }

    config
        .access
        .default_window
        .validate()
        .context("Invalid default access window")?;

    Ok(())
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");
