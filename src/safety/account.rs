use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{SafetyError, SafetyResult};
use crate::safety::usage::{TimeWindow, WeekdayWindows};

pub const MIN_KID_AGE: u8 = 5;
pub const MAX_KID_AGE: u8 = 17;

/// Parent-chosen strictness preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Strict,
    Moderate,
    Relaxed,
    Adaptive,
}

impl FromStr for SafetyLevel {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "moderate" => Ok(Self::Moderate),
            "relaxed" => Ok(Self::Relaxed),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(SafetyError::validation(format!("Unknown safety level: {}", other))),
        }
    }
}

/// Per-account limits, seeded from the kid's age
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountLimits {
    pub max_daily_minutes: u32,
    pub max_connections: u32,
    /// Largest allowed age difference for new connections, in years
    pub age_gap_limit_years: u8,
    pub educational_content_only: bool,
    pub min_content_safety_score: f64,
    /// Replaces the configured default window when set
    #[serde(default)]
    pub allowed_window: Option<TimeWindow>,
    #[serde(default)]
    pub weekday_windows: Vec<WeekdayWindows>,
    /// Offset of the kid's local time from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_true")]
    pub panic_button_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AccountLimits {
    pub fn for_age(age: u8) -> Self {
        let (max_daily_minutes, max_connections) = match age {
            0..=8 => (60, 10),
            9..=12 => (90, 15),
            13..=15 => (120, 25),
            _ => (150, 35),
        };
        let age_gap_limit_years = match age {
            0..=10 => 1,
            11..=13 => 2,
            _ => 3,
        };

        Self {
            max_daily_minutes,
            max_connections,
            age_gap_limit_years,
            educational_content_only: age < 10,
            min_content_safety_score: 0.8,
            allowed_window: None,
            weekday_windows: Vec::new(),
            utc_offset_minutes: 0,
            panic_button_enabled: true,
        }
    }

    pub fn validate(&self) -> SafetyResult<()> {
        if self.max_daily_minutes == 0 || self.max_daily_minutes > 24 * 60 {
            return Err(SafetyError::validation(format!(
                "max_daily_minutes must be within 1-1440, got {}",
                self.max_daily_minutes
            )));
        }
        if !(0.0..=1.0).contains(&self.min_content_safety_score) {
            return Err(SafetyError::validation(format!(
                "min_content_safety_score must be within 0.0-1.0, got {}",
                self.min_content_safety_score
            )));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(SafetyError::validation(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if let Some(window) = &self.allowed_window {
            window.validate()?;
        }
        for entry in &self.weekday_windows {
            for window in &entry.windows {
                window.validate()?;
            }
        }
        Ok(())
    }
}

/// Kid account owned by exactly one parent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KidAccount {
    pub id: Uuid,
    pub parent_id: Uuid,
    /// Platform user identity the kid signs in as
    pub user_id: Uuid,
    pub age: u8,
    pub safety_level: SafetyLevel,
    pub is_active: bool,
    /// 0.0-1.0, used for approval auto-decisions
    pub trust_score: f64,
    pub limits: AccountLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
}

pub fn validate_age(age: u8) -> SafetyResult<()> {
    if !(MIN_KID_AGE..=MAX_KID_AGE).contains(&age) {
        return Err(SafetyError::validation(format!(
            "Kid age must be between {} and {}, got {}",
            MIN_KID_AGE, MAX_KID_AGE, age
        )));
    }
    Ok(())
}

impl KidAccount {
    pub fn new(
        parent_id: Uuid,
        user_id: Uuid,
        age: u8,
        safety_level: SafetyLevel,
        now: DateTime<Utc>,
    ) -> SafetyResult<Self> {
        validate_age(age)?;
        Ok(Self {
            id: Uuid::new_v4(),
            parent_id,
            user_id,
            age,
            safety_level,
            is_active: true,
            trust_score: 0.5,
            limits: AccountLimits::for_age(age),
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        })
    }

    /// Apply a partial settings update, validating the result before committing
    pub fn apply_settings(&mut self, settings: &KidAccountSettings, now: DateTime<Utc>) -> SafetyResult<()> {
        let mut updated = self.clone();

        if let Some(age) = settings.age {
            validate_age(age)?;
            updated.age = age;
        }
        if let Some(level) = settings.safety_level {
            updated.safety_level = level;
        }
        if let Some(trust) = settings.trust_score {
            if !(0.0..=1.0).contains(&trust) {
                return Err(SafetyError::validation(format!(
                    "trust_score must be within 0.0-1.0, got {}",
                    trust
                )));
            }
            updated.trust_score = trust;
        }
        if let Some(minutes) = settings.max_daily_minutes {
            updated.limits.max_daily_minutes = minutes;
        }
        if let Some(connections) = settings.max_connections {
            updated.limits.max_connections = connections;
        }
        if let Some(educational) = settings.educational_content_only {
            updated.limits.educational_content_only = educational;
        }
        if let Some(score) = settings.min_content_safety_score {
            updated.limits.min_content_safety_score = score;
        }
        if let Some(window) = settings.allowed_window {
            updated.limits.allowed_window = Some(window);
        }
        if let Some(windows) = &settings.weekday_windows {
            updated.limits.weekday_windows = windows.clone();
        }
        if let Some(offset) = settings.utc_offset_minutes {
            updated.limits.utc_offset_minutes = offset;
        }
        if let Some(enabled) = settings.panic_button_enabled {
            updated.limits.panic_button_enabled = enabled;
        }

        updated.limits.validate()?;
        updated.updated_at = now;
        *self = updated;
        Ok(())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.deactivated_at = Some(now);
        self.updated_at = now;
    }
}

/// Caller-facing view of a kid account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KidAccountSummary {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub user_id: Uuid,
    pub age: u8,
    pub safety_level: SafetyLevel,
    pub is_active: bool,
    pub trust_score: f64,
    pub max_daily_minutes: u32,
    pub max_connections: u32,
    pub educational_content_only: bool,
    pub panic_button_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<&KidAccount> for KidAccountSummary {
    fn from(account: &KidAccount) -> Self {
        Self {
            id: account.id,
            parent_id: account.parent_id,
            user_id: account.user_id,
            age: account.age,
            safety_level: account.safety_level,
            is_active: account.is_active,
            trust_score: account.trust_score,
            max_daily_minutes: account.limits.max_daily_minutes,
            max_connections: account.limits.max_connections,
            educational_content_only: account.limits.educational_content_only,
            panic_button_enabled: account.limits.panic_button_enabled,
            created_at: account.created_at,
            deactivated_at: account.deactivated_at,
        }
    }
}

/// Partial update of a kid account; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KidAccountSettings {
    pub age: Option<u8>,
    pub safety_level: Option<SafetyLevel>,
    pub trust_score: Option<f64>,
    pub max_daily_minutes: Option<u32>,
    pub max_connections: Option<u32>,
    pub educational_content_only: Option<bool>,
    pub min_content_safety_score: Option<f64>,
    pub allowed_window: Option<TimeWindow>,
    pub weekday_windows: Option<Vec<WeekdayWindows>>,
    pub utc_offset_minutes: Option<i32>,
    pub panic_button_enabled: Option<bool>,
}
