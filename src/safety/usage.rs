//! Allowed hours, daily usage and access decisions

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, saturating_sub};
use crate::config::AccessConfig;
use crate::error::{SafetyError, SafetyResult};
use crate::safety::account::{AccountLimits, KidAccount};
use crate::safety::workflow::Severity;
use crate::store::SafetyStore;

/// Inclusive time-of-day window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> SafetyResult<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> SafetyResult<()> {
        if self.start >= self.end {
            return Err(SafetyError::validation(format!(
                "Window start {} must be before end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Windows that replace the default window on one weekday
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WeekdayWindows {
    pub day: Weekday,
    pub windows: Vec<TimeWindow>,
}

/// Windows in force on a given weekday
///
/// Weekday overrides win, then the account's own window, then the configured default.
pub fn windows_for_day(limits: &AccountLimits, day: Weekday, default: TimeWindow) -> Vec<TimeWindow> {
    let overrides: Vec<TimeWindow> = limits
        .weekday_windows
        .iter()
        .filter(|entry| entry.day == day)
        .flat_map(|entry| entry.windows.iter().copied())
        .collect();

    if !overrides.is_empty() {
        return overrides;
    }

    vec![limits.allowed_window.unwrap_or(default)]
}

pub fn is_within_windows(limits: &AccountLimits, local: NaiveDateTime, default: TimeWindow) -> bool {
    windows_for_day(limits, local.weekday(), default)
        .iter()
        .any(|window| window.contains(local.time()))
}

/// Account-local wall clock time
pub fn local_time(limits: &AccountLimits, now: DateTime<Utc>) -> NaiveDateTime {
    match FixedOffset::east_opt(limits.utc_offset_minutes * 60) {
        Some(offset) => now.with_timezone(&offset).naive_local(),
        None => now.naive_utc(),
    }
}

/// Minutes used on one account-local day
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsageRecord {
    pub kid_account_id: Uuid,
    pub date: NaiveDate,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub kid_account_id: Uuid,
    pub date: NaiveDate,
    pub minutes_used: u32,
    pub max_daily_minutes: u32,
    pub remaining_minutes: u32,
    pub percentage_used: f64,
    pub within_allowed_hours: bool,
    pub can_continue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDenialReason {
    AccountInactive,
    OutsideAllowedHours,
    DailyLimitReached,
    ActiveEmergency,
}

impl std::fmt::Display for AccessDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::AccountInactive => "account is inactive",
            Self::OutsideAllowedHours => "outside allowed hours",
            Self::DailyLimitReached => "daily time limit reached",
            Self::ActiveEmergency => "unresolved emergency event",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<AccessDenialReason>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: AccessDenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Tracks screen time and decides whether a kid may use the platform now
pub struct UsagePolicy {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: AccessConfig,
}

impl UsagePolicy {
    pub fn new(store: Arc<dyn SafetyStore>, clock: Arc<dyn Clock>, config: AccessConfig) -> Self {
        Self { store, clock, config }
    }

    fn today(&self, account: &KidAccount) -> NaiveDate {
        local_time(&account.limits, self.clock.now()).date()
    }

    pub fn is_within_allowed_hours(&self, account: &KidAccount) -> bool {
        let local = local_time(&account.limits, self.clock.now());
        is_within_windows(&account.limits, local, self.config.default_window)
    }

    pub async fn minutes_used_today(&self, account: &KidAccount) -> SafetyResult<u32> {
        Ok(self.store.usage_minutes(account.id, self.today(account)).await?)
    }

    pub async fn record_usage(&self, account: &KidAccount, minutes: u32) -> SafetyResult<u32> {
        if minutes == 0 {
            return Err(SafetyError::validation("Usage minutes must be greater than zero"));
        }

        let date = self.today(account);
        let total = self.store.add_usage(account.id, date, minutes).await?;
        debug!(kid_account_id = %account.id, %date, minutes, total, "Recorded usage");

        if total >= account.limits.max_daily_minutes && total - minutes < account.limits.max_daily_minutes {
            info!(kid_account_id = %account.id, total, "Daily time limit reached");
        }
        Ok(total)
    }

    pub async fn report(&self, account: &KidAccount) -> SafetyResult<UsageReport> {
        let date = self.today(account);
        let used = self.store.usage_minutes(account.id, date).await?;
        let max = account.limits.max_daily_minutes;
        let percentage_used = if max == 0 {
            100.0
        } else {
            f64::from(used) / f64::from(max) * 100.0
        };

        Ok(UsageReport {
            kid_account_id: account.id,
            date,
            minutes_used: used,
            max_daily_minutes: max,
            remaining_minutes: max.saturating_sub(used),
            percentage_used,
            within_allowed_hours: self.is_within_allowed_hours(account),
            can_continue: used < max,
        })
    }

    /// Checks run in order: active, hours, usage, emergencies
    pub async fn evaluate(&self, account: &KidAccount) -> SafetyResult<AccessDecision> {
        if !account.is_active {
            return Ok(AccessDecision::deny(AccessDenialReason::AccountInactive));
        }

        if !self.is_within_allowed_hours(account) {
            return Ok(AccessDecision::deny(AccessDenialReason::OutsideAllowedHours));
        }

        if self.minutes_used_today(account).await? >= account.limits.max_daily_minutes {
            return Ok(AccessDecision::deny(AccessDenialReason::DailyLimitReached));
        }

        let since = saturating_sub(
            self.clock.now(),
            Duration::hours(i64::from(self.config.emergency_lockout_hours)),
        );
        let emergency = self
            .store
            .safety_events_for_kid(account.id, since)
            .await?
            .iter()
            .any(|event| event.severity == Severity::Emergency && event.resolution.is_none());
        if emergency {
            return Ok(AccessDecision::deny(AccessDenialReason::ActiveEmergency));
        }

        Ok(AccessDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_time(hm(hour, minute))
    }

    #[test]
    fn default_window_is_six_to_eight() {
        let window = TimeWindow::default();
        assert_eq!(window.start, hm(6, 0));
        assert_eq!(window.end, hm(20, 0));
        assert!(window.validate().is_ok());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window = TimeWindow::default();
        assert!(window.contains(hm(6, 0)));
        assert!(window.contains(hm(20, 0)));
        assert!(!window.contains(hm(5, 59)));
        assert!(!window.contains(hm(20, 1)));
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(TimeWindow::new(hm(20, 0), hm(6, 0)).is_err());
        assert!(TimeWindow::new(hm(8, 0), hm(8, 0)).is_err());
    }

    #[test]
    fn weekday_override_replaces_default() {
        let mut limits = AccountLimits::for_age(10);
        limits.weekday_windows.push(WeekdayWindows {
            day: Weekday::Sat,
            windows: vec![
                TimeWindow::new(hm(9, 0), hm(11, 0)).unwrap(),
                TimeWindow::new(hm(15, 0), hm(17, 0)).unwrap(),
            ],
        });

        // 2025-11-15 is a Saturday
        assert!(is_within_windows(&limits, at((2025, 11, 15), 10, 0), TimeWindow::default()));
        assert!(!is_within_windows(&limits, at((2025, 11, 15), 13, 0), TimeWindow::default()));
        assert!(is_within_windows(&limits, at((2025, 11, 15), 16, 30), TimeWindow::default()));

        // Sunday falls back to the default window
        assert!(is_within_windows(&limits, at((2025, 11, 16), 13, 0), TimeWindow::default()));
    }

    #[test]
    fn account_window_overrides_config_default() {
        let mut limits = AccountLimits::for_age(10);
        limits.allowed_window = Some(TimeWindow::new(hm(7, 0), hm(19, 0)).unwrap());

        assert!(!is_within_windows(&limits, at((2025, 11, 16), 19, 30), TimeWindow::default()));
        assert!(is_within_windows(&limits, at((2025, 11, 16), 18, 30), TimeWindow::default()));
    }

    #[test]
    fn local_time_applies_offset() {
        let mut limits = AccountLimits::for_age(10);
        limits.utc_offset_minutes = -300;
        let now = at((2025, 11, 16), 2, 0).and_utc();

        let local = local_time(&limits, now);
        assert_eq!(local, at((2025, 11, 15), 21, 0));
    }

    #[test]
    fn weekday_windows_deserialize_from_names() {
        let yaml = "day: saturday\nwindows:\n  - start: \"09:00:00\"\n    end: \"11:00:00\"\n";
        let parsed: WeekdayWindows = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.day, Weekday::Sat);
        assert_eq!(parsed.windows[0].start, hm(9, 0));
    }
}
