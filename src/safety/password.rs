//! Kid password lifecycle
//!
//! Parents set passwords. Whether the kid may change it follows the maturity
//! level until independence day, after which the kid keeps the right for good.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, saturating_add};
use crate::config::PasswordConfig;
use crate::error::{PolicyDenial, SafetyError, SafetyResult};
use crate::safety::account::KidAccount;
use crate::safety::maturity::MaturityLevel;
use crate::store::{SafetyStore, StorageError};

pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KidPasswordSettings {
    pub kid_account_id: Uuid,
    /// Argon2id PHC string
    #[serde(default)]
    pub password_hash: Option<String>,
    pub has_password: bool,
    pub password_set_by_parent: bool,
    pub password_changed_by_kid: bool,
    pub first_set_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub change_count: u32,
    pub can_change_password: bool,
    pub password_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub independence_day: Option<DateTime<Utc>>,
    pub independence_day_reached: bool,
    pub notify_parent_on_change: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KidPasswordSettings {
    pub fn new(kid_account_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            kid_account_id,
            password_hash: None,
            has_password: false,
            password_set_by_parent: false,
            password_changed_by_kid: false,
            first_set_at: None,
            last_changed_at: None,
            change_count: 0,
            can_change_password: false,
            password_revoked: false,
            revoked_at: None,
            revocation_reason: None,
            independence_day: None,
            independence_day_reached: false,
            notify_parent_on_change: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derive the change permission from the current maturity level
    ///
    /// Low maturity or a standing revocation blocks changes, unless
    /// independence day has been reached.
    pub fn sync_with_level(&mut self, level: MaturityLevel) {
        self.can_change_password =
            self.independence_day_reached || (!self.password_revoked && level != MaturityLevel::Low);
    }

    fn unlock_independence(&mut self, now: DateTime<Utc>) {
        self.independence_day_reached = true;
        self.notify_parent_on_change = false;
        self.can_change_password = true;
        self.password_revoked = false;
        self.revoked_at = None;
        self.revocation_reason = None;
        self.updated_at = now;
    }
}

/// Password settings as shown to a parent; never carries the hash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PasswordSettingsSummary {
    pub kid_account_id: Uuid,
    pub has_password: bool,
    pub password_changed_by_kid: bool,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub change_count: u32,
    pub can_change_password: bool,
    pub password_revoked: bool,
    pub revocation_reason: Option<String>,
    pub independence_day: Option<DateTime<Utc>>,
    pub independence_day_reached: bool,
    pub notify_parent_on_change: bool,
}

impl From<&KidPasswordSettings> for PasswordSettingsSummary {
    fn from(settings: &KidPasswordSettings) -> Self {
        Self {
            kid_account_id: settings.kid_account_id,
            has_password: settings.has_password,
            password_changed_by_kid: settings.password_changed_by_kid,
            last_changed_at: settings.last_changed_at,
            change_count: settings.change_count,
            can_change_password: settings.can_change_password,
            password_revoked: settings.password_revoked,
            revocation_reason: settings.revocation_reason.clone(),
            independence_day: settings.independence_day,
            independence_day_reached: settings.independence_day_reached,
            notify_parent_on_change: settings.notify_parent_on_change,
        }
    }
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> SafetyResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SafetyError::validation(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> SafetyResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| StorageError::Corrupt(format!("Invalid stored password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Sliding-window attempt limiter keyed by kid account
pub struct AttemptLimiter {
    attempts: HashMap<Uuid, Vec<DateTime<Utc>>>,
    max_attempts: usize,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(max_attempts: usize, window_seconds: u64) -> Self {
        Self {
            attempts: HashMap::new(),
            max_attempts,
            window: Duration::seconds(i64::try_from(window_seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000)),
        }
    }

    /// Record an attempt if one is allowed
    pub fn is_allowed(&mut self, key: Uuid, now: DateTime<Utc>) -> bool {
        let window = self.window;
        let attempts = self.attempts.entry(key).or_default();
        attempts.retain(|&at| now - at < window);

        if attempts.len() < self.max_attempts {
            attempts.push(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self, key: Uuid) {
        self.attempts.remove(&key);
    }
}

pub struct PasswordManager {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: PasswordConfig,
    limiter: Mutex<AttemptLimiter>,
}

impl PasswordManager {
    pub fn new(store: Arc<dyn SafetyStore>, clock: Arc<dyn Clock>, config: PasswordConfig) -> Self {
        let limiter = AttemptLimiter::new(config.max_change_attempts, config.change_window_seconds);
        Self {
            store,
            clock,
            config,
            limiter: Mutex::new(limiter),
        }
    }

    fn validate_password(&self, password: &str) -> SafetyResult<()> {
        let length = password.chars().count();
        if length < self.config.min_length {
            return Err(SafetyError::validation(format!(
                "Password must be at least {} characters",
                self.config.min_length
            )));
        }
        if length > MAX_PASSWORD_LENGTH {
            return Err(SafetyError::validation(format!(
                "Password must be at most {} characters",
                MAX_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    pub async fn settings(&self, kid_account_id: Uuid) -> SafetyResult<Option<KidPasswordSettings>> {
        Ok(self.store.get_password_settings(kid_account_id).await?)
    }

    async fn settings_or_new(&self, kid_account_id: Uuid) -> SafetyResult<KidPasswordSettings> {
        Ok(self
            .store
            .get_password_settings(kid_account_id)
            .await?
            .unwrap_or_else(|| KidPasswordSettings::new(kid_account_id, self.clock.now())))
    }

    /// Parent sets the password; clears any standing revocation
    pub async fn set_password(
        &self,
        account: &KidAccount,
        password: &str,
        level: MaturityLevel,
    ) -> SafetyResult<KidPasswordSettings> {
        self.validate_password(password)?;
        let hash = hash_password(password)?;
        let now = self.clock.now();

        let mut settings = self.settings_or_new(account.id).await?;
        settings.password_hash = Some(hash);
        settings.has_password = true;
        settings.password_set_by_parent = true;
        settings.first_set_at.get_or_insert(now);
        settings.last_changed_at = Some(now);
        settings.password_revoked = false;
        settings.revoked_at = None;
        settings.revocation_reason = None;
        settings.sync_with_level(level);
        settings.updated_at = now;
        self.store.put_password_settings(&settings).await?;

        info!(
            kid_account_id = %account.id,
            can_change = settings.can_change_password,
            level = %level,
            "Password set by parent"
        );
        Ok(settings)
    }

    /// Kid changes their own password
    pub async fn change_password(
        &self,
        account: &KidAccount,
        old_password: &str,
        new_password: &str,
        level: MaturityLevel,
    ) -> SafetyResult<()> {
        let now = self.clock.now();
        let allowed = self
            .limiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_allowed(account.id, now);
        if !allowed {
            warn!(kid_account_id = %account.id, "Password change rate limited");
            return Err(SafetyError::PolicyDenied(PolicyDenial::TooManyAttempts));
        }

        let mut settings = match self.store.get_password_settings(account.id).await? {
            Some(settings) if settings.has_password => settings,
            _ => return Err(SafetyError::PolicyDenied(PolicyDenial::NoPasswordSet)),
        };

        settings.sync_with_level(level);
        if !settings.can_change_password {
            debug!(kid_account_id = %account.id, level = %level, "Password change not permitted");
            return Err(SafetyError::PolicyDenied(PolicyDenial::PasswordChangeNotAllowed));
        }

        let hash = settings.password_hash.as_deref().unwrap_or_default();
        if !verify_password(old_password, hash)? {
            warn!(kid_account_id = %account.id, "Password change with wrong current password");
            return Err(SafetyError::authorization("Current password is incorrect"));
        }

        self.validate_password(new_password)?;
        settings.password_hash = Some(hash_password(new_password)?);
        settings.password_changed_by_kid = true;
        settings.change_count += 1;
        settings.last_changed_at = Some(now);
        settings.updated_at = now;
        self.store.put_password_settings(&settings).await?;

        self.limiter.lock().unwrap_or_else(|e| e.into_inner()).reset(account.id);

        if settings.notify_parent_on_change {
            info!(kid_account_id = %account.id, parent_id = %account.parent_id, "Kid changed password, parent notification due");
        } else {
            info!(kid_account_id = %account.id, "Kid changed password");
        }
        Ok(())
    }

    /// Parent withdraws the kid's right to change the password
    pub async fn revoke_access(&self, account: &KidAccount, reason: &str, level: MaturityLevel) -> SafetyResult<()> {
        if level == MaturityLevel::High {
            warn!(kid_account_id = %account.id, "Refused password revocation at high maturity");
            return Err(SafetyError::PolicyDenied(PolicyDenial::HighMaturityRevocation));
        }

        let mut settings = self
            .store
            .get_password_settings(account.id)
            .await?
            .ok_or_else(|| SafetyError::not_found("Password settings", account.id))?;

        if settings.independence_day_reached {
            return Err(SafetyError::PolicyDenied(PolicyDenial::IndependenceDayReached));
        }

        let now = self.clock.now();
        settings.password_revoked = true;
        settings.revoked_at = Some(now);
        settings.revocation_reason = Some(reason.to_string());
        settings.can_change_password = false;
        settings.updated_at = now;
        self.store.put_password_settings(&settings).await?;

        info!(kid_account_id = %account.id, level = %level, %reason, "Password access revoked");
        Ok(())
    }

    /// Refresh the stored change permission after a maturity change
    pub async fn sync_level(&self, kid_account_id: Uuid, level: MaturityLevel) -> SafetyResult<()> {
        if let Some(mut settings) = self.store.get_password_settings(kid_account_id).await? {
            let before = settings.can_change_password;
            settings.sync_with_level(level);
            if settings.can_change_password != before {
                settings.updated_at = self.clock.now();
                self.store.put_password_settings(&settings).await?;
                debug!(kid_account_id = %kid_account_id, can_change = settings.can_change_password, "Password permission updated");
            }
        }
        Ok(())
    }

    pub async fn schedule_independence_day(
        &self,
        account: &KidAccount,
        date: DateTime<Utc>,
    ) -> SafetyResult<KidPasswordSettings> {
        let now = self.clock.now();
        if date <= now {
            return Err(SafetyError::validation("Independence day must be in the future"));
        }

        let mut settings = self.settings_or_new(account.id).await?;
        if settings.independence_day_reached {
            return Err(SafetyError::PolicyDenied(PolicyDenial::IndependenceDayReached));
        }

        settings.independence_day = Some(date);
        settings.updated_at = now;
        self.store.put_password_settings(&settings).await?;

        info!(kid_account_id = %account.id, independence_day = %date, "Independence day scheduled");
        Ok(settings)
    }

    /// Unlock permanent autonomy once the scheduled date has passed
    ///
    /// Returns true only on the call that performs the unlock.
    pub async fn check_independence_day(&self, kid_account_id: Uuid) -> SafetyResult<bool> {
        let Some(mut settings) = self.store.get_password_settings(kid_account_id).await? else {
            return Ok(false);
        };
        if settings.independence_day_reached {
            return Ok(false);
        }

        let now = self.clock.now();
        match settings.independence_day {
            Some(day) if now >= day => {
                settings.unlock_independence(now);
                self.store.put_password_settings(&settings).await?;
                info!(kid_account_id = %kid_account_id, "Independence day reached, password autonomy unlocked");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pending independence days within the next `days_ahead` days, soonest first
    pub async fn upcoming_independence_days(&self, days_ahead: u32) -> SafetyResult<Vec<(Uuid, DateTime<Utc>)>> {
        let now = self.clock.now();
        let horizon = saturating_add(now, Duration::days(i64::from(days_ahead)));

        let mut upcoming: Vec<(Uuid, DateTime<Utc>)> = self
            .store
            .list_password_settings()
            .await?
            .into_iter()
            .filter(|s| !s.independence_day_reached)
            .filter_map(|s| s.independence_day.map(|day| (s.kid_account_id, day)))
            .filter(|(_, day)| *day <= horizon)
            .collect();
        upcoming.sort_by_key(|(_, day)| *day);
        Ok(upcoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::safety::account::SafetyLevel;
    use crate::store::JsonStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap()
    }

    fn setup() -> (PasswordManager, Arc<ManualClock>, KidAccount) {
        let store: Arc<dyn SafetyStore> = Arc::new(JsonStore::in_memory());
        let clock = Arc::new(ManualClock::new(start()));
        let manager = PasswordManager::new(store, clock.clone(), PasswordConfig::default());
        let account = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 12, SafetyLevel::Moderate, start()).unwrap();
        (manager, clock, account)
    }

    #[test]
    fn hash_and_verify_password() {
        let hash = hash_password("rainbow42").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("rainbow42", &hash).unwrap());
        assert!(!verify_password("rainbow43", &hash).unwrap());
    }

    #[test]
    fn corrupt_hash_is_a_storage_error() {
        let result = verify_password("x", "not-a-hash");
        assert!(matches!(result, Err(SafetyError::Storage(StorageError::Corrupt(_)))));
    }

    #[test]
    fn limiter_blocks_after_max_attempts_and_recovers() {
        let mut limiter = AttemptLimiter::new(2, 60);
        let kid = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(limiter.is_allowed(kid, start()));
        assert!(limiter.is_allowed(kid, start()));
        assert!(!limiter.is_allowed(kid, start()));
        assert!(limiter.is_allowed(other, start()));

        assert!(limiter.is_allowed(kid, start() + Duration::seconds(61)));

        limiter.reset(kid);
        assert!(limiter.is_allowed(kid, start() + Duration::seconds(61)));
    }

    #[test]
    fn sync_with_level_respects_independence() {
        let mut settings = KidPasswordSettings::new(Uuid::new_v4(), start());
        settings.sync_with_level(MaturityLevel::Low);
        assert!(!settings.can_change_password);
        settings.sync_with_level(MaturityLevel::Medium);
        assert!(settings.can_change_password);

        settings.password_revoked = true;
        settings.sync_with_level(MaturityLevel::High);
        assert!(!settings.can_change_password);

        settings.unlock_independence(start());
        settings.sync_with_level(MaturityLevel::Low);
        assert!(settings.can_change_password);
        assert!(!settings.password_revoked);
        assert!(!settings.notify_parent_on_change);
    }

    #[tokio::test]
    async fn low_maturity_cannot_change_password() {
        let (manager, _clock, account) = setup();
        let settings = manager.set_password(&account, "sunflower", MaturityLevel::Low).await.unwrap();
        assert!(!settings.can_change_password);

        let result = manager
            .change_password(&account, "sunflower", "moonlight", MaturityLevel::Low)
            .await;
        assert!(matches!(
            result,
            Err(SafetyError::PolicyDenied(PolicyDenial::PasswordChangeNotAllowed))
        ));
    }

    #[tokio::test]
    async fn medium_maturity_changes_password() {
        let (manager, _clock, account) = setup();
        manager.set_password(&account, "sunflower", MaturityLevel::Medium).await.unwrap();

        manager
            .change_password(&account, "sunflower", "moonlight", MaturityLevel::Medium)
            .await
            .unwrap();

        let settings = manager.settings(account.id).await.unwrap().unwrap();
        assert!(settings.password_changed_by_kid);
        assert_eq!(settings.change_count, 1);
        assert!(verify_password("moonlight", settings.password_hash.as_deref().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn wrong_old_password_is_authorization_error() {
        let (manager, _clock, account) = setup();
        manager.set_password(&account, "sunflower", MaturityLevel::Medium).await.unwrap();

        let result = manager
            .change_password(&account, "tulip", "moonlight", MaturityLevel::Medium)
            .await;
        assert!(matches!(result, Err(SafetyError::Authorization(_))));
    }

    #[tokio::test]
    async fn change_without_password_is_denied() {
        let (manager, _clock, account) = setup();
        let result = manager.change_password(&account, "a", "bcdef", MaturityLevel::High).await;
        assert!(matches!(result, Err(SafetyError::PolicyDenied(PolicyDenial::NoPasswordSet))));
    }

    #[tokio::test]
    async fn repeated_change_attempts_are_rate_limited() {
        let (manager, _clock, account) = setup();
        manager.set_password(&account, "sunflower", MaturityLevel::Medium).await.unwrap();

        for _ in 0..PasswordConfig::default().max_change_attempts {
            let _ = manager.change_password(&account, "wrong", "moonlight", MaturityLevel::Medium).await;
        }
        let result = manager
            .change_password(&account, "sunflower", "moonlight", MaturityLevel::Medium)
            .await;
        assert!(matches!(result, Err(SafetyError::PolicyDenied(PolicyDenial::TooManyAttempts))));
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (manager, _clock, account) = setup();
        let result = manager.set_password(&account, "abc", MaturityLevel::Medium).await;
        assert!(matches!(result, Err(SafetyError::Validation(_))));
    }

    #[tokio::test]
    async fn high_maturity_revocation_is_refused_without_change() {
        let (manager, _clock, account) = setup();
        let before = manager.set_password(&account, "sunflower", MaturityLevel::High).await.unwrap();

        let result = manager.revoke_access(&account, "grades", MaturityLevel::High).await;
        assert!(matches!(
            result,
            Err(SafetyError::PolicyDenied(PolicyDenial::HighMaturityRevocation))
        ));
        assert_eq!(manager.settings(account.id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn revocation_at_medium_blocks_changes() {
        let (manager, _clock, account) = setup();
        manager.set_password(&account, "sunflower", MaturityLevel::Medium).await.unwrap();
        manager.revoke_access(&account, "grades", MaturityLevel::Medium).await.unwrap();

        let settings = manager.settings(account.id).await.unwrap().unwrap();
        assert!(settings.password_revoked);
        assert_eq!(settings.revocation_reason.as_deref(), Some("grades"));

        let result = manager
            .change_password(&account, "sunflower", "moonlight", MaturityLevel::Medium)
            .await;
        assert!(matches!(
            result,
            Err(SafetyError::PolicyDenied(PolicyDenial::PasswordChangeNotAllowed))
        ));
    }

    #[tokio::test]
    async fn independence_day_unlocks_once_and_is_permanent() {
        let (manager, clock, account) = setup();
        manager.set_password(&account, "sunflower", MaturityLevel::Low).await.unwrap();
        manager.revoke_access(&account, "testing", MaturityLevel::Low).await.unwrap();
        manager
            .schedule_independence_day(&account, start() + Duration::days(30))
            .await
            .unwrap();

        assert!(!manager.check_independence_day(account.id).await.unwrap());

        clock.advance(Duration::days(31));
        assert!(manager.check_independence_day(account.id).await.unwrap());
        assert!(!manager.check_independence_day(account.id).await.unwrap());

        let settings = manager.settings(account.id).await.unwrap().unwrap();
        assert!(settings.independence_day_reached);
        assert!(settings.can_change_password);
        assert!(!settings.password_revoked);
        assert!(!settings.notify_parent_on_change);

        // Low maturity no longer blocks, revocation is refused
        manager
            .change_password(&account, "sunflower", "moonlight", MaturityLevel::Low)
            .await
            .unwrap();
        assert!(matches!(
            manager.revoke_access(&account, "again", MaturityLevel::Low).await,
            Err(SafetyError::PolicyDenied(PolicyDenial::IndependenceDayReached))
        ));
        assert!(matches!(
            manager.schedule_independence_day(&account, clock.now() + Duration::days(1)).await,
            Err(SafetyError::PolicyDenied(PolicyDenial::IndependenceDayReached))
        ));
    }

    #[tokio::test]
    async fn past_independence_day_is_rejected() {
        let (manager, _clock, account) = setup();
        let result = manager.schedule_independence_day(&account, start()).await;
        assert!(matches!(result, Err(SafetyError::Validation(_))));
    }

    #[tokio::test]
    async fn upcoming_independence_days_are_sorted() {
        let (manager, _clock, first) = setup();
        let second = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 14, SafetyLevel::Relaxed, start()).unwrap();
        let third = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 15, SafetyLevel::Relaxed, start()).unwrap();

        manager.schedule_independence_day(&first, start() + Duration::days(20)).await.unwrap();
        manager.schedule_independence_day(&second, start() + Duration::days(5)).await.unwrap();
        manager.schedule_independence_day(&third, start() + Duration::days(90)).await.unwrap();

        let upcoming = manager.upcoming_independence_days(30).await.unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].0, second.id);
        assert_eq!(upcoming[1].0, first.id);
    }
}
