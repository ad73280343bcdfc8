//! The single entry point for kid safety policy decisions
//!
//! Every parent-initiated operation checks ownership before touching state,
//! and every read-modify-write of a kid's aggregate runs under that kid's lock.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SafetyConfig;
use crate::error::{SafetyError, SafetyResult, denied_as_false};
use crate::safety::account::{KidAccount, KidAccountSettings, KidAccountSummary, SafetyLevel};
use crate::safety::content::{
    ContentSafetyScorer, InMemoryUserDirectory, KeywordContentScorer, UserDirectory, request_safety_score,
};
use crate::safety::credentials::{CredentialIssuer, IssuedLoginCode, LoginCodeSummary};
use crate::safety::guard::{AggregateLocks, AuthorizationGuard};
use crate::safety::maturity::{BehavioralMetrics, MaturityEngine, MaturityLevel, MaturitySummary};
use crate::safety::password::{PasswordManager, PasswordSettingsSummary};
use crate::safety::usage::{AccessDecision, UsagePolicy, UsageReport};
use crate::safety::workflow::{
    ApprovalSummary, CONTENT_BLOCKED_EVENT, RequestType, SafetyEventSummary, SafetyWorkflow, Severity,
};
use crate::store::{SafetyStore, StorageError};

pub struct KidSafetyServiceBuilder {
    store: Arc<dyn SafetyStore>,
    config: SafetyConfig,
    clock: Arc<dyn Clock>,
    content_scorer: Arc<dyn ContentSafetyScorer>,
    user_directory: Arc<dyn UserDirectory>,
}

impl KidSafetyServiceBuilder {
    pub fn config(mut self, config: SafetyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn content_scorer(mut self, scorer: Arc<dyn ContentSafetyScorer>) -> Self {
        self.content_scorer = scorer;
        self
    }

    pub fn user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = directory;
        self
    }

    pub fn build(self) -> KidSafetyService {
        let Self {
            store,
            config,
            clock,
            content_scorer,
            user_directory,
        } = self;

        KidSafetyService {
            guard: AuthorizationGuard::new(store.clone()),
            locks: AggregateLocks::new(),
            maturity: MaturityEngine::new(store.clone(), clock.clone(), config.maturity.clone()),
            credentials: CredentialIssuer::new(store.clone(), clock.clone(), config.login_codes.clone()),
            passwords: PasswordManager::new(store.clone(), clock.clone(), config.passwords.clone()),
            workflow: SafetyWorkflow::new(store.clone(), clock.clone(), config.approvals.clone()),
            usage: UsagePolicy::new(store.clone(), clock.clone(), config.access.clone()),
            content_scorer,
            user_directory,
            store,
            clock,
            config,
        }
    }
}

pub struct KidSafetyService {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: SafetyConfig,
    guard: AuthorizationGuard,
    locks: AggregateLocks,
    maturity: MaturityEngine,
    credentials: CredentialIssuer,
    passwords: PasswordManager,
    workflow: SafetyWorkflow,
    usage: UsagePolicy,
    content_scorer: Arc<dyn ContentSafetyScorer>,
    user_directory: Arc<dyn UserDirectory>,
}

impl KidSafetyService {
    /// Defaults: system clock, keyword content scorer, empty user directory
    pub fn builder(store: Arc<dyn SafetyStore>) -> KidSafetyServiceBuilder {
        KidSafetyServiceBuilder {
            store,
            config: SafetyConfig::default(),
            clock: Arc::new(SystemClock),
            content_scorer: Arc::new(KeywordContentScorer),
            user_directory: Arc::new(InMemoryUserDirectory::new()),
        }
    }

    pub fn new(store: Arc<dyn SafetyStore>, config: SafetyConfig) -> Self {
        Self::builder(store).config(config).build()
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    // ---- Kid accounts ----

    pub async fn create_kid_account(
        &self,
        parent_id: Uuid,
        user_id: Uuid,
        age: u8,
        safety_level: SafetyLevel,
    ) -> SafetyResult<KidAccountSummary> {
        let account = KidAccount::new(parent_id, user_id, age, safety_level, self.clock.now())?;

        match self.store.insert_account(&account).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(SafetyError::validation(format!(
                    "User {} already has an active kid account",
                    user_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let score = self.maturity.current(&account).await?;

        info!(
            kid_account_id = %account.id,
            parent_id = %parent_id,
            age,
            level = %score.level,
            "Created kid account"
        );
        Ok(KidAccountSummary::from(&account))
    }

    pub async fn get_kid_account(&self, kid_account_id: Uuid) -> SafetyResult<Option<KidAccountSummary>> {
        let account = self.store.get_account(kid_account_id).await?;
        Ok(account.as_ref().map(KidAccountSummary::from))
    }

    pub async fn kid_account_by_user(&self, user_id: Uuid) -> SafetyResult<Option<KidAccountSummary>> {
        let account = self.store.find_account_by_user(user_id).await?;
        Ok(account.as_ref().map(KidAccountSummary::from))
    }

    /// Whether the user currently signs in as an active kid
    pub async fn is_kid_account(&self, user_id: Uuid) -> SafetyResult<bool> {
        Ok(self
            .store
            .find_account_by_user(user_id)
            .await?
            .is_some_and(|account| account.is_active))
    }

    pub async fn kid_accounts_for_parent(&self, parent_id: Uuid) -> SafetyResult<Vec<KidAccountSummary>> {
        let accounts = self.store.accounts_for_parent(parent_id).await?;
        Ok(accounts.iter().map(KidAccountSummary::from).collect())
    }

    pub async fn update_kid_account_settings(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        settings: &KidAccountSettings,
    ) -> SafetyResult<KidAccountSummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let mut account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let previous_age = account.age;

        account.apply_settings(settings, self.clock.now())?;
        self.store.update_account(&account).await?;

        if account.age != previous_age {
            let score = self.maturity.recompute(&account).await?;
            self.passwords.sync_level(account.id, score.level).await?;
        }

        info!(kid_account_id = %kid_account_id, parent_id = %parent_id, "Updated kid account settings");
        Ok(KidAccountSummary::from(&account))
    }

    /// Soft deactivation; outstanding login codes are revoked
    pub async fn deactivate_kid_account(&self, kid_account_id: Uuid, parent_id: Uuid) -> SafetyResult<()> {
        let _lock = self.locks.lock(kid_account_id).await;
        let mut account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        if !account.is_active {
            return Ok(());
        }

        account.deactivate(self.clock.now());
        self.store.update_account(&account).await?;
        let revoked = self.credentials.revoke_all(kid_account_id).await?;

        info!(kid_account_id = %kid_account_id, parent_id = %parent_id, revoked, "Deactivated kid account");
        Ok(())
    }

    // ---- Maturity ----

    pub async fn calculate_maturity_score(&self, kid_account_id: Uuid) -> SafetyResult<MaturitySummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.require_account(kid_account_id).await?;
        let score = self.maturity.recompute(&account).await?;
        self.passwords.sync_level(kid_account_id, score.level).await?;
        Ok(MaturitySummary::from(&score))
    }

    pub async fn update_parent_assessment(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        rating: u8,
        notes: Option<String>,
    ) -> SafetyResult<MaturitySummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let score = self
            .maturity
            .apply_parent_assessment(&account, parent_id, rating, notes)
            .await?;
        self.passwords.sync_level(kid_account_id, score.level).await?;
        Ok(MaturitySummary::from(&score))
    }

    pub async fn update_behavioral_metrics(
        &self,
        kid_account_id: Uuid,
        metrics: BehavioralMetrics,
    ) -> SafetyResult<MaturitySummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.require_account(kid_account_id).await?;
        let score = self.maturity.apply_behavioral_metrics(&account, metrics).await?;
        self.passwords.sync_level(kid_account_id, score.level).await?;
        Ok(MaturitySummary::from(&score))
    }

    pub async fn get_maturity_score(&self, kid_account_id: Uuid) -> SafetyResult<MaturitySummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.require_account(kid_account_id).await?;
        let score = self.maturity.current(&account).await?;
        Ok(MaturitySummary::from(&score))
    }

    async fn current_level(&self, account: &KidAccount) -> SafetyResult<MaturityLevel> {
        self.maturity.current_level(account).await
    }

    // ---- Login codes ----

    pub async fn generate_login_code(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        expiration_days: Option<u32>,
    ) -> SafetyResult<IssuedLoginCode> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        if !account.is_active {
            return Err(SafetyError::kid_account_not_found(kid_account_id));
        }

        let level = self.current_level(&account).await?;
        self.credentials.issue(&account, parent_id, expiration_days, level).await
    }

    /// Consume a login code, reporting exactly why a rejected code failed
    pub async fn redeem_login_code(&self, code: &str) -> SafetyResult<LoginCodeSummary> {
        let redeemed = self.credentials.redeem(code).await?;
        Ok(LoginCodeSummary::from(&redeemed))
    }

    /// True only for the single successful redemption of a live code
    pub async fn validate_login_code(&self, code: &str) -> SafetyResult<bool> {
        denied_as_false(self.redeem_login_code(code).await.map(|_| ()))
    }

    /// False when the code was already used or revoked
    pub async fn revoke_login_code(&self, code_id: Uuid, parent_id: Uuid) -> SafetyResult<bool> {
        let code = self
            .store
            .get_login_code(code_id)
            .await?
            .ok_or_else(|| SafetyError::not_found("Login code", code_id))?;
        self.guard.assert_parent_owns(parent_id, code.kid_account_id).await?;
        self.credentials.revoke(code_id).await
    }

    pub async fn active_login_codes(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
    ) -> SafetyResult<Vec<LoginCodeSummary>> {
        self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let codes = self.credentials.active_codes(kid_account_id).await?;
        Ok(codes.iter().map(LoginCodeSummary::from).collect())
    }

    // ---- Passwords ----

    pub async fn set_kid_password(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        password: &str,
    ) -> SafetyResult<PasswordSettingsSummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let level = self.current_level(&account).await?;
        let settings = self.passwords.set_password(&account, password, level).await?;
        Ok(PasswordSettingsSummary::from(&settings))
    }

    /// Kid-initiated change with the precise denial reason
    pub async fn try_change_password(
        &self,
        kid_account_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> SafetyResult<()> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.require_active(kid_account_id).await?;
        self.passwords.check_independence_day(kid_account_id).await?;
        let level = self.current_level(&account).await?;
        self.passwords
            .change_password(&account, old_password, new_password, level)
            .await
    }

    pub async fn change_password(
        &self,
        kid_account_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> SafetyResult<bool> {
        denied_as_false(
            self.try_change_password(kid_account_id, old_password, new_password)
                .await,
        )
    }

    pub async fn try_revoke_password_access(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        reason: &str,
    ) -> SafetyResult<()> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let level = self.current_level(&account).await?;
        // High maturity refuses before any state is touched
        if level != MaturityLevel::High {
            self.passwords.check_independence_day(kid_account_id).await?;
        }
        self.passwords.revoke_access(&account, reason, level).await
    }

    /// Always false at high maturity, with no state change
    pub async fn revoke_password_access(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        reason: &str,
    ) -> SafetyResult<bool> {
        denied_as_false(
            self.try_revoke_password_access(kid_account_id, parent_id, reason)
                .await,
        )
    }

    pub async fn schedule_independence_day(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        date: DateTime<Utc>,
    ) -> SafetyResult<PasswordSettingsSummary> {
        let _lock = self.locks.lock(kid_account_id).await;
        let account = self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let settings = self.passwords.schedule_independence_day(&account, date).await?;
        Ok(PasswordSettingsSummary::from(&settings))
    }

    /// True only on the call that performs the unlock
    pub async fn check_independence_day(&self, kid_account_id: Uuid) -> SafetyResult<bool> {
        let _lock = self.locks.lock(kid_account_id).await;
        self.guard.require_account(kid_account_id).await?;
        self.passwords.check_independence_day(kid_account_id).await
    }

    pub async fn upcoming_independence_days(&self, days_ahead: u32) -> SafetyResult<Vec<(Uuid, DateTime<Utc>)>> {
        self.passwords.upcoming_independence_days(days_ahead).await
    }

    pub async fn password_settings(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
    ) -> SafetyResult<Option<PasswordSettingsSummary>> {
        self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        Ok(self
            .passwords
            .settings(kid_account_id)
            .await?
            .as_ref()
            .map(PasswordSettingsSummary::from))
    }

    // ---- Safety events ----

    pub async fn create_safety_event(
        &self,
        kid_account_id: Uuid,
        event_type: &str,
        severity: Severity,
        description: &str,
        event_data: Option<serde_json::Value>,
    ) -> SafetyResult<SafetyEventSummary> {
        self.guard.require_account(kid_account_id).await?;
        let event = self
            .workflow
            .create_event(kid_account_id, event_type, severity, description, event_data)
            .await?;
        Ok(SafetyEventSummary::from(&event))
    }

    /// Never fails; `false` means the emergency could not be recorded
    pub async fn trigger_panic_button(&self, kid_account_id: Uuid, message: Option<&str>) -> bool {
        match self.guard.require_account(kid_account_id).await {
            Ok(account) if !account.limits.panic_button_enabled => {
                warn!(kid_account_id = %kid_account_id, "Panic button used while disabled, recording anyway");
            }
            Ok(_) => {}
            Err(e) => {
                error!(kid_account_id = %kid_account_id, error = %e, "Panic button for unknown kid account");
                return false;
            }
        }
        self.workflow.trigger_panic(kid_account_id, message).await
    }

    pub async fn safety_events(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        days: u32,
    ) -> SafetyResult<Vec<SafetyEventSummary>> {
        self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let events = self.workflow.events_since_days(kid_account_id, days).await?;
        Ok(events.iter().map(SafetyEventSummary::from).collect())
    }

    pub async fn resolve_safety_event(
        &self,
        event_id: Uuid,
        parent_id: Uuid,
        notes: Option<String>,
    ) -> SafetyResult<SafetyEventSummary> {
        let event = self
            .store
            .get_safety_event(event_id)
            .await?
            .ok_or_else(|| SafetyError::not_found("Safety event", event_id))?;
        self.guard.assert_parent_owns(parent_id, event.kid_account_id).await?;
        let resolved = self.workflow.resolve_event(&event, parent_id, notes).await?;
        Ok(SafetyEventSummary::from(&resolved))
    }

    // ---- Approvals ----

    /// Request safety score of a target user for a kid's request
    pub async fn request_safety_score(
        &self,
        kid_account_id: Uuid,
        target_user_id: Uuid,
        request_type: RequestType,
    ) -> SafetyResult<f64> {
        let account = self.guard.require_account(kid_account_id).await?;
        let profile = self.user_directory.user_profile(target_user_id).await?;
        let in_network = match profile {
            Some(_) => {
                self.user_directory
                    .is_in_parent_network(account.parent_id, target_user_id)
                    .await?
            }
            None => false,
        };
        Ok(request_safety_score(profile.as_ref(), in_network, request_type))
    }

    pub async fn create_approval_request(
        &self,
        kid_account_id: Uuid,
        request_type: RequestType,
        target_user_id: Uuid,
        request_data: Option<serde_json::Value>,
    ) -> SafetyResult<ApprovalSummary> {
        let account = self.guard.require_active(kid_account_id).await?;
        let score = self
            .request_safety_score(kid_account_id, target_user_id, request_type)
            .await?;
        let approval = self
            .workflow
            .create_approval(&account, request_type, target_user_id, request_data, score)
            .await?;
        Ok(ApprovalSummary::from(&approval))
    }

    /// Decide a pending request with the precise denial reason
    pub async fn decide_approval_request(
        &self,
        approval_id: Uuid,
        parent_id: Uuid,
        approved: bool,
        notes: Option<String>,
    ) -> SafetyResult<ApprovalSummary> {
        let approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| SafetyError::not_found("Approval", approval_id))?;
        self.guard.assert_parent_owns(parent_id, approval.kid_account_id).await?;
        let decided = self.workflow.decide(&approval, parent_id, approved, notes).await?;
        Ok(ApprovalSummary::from(&decided))
    }

    pub async fn process_approval_request(
        &self,
        approval_id: Uuid,
        parent_id: Uuid,
        approved: bool,
        notes: Option<String>,
    ) -> SafetyResult<bool> {
        denied_as_false(
            self.decide_approval_request(approval_id, parent_id, approved, notes)
                .await
                .map(|_| ()),
        )
    }

    pub async fn pending_approval_requests(&self, parent_id: Uuid) -> SafetyResult<Vec<ApprovalSummary>> {
        let pending = self.workflow.pending_for_parent(parent_id).await?;
        Ok(pending.iter().map(ApprovalSummary::from).collect())
    }

    pub async fn approval_history(
        &self,
        kid_account_id: Uuid,
        parent_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> SafetyResult<Vec<ApprovalSummary>> {
        self.guard.assert_parent_owns(parent_id, kid_account_id).await?;
        let now = self.clock.now();
        let history = self.workflow.history(kid_account_id, page, page_size).await?;
        Ok(history.iter().map(|approval| ApprovalSummary::at(approval, now)).collect())
    }

    // ---- Usage & access ----

    pub async fn record_usage(&self, kid_account_id: Uuid, minutes: u32) -> SafetyResult<u32> {
        let account = self.guard.require_account(kid_account_id).await?;
        self.usage.record_usage(&account, minutes).await
    }

    pub async fn get_kid_daily_usage_minutes(&self, kid_account_id: Uuid) -> SafetyResult<u32> {
        let account = self.guard.require_account(kid_account_id).await?;
        self.usage.minutes_used_today(&account).await
    }

    pub async fn usage_today(&self, kid_account_id: Uuid) -> SafetyResult<UsageReport> {
        let account = self.guard.require_account(kid_account_id).await?;
        self.usage.report(&account).await
    }

    pub async fn is_within_allowed_hours(&self, kid_account_id: Uuid) -> SafetyResult<bool> {
        let account = self.guard.require_account(kid_account_id).await?;
        Ok(self.usage.is_within_allowed_hours(&account))
    }

    pub async fn can_kid_access_platform(&self, kid_account_id: Uuid) -> SafetyResult<AccessDecision> {
        let account = self.guard.require_account(kid_account_id).await?;
        let decision = self.usage.evaluate(&account).await?;
        if let Some(reason) = decision.reason {
            info!(kid_account_id = %kid_account_id, %reason, "Platform access denied");
        }
        Ok(decision)
    }

    // ---- Content & user safety ----

    pub async fn content_safety_score(
        &self,
        kid_account_id: Uuid,
        content: &str,
        media_urls: &[String],
    ) -> SafetyResult<f64> {
        let account = self.guard.require_account(kid_account_id).await?;
        self.content_scorer
            .content_safety_score(content, account.age, media_urls)
            .await
    }

    /// Blocked content is logged as an informational safety event
    pub async fn is_content_safe_for_kid(
        &self,
        kid_account_id: Uuid,
        content: &str,
        media_urls: &[String],
    ) -> SafetyResult<bool> {
        let account = self.guard.require_account(kid_account_id).await?;
        let score = self
            .content_scorer
            .content_safety_score(content, account.age, media_urls)
            .await?;

        let mut safe = score >= account.limits.min_content_safety_score;
        if safe && account.limits.educational_content_only {
            safe = self.content_scorer.is_educational(content, account.age).await?;
        }

        if !safe {
            let data = serde_json::json!({
                "safety_score": score,
                "min_safety_score": account.limits.min_content_safety_score,
                "educational_only": account.limits.educational_content_only,
                "media_count": media_urls.len(),
            });
            self.workflow
                .create_event(
                    kid_account_id,
                    CONTENT_BLOCKED_EVENT,
                    Severity::Info,
                    "Content blocked by safety filter",
                    Some(data),
                )
                .await?;
        }
        Ok(safe)
    }

    /// Judged as a follow request against the configured minimum score
    pub async fn is_user_safe_for_kid(&self, kid_account_id: Uuid, target_user_id: Uuid) -> SafetyResult<bool> {
        let score = self
            .request_safety_score(kid_account_id, target_user_id, RequestType::Follow)
            .await?;
        Ok(score >= self.config.content.min_user_safety_score)
    }
}
