//! Persistence for kid safety aggregates
//!
//! Every check-then-set that guards a one-shot transition (code redemption,
//! code revocation, event resolution, approval decision) is a single store
//! call so two concurrent callers can never both win.

pub mod json;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::error::LoginCodeRejection;
use crate::safety::account::KidAccount;
use crate::safety::credentials::KidLoginCode;
use crate::safety::maturity::MaturityScore;
use crate::safety::password::KidPasswordSettings;
use crate::safety::workflow::{ApprovalDecision, EventResolution, ParentApproval, SafetyEvent};

pub use json::JsonStore;

pub type StoreResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist state: {0}")]
    Persist(String),

    /// Stored data failed an integrity check
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A uniqueness constraint would be violated
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
}

/// Result of an atomic login code redemption
#[derive(Debug, Clone)]
pub enum CodeRedemption {
    Redeemed(KidLoginCode),
    Rejected(LoginCodeRejection),
}

/// Result of an atomic login code revocation
#[derive(Debug, Clone)]
pub enum RevokeOutcome {
    Revoked(KidLoginCode),
    AlreadyUsed,
    AlreadyRevoked,
}

#[async_trait]
pub trait SafetyStore: Send + Sync {
    // Kid accounts

    /// Fails with `Conflict` when the user already has a kid account
    async fn insert_account(&self, account: &KidAccount) -> StoreResult<()>;

    async fn get_account(&self, id: Uuid) -> StoreResult<Option<KidAccount>>;

    async fn find_account_by_user(&self, user_id: Uuid) -> StoreResult<Option<KidAccount>>;

    async fn update_account(&self, account: &KidAccount) -> StoreResult<()>;

    async fn accounts_for_parent(&self, parent_id: Uuid) -> StoreResult<Vec<KidAccount>>;

    // Maturity

    async fn get_maturity(&self, kid_account_id: Uuid) -> StoreResult<Option<MaturityScore>>;

    async fn put_maturity(&self, score: &MaturityScore) -> StoreResult<()>;

    // Passwords

    async fn get_password_settings(&self, kid_account_id: Uuid) -> StoreResult<Option<KidPasswordSettings>>;

    async fn put_password_settings(&self, settings: &KidPasswordSettings) -> StoreResult<()>;

    async fn list_password_settings(&self) -> StoreResult<Vec<KidPasswordSettings>>;

    // Login codes

    /// Fails with `Conflict` when an active code with the same string exists
    async fn insert_login_code(&self, code: &KidLoginCode, now: DateTime<Utc>) -> StoreResult<()>;

    async fn get_login_code(&self, id: Uuid) -> StoreResult<Option<KidLoginCode>>;

    /// Check and consume in one step; rejections bump the attempt counter
    async fn redeem_login_code(&self, code: &str, now: DateTime<Utc>) -> StoreResult<CodeRedemption>;

    /// `None` when no code has this id
    async fn revoke_login_code(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<RevokeOutcome>>;

    async fn login_codes_for_kid(&self, kid_account_id: Uuid) -> StoreResult<Vec<KidLoginCode>>;

    // Safety events

    async fn append_safety_event(&self, event: &SafetyEvent) -> StoreResult<()>;

    async fn get_safety_event(&self, id: Uuid) -> StoreResult<Option<SafetyEvent>>;

    /// Returns false when the event was already resolved
    async fn resolve_safety_event(&self, id: Uuid, resolution: &EventResolution) -> StoreResult<bool>;

    /// Events created at or after `since`, newest first
    async fn safety_events_for_kid(&self, kid_account_id: Uuid, since: DateTime<Utc>) -> StoreResult<Vec<SafetyEvent>>;

    // Approvals

    async fn insert_approval(&self, approval: &ParentApproval) -> StoreResult<()>;

    async fn get_approval(&self, id: Uuid) -> StoreResult<Option<ParentApproval>>;

    /// Returns false when the approval is no longer pending
    async fn decide_approval(&self, id: Uuid, decision: &ApprovalDecision) -> StoreResult<bool>;

    /// Newest first
    async fn approvals_for_kid(&self, kid_account_id: Uuid) -> StoreResult<Vec<ParentApproval>>;

    /// Newest first
    async fn approvals_for_parent(&self, parent_id: Uuid) -> StoreResult<Vec<ParentApproval>>;

    // Usage

    /// Add minutes to the day's total and return the new total
    async fn add_usage(&self, kid_account_id: Uuid, date: NaiveDate, minutes: u32) -> StoreResult<u32>;

    async fn usage_minutes(&self, kid_account_id: Uuid, date: NaiveDate) -> StoreResult<u32>;
}
