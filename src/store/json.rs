//! JSON snapshot store
//!
//! In memory, the whole state sits behind one async mutex. When opened on a
//! path, every call reloads the snapshot under an advisory lock on a sidecar
//! `.lock` file (shared for reads, exclusive for mutations) and mutations are
//! written back atomically before that lock is released. Several handles or
//! processes can therefore share one state file without losing updates.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{CodeRedemption, RevokeOutcome, SafetyStore, StorageError, StoreResult};
use crate::error::LoginCodeRejection;
use crate::safety::account::KidAccount;
use crate::safety::credentials::KidLoginCode;
use crate::safety::maturity::MaturityScore;
use crate::safety::password::KidPasswordSettings;
use crate::safety::usage::UsageRecord;
use crate::safety::workflow::{ApprovalDecision, ApprovalStatus, EventResolution, ParentApproval, SafetyEvent};

/// Current state version
const STATE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct StoreState {
    version: String,
    #[serde(default)]
    accounts: HashMap<Uuid, KidAccount>,
    #[serde(default)]
    maturity_scores: HashMap<Uuid, MaturityScore>,
    #[serde(default)]
    password_settings: HashMap<Uuid, KidPasswordSettings>,
    #[serde(default)]
    login_codes: HashMap<Uuid, KidLoginCode>,
    #[serde(default)]
    safety_events: Vec<SafetyEvent>,
    #[serde(default)]
    approvals: HashMap<Uuid, ParentApproval>,
    #[serde(default)]
    usage: Vec<UsageRecord>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            accounts: HashMap::new(),
            maturity_scores: HashMap::new(),
            password_settings: HashMap::new(),
            login_codes: HashMap::new(),
            safety_events: Vec::new(),
            approvals: HashMap::new(),
            usage: Vec::new(),
        }
    }

    /// Snapshot at `path`, or an empty state when the file does not exist
    fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let state: StoreState = serde_json::from_str(&content)?;
        if state.version != STATE_VERSION {
            return Err(StorageError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            });
        }
        Ok(state)
    }

    /// Code record a redemption attempt refers to: the active one, else the newest
    fn code_by_value(&mut self, code: &str, now: DateTime<Utc>) -> Option<&mut KidLoginCode> {
        let mut best: Option<&mut KidLoginCode> = None;
        for candidate in self.login_codes.values_mut().filter(|c| c.code == code) {
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    let candidate_rank = (candidate.is_active(now), candidate.created_at);
                    let current_rank = (current.is_active(now), current.created_at);
                    if candidate_rank > current_rank {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Sidecar lock file next to the state file
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Take the advisory lock, then read the snapshot it guards
///
/// The lock is released when the returned file is dropped.
fn load_locked(path: &Path, mode: LockMode) -> StoreResult<(File, StoreState)> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent() {
        crate::platform::ensure_directory_exists(parent)
            .map_err(|e| StorageError::Persist(format!("{:#}", e)))?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    match mode {
        LockMode::Shared => FileExt::lock_shared(&lock_file)?,
        LockMode::Exclusive => FileExt::lock_exclusive(&lock_file)?,
    }

    let state = StoreState::load(path)?;
    Ok((lock_file, state))
}

/// Run file I/O off the async workers
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Persist(format!("Storage task failed: {}", e)))?
}

pub struct JsonStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// Volatile store, for tests and embedding
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            path: None,
        }
    }

    /// Store backed by the snapshot at `path`, which need not exist yet
    ///
    /// An existing snapshot is checked up front so a foreign or corrupt file
    /// fails here rather than on first use.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = StoreState::load(&path)?;
        debug!(path = %path.display(), accounts = state.accounts.len(), "Opened state");

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> StoreResult<T> {
        let mut state = self.state.lock().await;
        if let Some(path) = self.path.clone() {
            let (lock_file, current) = blocking(move || load_locked(&path, LockMode::Shared)).await?;
            drop(lock_file);
            *state = current;
        }
        Ok(f(&state))
    }

    /// Apply `f` to the latest snapshot and persist it
    ///
    /// `f` must not mutate before returning an error.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self.state.lock().await;
        let Some(path) = self.path.clone() else {
            return f(&mut state);
        };

        let load_path = path.clone();
        let (lock_file, current) = blocking(move || load_locked(&load_path, LockMode::Exclusive)).await?;
        *state = current;

        let result = f(&mut state)?;
        let json = serde_json::to_vec_pretty(&*state)?;
        blocking(move || {
            let written = crate::platform::atomic_write(&path, &json)
                .map_err(|e| StorageError::Persist(format!("{:#}", e)));
            drop(lock_file);
            written
        })
        .await?;
        Ok(result)
    }
}

#[async_trait]
impl SafetyStore for JsonStore {
    async fn insert_account(&self, account: &KidAccount) -> StoreResult<()> {
        self.mutate(|state| {
            if state
                .accounts
                .values()
                .any(|existing| existing.user_id == account.user_id && existing.is_active)
            {
                return Err(StorageError::Conflict(format!(
                    "User {} already has an active kid account",
                    account.user_id
                )));
            }
            state.accounts.insert(account.id, account.clone());
            Ok(())
        })
        .await
    }

    async fn get_account(&self, id: Uuid) -> StoreResult<Option<KidAccount>> {
        self.read(|state| state.accounts.get(&id).cloned()).await
    }

    async fn find_account_by_user(&self, user_id: Uuid) -> StoreResult<Option<KidAccount>> {
        self.read(|state| {
            state
                .accounts
                .values()
                .filter(|a| a.user_id == user_id)
                .max_by_key(|a| (a.is_active, a.created_at))
                .cloned()
        })
        .await
    }

    async fn update_account(&self, account: &KidAccount) -> StoreResult<()> {
        self.mutate(|state| {
            if !state.accounts.contains_key(&account.id) {
                return Err(StorageError::Corrupt(format!("Kid account {} does not exist", account.id)));
            }
            state.accounts.insert(account.id, account.clone());
            Ok(())
        })
        .await
    }

    async fn accounts_for_parent(&self, parent_id: Uuid) -> StoreResult<Vec<KidAccount>> {
        self.read(|state| {
            let mut accounts: Vec<KidAccount> = state
                .accounts
                .values()
                .filter(|a| a.parent_id == parent_id)
                .cloned()
                .collect();
            accounts.sort_by_key(|a| a.created_at);
            accounts
        })
        .await
    }

    async fn get_maturity(&self, kid_account_id: Uuid) -> StoreResult<Option<MaturityScore>> {
        self.read(|state| state.maturity_scores.get(&kid_account_id).cloned()).await
    }

    async fn put_maturity(&self, score: &MaturityScore) -> StoreResult<()> {
        self.mutate(|state| {
            state.maturity_scores.insert(score.kid_account_id, score.clone());
            Ok(())
        })
        .await
    }

    async fn get_password_settings(&self, kid_account_id: Uuid) -> StoreResult<Option<KidPasswordSettings>> {
        self.read(|state| state.password_settings.get(&kid_account_id).cloned()).await
    }

    async fn put_password_settings(&self, settings: &KidPasswordSettings) -> StoreResult<()> {
        self.mutate(|state| {
            state.password_settings.insert(settings.kid_account_id, settings.clone());
            Ok(())
        })
        .await
    }

    async fn list_password_settings(&self) -> StoreResult<Vec<KidPasswordSettings>> {
        self.read(|state| state.password_settings.values().cloned().collect()).await
    }

    async fn insert_login_code(&self, code: &KidLoginCode, now: DateTime<Utc>) -> StoreResult<()> {
        self.mutate(|state| {
            if state
                .login_codes
                .values()
                .any(|existing| existing.code == code.code && existing.is_active(now))
            {
                return Err(StorageError::Conflict("Login code already active".to_string()));
            }
            state.login_codes.insert(code.id, code.clone());
            Ok(())
        })
        .await
    }

    async fn get_login_code(&self, id: Uuid) -> StoreResult<Option<KidLoginCode>> {
        self.read(|state| state.login_codes.get(&id).cloned()).await
    }

    async fn redeem_login_code(&self, code: &str, now: DateTime<Utc>) -> StoreResult<CodeRedemption> {
        self.mutate(|state| {
            let Some(record) = state.code_by_value(code, now) else {
                return Ok(CodeRedemption::Rejected(LoginCodeRejection::NotFound));
            };

            record.last_attempt_at = Some(now);
            match record.check_redeemable(now) {
                Ok(()) => {
                    record.is_used = true;
                    record.used_at = Some(now);
                    Ok(CodeRedemption::Redeemed(record.clone()))
                }
                Err(reason) => {
                    record.failed_attempts += 1;
                    Ok(CodeRedemption::Rejected(reason))
                }
            }
        })
        .await
    }

    async fn revoke_login_code(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<RevokeOutcome>> {
        self.mutate(|state| {
            let Some(record) = state.login_codes.get_mut(&id) else {
                return Ok(None);
            };
            if record.is_used {
                return Ok(Some(RevokeOutcome::AlreadyUsed));
            }
            if record.is_revoked {
                return Ok(Some(RevokeOutcome::AlreadyRevoked));
            }
            record.is_revoked = true;
            record.revoked_at = Some(now);
            Ok(Some(RevokeOutcome::Revoked(record.clone())))
        })
        .await
    }

    async fn login_codes_for_kid(&self, kid_account_id: Uuid) -> StoreResult<Vec<KidLoginCode>> {
        self.read(|state| {
            state
                .login_codes
                .values()
                .filter(|c| c.kid_account_id == kid_account_id)
                .cloned()
                .collect()
        })
        .await
    }

    async fn append_safety_event(&self, event: &SafetyEvent) -> StoreResult<()> {
        self.mutate(|state| {
            state.safety_events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn get_safety_event(&self, id: Uuid) -> StoreResult<Option<SafetyEvent>> {
        self.read(|state| state.safety_events.iter().find(|e| e.id == id).cloned())
            .await
    }

    async fn resolve_safety_event(&self, id: Uuid, resolution: &EventResolution) -> StoreResult<bool> {
        self.mutate(|state| {
            match state.safety_events.iter_mut().find(|e| e.id == id) {
                Some(event) if event.resolution.is_none() => {
                    event.resolution = Some(resolution.clone());
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(StorageError::Corrupt(format!("Safety event {} does not exist", id))),
            }
        })
        .await
    }

    async fn safety_events_for_kid(&self, kid_account_id: Uuid, since: DateTime<Utc>) -> StoreResult<Vec<SafetyEvent>> {
        self.read(|state| {
            let mut events: Vec<SafetyEvent> = state
                .safety_events
                .iter()
                .filter(|e| e.kid_account_id == kid_account_id && e.created_at >= since)
                .cloned()
                .collect();
            events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            events
        })
        .await
    }

    async fn insert_approval(&self, approval: &ParentApproval) -> StoreResult<()> {
        self.mutate(|state| {
            state.approvals.insert(approval.id, approval.clone());
            Ok(())
        })
        .await
    }

    async fn get_approval(&self, id: Uuid) -> StoreResult<Option<ParentApproval>> {
        self.read(|state| state.approvals.get(&id).cloned()).await
    }

    async fn decide_approval(&self, id: Uuid, decision: &ApprovalDecision) -> StoreResult<bool> {
        self.mutate(|state| {
            let Some(approval) = state.approvals.get_mut(&id) else {
                return Err(StorageError::Corrupt(format!("Approval {} does not exist", id)));
            };
            if approval.status != ApprovalStatus::Pending {
                return Ok(false);
            }
            approval.status = decision.status;
            approval.decided_by = decision.decided_by;
            approval.parent_notes = decision.notes.clone();
            approval.decided_at = Some(decision.decided_at);
            Ok(true)
        })
        .await
    }

    async fn approvals_for_kid(&self, kid_account_id: Uuid) -> StoreResult<Vec<ParentApproval>> {
        self.read(|state| newest_first(state.approvals.values().filter(|a| a.kid_account_id == kid_account_id)))
            .await
    }

    async fn approvals_for_parent(&self, parent_id: Uuid) -> StoreResult<Vec<ParentApproval>> {
        self.read(|state| newest_first(state.approvals.values().filter(|a| a.parent_id == parent_id)))
            .await
    }

    async fn add_usage(&self, kid_account_id: Uuid, date: NaiveDate, minutes: u32) -> StoreResult<u32> {
        self.mutate(|state| {
            let position = state
                .usage
                .iter()
                .position(|r| r.kid_account_id == kid_account_id && r.date == date);
            let index = match position {
                Some(index) => index,
                None => {
                    state.usage.push(UsageRecord {
                        kid_account_id,
                        date,
                        minutes: 0,
                    });
                    state.usage.len() - 1
                }
            };
            let record = &mut state.usage[index];
            record.minutes = record.minutes.saturating_add(minutes);
            Ok(record.minutes)
        })
        .await
    }

    async fn usage_minutes(&self, kid_account_id: Uuid, date: NaiveDate) -> StoreResult<u32> {
        self.read(|state| {
            state
                .usage
                .iter()
                .find(|r| r.kid_account_id == kid_account_id && r.date == date)
                .map_or(0, |r| r.minutes)
        })
        .await
    }
}

fn newest_first<'a>(approvals: impl Iterator<Item = &'a ParentApproval>) -> Vec<ParentApproval> {
    let mut approvals: Vec<ParentApproval> = approvals.cloned().collect();
    approvals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    approvals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::account::SafetyLevel;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap()
    }

    fn code(value: &str, kid: Uuid, created_at: DateTime<Utc>) -> KidLoginCode {
        KidLoginCode {
            id: Uuid::new_v4(),
            code: value.to_string(),
            kid_account_id: kid,
            parent_id: Uuid::new_v4(),
            expiration_days: 7,
            created_at,
            expires_at: created_at + Duration::days(7),
            visual_code: None,
            is_used: false,
            used_at: None,
            is_revoked: false,
            revoked_at: None,
            failed_attempts: 0,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_active_code_conflicts() {
        let store = JsonStore::in_memory();
        let kid = Uuid::new_v4();
        store.insert_login_code(&code("ABCD2345", kid, now()), now()).await.unwrap();

        let result = store.insert_login_code(&code("ABCD2345", kid, now()), now()).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn inactive_code_string_can_be_reissued_and_active_one_wins() {
        let store = JsonStore::in_memory();
        let kid = Uuid::new_v4();
        let old = code("ABCD2345", kid, now() - Duration::days(30));
        store.insert_login_code(&old, now()).await.unwrap();

        let fresh = code("ABCD2345", kid, now());
        store.insert_login_code(&fresh, now()).await.unwrap();

        match store.redeem_login_code("ABCD2345", now()).await.unwrap() {
            CodeRedemption::Redeemed(record) => assert_eq!(record.id, fresh.id),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_redemption_counts_attempt() {
        let store = JsonStore::in_memory();
        let record = code("ABCD2345", Uuid::new_v4(), now());
        store.insert_login_code(&record, now()).await.unwrap();

        let late = now() + Duration::days(8);
        assert!(matches!(
            store.redeem_login_code("ABCD2345", late).await.unwrap(),
            CodeRedemption::Rejected(LoginCodeRejection::Expired)
        ));

        let stored = store.get_login_code(record.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 1);
        assert_eq!(stored.last_attempt_at, Some(late));
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_one_winner() {
        let store = Arc::new(JsonStore::in_memory());
        store
            .insert_login_code(&code("QRST6789", Uuid::new_v4(), now()), now())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.redeem_login_code("QRST6789", now()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CodeRedemption::Redeemed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn one_active_account_per_user() {
        let store = JsonStore::in_memory();
        let user = Uuid::new_v4();
        let mut first = KidAccount::new(Uuid::new_v4(), user, 10, SafetyLevel::Strict, now()).unwrap();
        store.insert_account(&first).await.unwrap();

        let second = KidAccount::new(Uuid::new_v4(), user, 10, SafetyLevel::Strict, now()).unwrap();
        assert!(matches!(store.insert_account(&second).await, Err(StorageError::Conflict(_))));

        first.deactivate(now());
        store.update_account(&first).await.unwrap();
        store.insert_account(&second).await.unwrap();
        assert_eq!(store.find_account_by_user(user).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn usage_accumulates_per_day() {
        let store = JsonStore::in_memory();
        let kid = Uuid::new_v4();
        let day = now().date_naive();

        assert_eq!(store.add_usage(kid, day, 20).await.unwrap(), 20);
        assert_eq!(store.add_usage(kid, day, 15).await.unwrap(), 35);
        assert_eq!(store.usage_minutes(kid, day).await.unwrap(), 35);
        assert_eq!(store.usage_minutes(kid, day.succ_opt().unwrap()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let account = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 12, SafetyLevel::Adaptive, now()).unwrap();

        {
            let store = JsonStore::open(&path).unwrap();
            store.insert_account(&account).await.unwrap();
            store.add_usage(account.id, now().date_naive(), 30).await.unwrap();
        }

        let reopened = JsonStore::open(&path).unwrap();
        let loaded = reopened.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, account.user_id);
        assert_eq!(reopened.usage_minutes(account.id, now().date_naive()).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn unusable_location_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = JsonStore::open(blocker.join("state.json")).unwrap();
        let account = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 12, SafetyLevel::Strict, now()).unwrap();

        assert!(store.insert_account(&account).await.is_err());
        assert!(store.get_account(account.id).await.is_err());
    }

    #[tokio::test]
    async fn handles_on_one_file_share_redemptions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = Arc::new(JsonStore::open(&path).unwrap());
        let second = Arc::new(JsonStore::open(&path).unwrap());
        first
            .insert_login_code(&code("WXYZ2345", Uuid::new_v4(), now()), now())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for store in [first.clone(), second.clone(), first, second] {
            handles.push(tokio::spawn(async move {
                store.redeem_login_code("WXYZ2345", now()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CodeRedemption::Redeemed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn stale_handle_does_not_drop_other_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = JsonStore::open(&path).unwrap();
        let second = JsonStore::open(&path).unwrap();

        let a = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 9, SafetyLevel::Strict, now()).unwrap();
        let b = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 11, SafetyLevel::Strict, now()).unwrap();
        first.insert_account(&a).await.unwrap();
        second.insert_account(&b).await.unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        assert!(reopened.get_account(a.id).await.unwrap().is_some());
        assert!(reopened.get_account(b.id).await.unwrap().is_some());
        assert_eq!(second.get_account(a.id).await.unwrap().unwrap().age, 9);
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version":"0.1"}"#).unwrap();

        assert!(matches!(JsonStore::open(&path), Err(StorageError::VersionMismatch { .. })));
    }
}
