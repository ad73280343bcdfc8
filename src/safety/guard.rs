use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

use crate::error::{SafetyError, SafetyResult};
use crate::safety::account::KidAccount;
use crate::store::SafetyStore;

/// Resolves kid accounts and checks that the acting parent owns them
pub struct AuthorizationGuard {
    store: Arc<dyn SafetyStore>,
}

impl AuthorizationGuard {
    pub fn new(store: Arc<dyn SafetyStore>) -> Self {
        Self { store }
    }

    pub async fn require_account(&self, kid_account_id: Uuid) -> SafetyResult<KidAccount> {
        self.store
            .get_account(kid_account_id)
            .await?
            .ok_or_else(|| SafetyError::kid_account_not_found(kid_account_id))
    }

    /// Deactivated accounts are treated as absent
    pub async fn require_active(&self, kid_account_id: Uuid) -> SafetyResult<KidAccount> {
        match self.require_account(kid_account_id).await? {
            account if account.is_active => Ok(account),
            _ => Err(SafetyError::kid_account_not_found(kid_account_id)),
        }
    }

    /// The account, provided `parent_id` is its owner
    pub async fn assert_parent_owns(&self, parent_id: Uuid, kid_account_id: Uuid) -> SafetyResult<KidAccount> {
        let account = self.require_account(kid_account_id).await?;
        if account.parent_id != parent_id {
            warn!(
                kid_account_id = %kid_account_id,
                parent_id = %parent_id,
                "Parent does not own kid account"
            );
            return Err(SafetyError::authorization(format!(
                "Parent {} does not control kid account {}",
                parent_id, kid_account_id
            )));
        }
        Ok(account)
    }
}

/// One async lock per kid account aggregate
///
/// Held around every read-modify-write of an account, its maturity score or
/// its password settings. Entries nobody holds or waits on are pruned.
#[derive(Default)]
pub struct AggregateLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, kid_account_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(kid_account_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
