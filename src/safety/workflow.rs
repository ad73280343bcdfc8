//! Safety events and parent approval requests

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, saturating_sub};
use crate::config::ApprovalConfig;
use crate::error::{PolicyDenial, SafetyError, SafetyResult};
use crate::safety::account::KidAccount;
use crate::store::SafetyStore;

pub const PANIC_BUTTON_EVENT: &str = "panic_button";
pub const CONTENT_BLOCKED_EVENT: &str = "content_blocked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Alert,
    Emergency,
}

impl FromStr for Severity {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "alert" => Ok(Self::Alert),
            "emergency" => Ok(Self::Emergency),
            other => Err(SafetyError::validation(format!("Unknown severity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventResolution {
    pub resolved_by: Uuid,
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Append-only safety log entry; only the resolution is ever set later
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SafetyEvent {
    pub id: Uuid,
    pub kid_account_id: Uuid,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolution: Option<EventResolution>,
}

/// Caller-facing view of a safety event with its resolution flattened in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyEventSummary {
    pub id: Uuid,
    pub kid_account_id: Uuid,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

impl From<&SafetyEvent> for SafetyEventSummary {
    fn from(event: &SafetyEvent) -> Self {
        let resolution = event.resolution.as_ref();
        Self {
            id: event.id,
            kid_account_id: event.kid_account_id,
            event_type: event.event_type.clone(),
            severity: event.severity,
            description: event.description.clone(),
            event_data: event.event_data.clone(),
            created_at: event.created_at,
            is_resolved: resolution.is_some(),
            resolved_by: resolution.map(|r| r.resolved_by),
            resolved_at: resolution.map(|r| r.resolved_at),
            resolution_notes: resolution.and_then(|r| r.notes.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Follow,
    Message,
    GroupJoin,
    ContentShare,
}

impl RequestType {
    /// Adjustment applied to a target user's request safety score
    pub fn safety_adjustment(&self) -> f64 {
        match self {
            Self::Follow => 0.1,
            Self::Message => -0.1,
            Self::GroupJoin => 0.05,
            Self::ContentShare => 0.0,
        }
    }
}

impl FromStr for RequestType {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "follow" => Ok(Self::Follow),
            "message" => Ok(Self::Message),
            "group_join" => Ok(Self::GroupJoin),
            "content_share" => Ok(Self::ContentShare),
            other => Err(SafetyError::validation(format!("Unknown request type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    /// Never stored; reported for pending requests past their expiry
    Expired,
}

/// Terminal decision written onto a pending approval
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApprovalDecision {
    pub status: ApprovalStatus,
    pub decided_by: Option<Uuid>,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParentApproval {
    pub id: Uuid,
    pub kid_account_id: Uuid,
    pub parent_id: Uuid,
    pub request_type: RequestType,
    pub target_user_id: Uuid,
    #[serde(default)]
    pub request_data: serde_json::Value,
    pub status: ApprovalStatus,
    pub safety_score: f64,
    pub auto_approved: bool,
    pub decided_by: Option<Uuid>,
    pub parent_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalSummary {
    pub id: Uuid,
    pub kid_account_id: Uuid,
    pub request_type: RequestType,
    pub target_user_id: Uuid,
    pub request_data: serde_json::Value,
    pub status: ApprovalStatus,
    pub safety_score: f64,
    pub auto_approved: bool,
    pub decided_by: Option<Uuid>,
    pub parent_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<&ParentApproval> for ApprovalSummary {
    fn from(approval: &ParentApproval) -> Self {
        Self {
            id: approval.id,
            kid_account_id: approval.kid_account_id,
            request_type: approval.request_type,
            target_user_id: approval.target_user_id,
            request_data: approval.request_data.clone(),
            status: approval.status,
            safety_score: approval.safety_score,
            auto_approved: approval.auto_approved,
            decided_by: approval.decided_by,
            parent_notes: approval.parent_notes.clone(),
            created_at: approval.created_at,
            expires_at: approval.expires_at,
            decided_at: approval.decided_at,
        }
    }
}

impl ApprovalSummary {
    /// Summary with a stale pending request reported as expired
    pub fn at(approval: &ParentApproval, now: DateTime<Utc>) -> Self {
        Self {
            status: approval.status_at(now),
            ..Self::from(approval)
        }
    }
}

impl ParentApproval {
    pub fn status_at(&self, now: DateTime<Utc>) -> ApprovalStatus {
        if self.status == ApprovalStatus::Pending && now > self.expires_at {
            ApprovalStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == ApprovalStatus::Pending
    }
}

/// Records safety events and drives approval requests to a decision
///
/// Ownership checks happen before these methods are called.
pub struct SafetyWorkflow {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: ApprovalConfig,
}

impl SafetyWorkflow {
    pub fn new(store: Arc<dyn SafetyStore>, clock: Arc<dyn Clock>, config: ApprovalConfig) -> Self {
        Self { store, clock, config }
    }

    pub async fn create_event(
        &self,
        kid_account_id: Uuid,
        event_type: &str,
        severity: Severity,
        description: &str,
        event_data: Option<serde_json::Value>,
    ) -> SafetyResult<SafetyEvent> {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(SafetyError::validation("Event type must not be empty"));
        }

        let event = SafetyEvent {
            id: Uuid::new_v4(),
            kid_account_id,
            event_type: event_type.to_string(),
            severity,
            description: description.to_string(),
            event_data: event_data.unwrap_or(serde_json::Value::Null),
            created_at: self.clock.now(),
            resolution: None,
        };
        self.store.append_safety_event(&event).await?;

        match severity {
            Severity::Emergency | Severity::Alert => warn!(
                kid_account_id = %kid_account_id,
                event_id = %event.id,
                event_type = %event.event_type,
                ?severity,
                "Safety event recorded"
            ),
            _ => debug!(
                kid_account_id = %kid_account_id,
                event_id = %event.id,
                event_type = %event.event_type,
                ?severity,
                "Safety event recorded"
            ),
        }
        Ok(event)
    }

    /// Record an emergency; never fails, reports `false` when nothing was recorded
    pub async fn trigger_panic(&self, kid_account_id: Uuid, message: Option<&str>) -> bool {
        let description = message.unwrap_or("Panic button activated");
        let data = serde_json::json!({
            "message": message,
            "triggered_at": self.clock.now().to_rfc3339(),
        });

        match self
            .create_event(kid_account_id, PANIC_BUTTON_EVENT, Severity::Emergency, description, Some(data))
            .await
        {
            Ok(event) => {
                error!(kid_account_id = %kid_account_id, event_id = %event.id, "Panic button triggered");
                true
            }
            Err(e) => {
                error!(kid_account_id = %kid_account_id, error = %e, "Failed to record panic button event");
                false
            }
        }
    }

    pub async fn resolve_event(
        &self,
        event: &SafetyEvent,
        parent_id: Uuid,
        notes: Option<String>,
    ) -> SafetyResult<SafetyEvent> {
        if event.resolution.is_some() {
            return Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyResolved));
        }

        let resolution = EventResolution {
            resolved_by: parent_id,
            notes,
            resolved_at: self.clock.now(),
        };
        if !self.store.resolve_safety_event(event.id, &resolution).await? {
            return Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyResolved));
        }

        info!(kid_account_id = %event.kid_account_id, event_id = %event.id, parent_id = %parent_id, "Safety event resolved");
        Ok(SafetyEvent {
            resolution: Some(resolution),
            ..event.clone()
        })
    }

    pub async fn events_since_days(&self, kid_account_id: Uuid, days: u32) -> SafetyResult<Vec<SafetyEvent>> {
        let since = saturating_sub(self.clock.now(), Duration::days(i64::from(days)));
        Ok(self.store.safety_events_for_kid(kid_account_id, since).await?)
    }

    /// Create a pending request, or an approved one when both scores clear the bar
    pub async fn create_approval(
        &self,
        account: &KidAccount,
        request_type: RequestType,
        target_user_id: Uuid,
        request_data: Option<serde_json::Value>,
        safety_score: f64,
    ) -> SafetyResult<ParentApproval> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(Duration::days(i64::from(self.config.expiration_days)))
            .ok_or_else(|| {
                SafetyError::validation(format!(
                    "Approval expiration of {} days is out of range",
                    self.config.expiration_days
                ))
            })?;
        let auto_approved = safety_score > self.config.auto_approve_safety_score
            && account.trust_score > self.config.auto_approve_trust_score;

        let approval = ParentApproval {
            id: Uuid::new_v4(),
            kid_account_id: account.id,
            parent_id: account.parent_id,
            request_type,
            target_user_id,
            request_data: request_data.unwrap_or(serde_json::Value::Null),
            status: if auto_approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Pending
            },
            safety_score,
            auto_approved,
            decided_by: None,
            parent_notes: None,
            created_at: now,
            expires_at,
            decided_at: auto_approved.then_some(now),
        };
        self.store.insert_approval(&approval).await?;

        info!(
            kid_account_id = %account.id,
            approval_id = %approval.id,
            ?request_type,
            safety_score,
            auto_approved,
            "Approval request created"
        );
        Ok(approval)
    }

    pub async fn decide(
        &self,
        approval: &ParentApproval,
        parent_id: Uuid,
        approved: bool,
        notes: Option<String>,
    ) -> SafetyResult<ParentApproval> {
        let now = self.clock.now();
        match approval.status_at(now) {
            ApprovalStatus::Pending => {}
            ApprovalStatus::Expired => return Err(SafetyError::PolicyDenied(PolicyDenial::ApprovalExpired)),
            _ => return Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyDecided)),
        }

        let decision = ApprovalDecision {
            status: if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            },
            decided_by: Some(parent_id),
            notes,
            decided_at: now,
        };
        if !self.store.decide_approval(approval.id, &decision).await? {
            return Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyDecided));
        }

        info!(
            kid_account_id = %approval.kid_account_id,
            approval_id = %approval.id,
            parent_id = %parent_id,
            approved,
            "Approval request decided"
        );
        Ok(ParentApproval {
            status: decision.status,
            decided_by: decision.decided_by,
            parent_notes: decision.notes,
            decided_at: Some(now),
            ..approval.clone()
        })
    }

    /// Unexpired pending requests for every kid of a parent, newest first
    pub async fn pending_for_parent(&self, parent_id: Uuid) -> SafetyResult<Vec<ParentApproval>> {
        let now = self.clock.now();
        let approvals = self.store.approvals_for_parent(parent_id).await?;
        Ok(approvals.into_iter().filter(|a| a.is_pending_at(now)).collect())
    }

    pub async fn history(&self, kid_account_id: Uuid, page: usize, page_size: usize) -> SafetyResult<Vec<ParentApproval>> {
        if page == 0 || page_size == 0 {
            return Err(SafetyError::validation("Page and page size start at 1"));
        }
        let approvals = self.store.approvals_for_kid(kid_account_id).await?;
        Ok(approvals
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect())
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

    fn setup() -> (SafetyWorkflow, Arc<ManualClock>, KidAccount) {
        let store: Arc<dyn SafetyStore> = Arc::new(JsonStore::in_memory());
        let clock = Arc::new(ManualClock::new(start()));
        let workflow = SafetyWorkflow::new(store, clock.clone(), ApprovalConfig::default());
        let account = KidAccount::new(Uuid::new_v4(), Uuid::new_v4(), 10, SafetyLevel::Moderate, start()).unwrap();
        (workflow, clock, account)
    }

    #[tokio::test]
    async fn panic_creates_emergency_event() {
        let (workflow, _clock, account) = setup();
        assert!(workflow.trigger_panic(account.id, Some("help")).await);

        let events = workflow.events_since_days(account.id, 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, PANIC_BUTTON_EVENT);
        assert_eq!(events[0].severity, Severity::Emergency);
        assert_eq!(events[0].description, "help");
    }

    #[tokio::test]
    async fn empty_event_type_is_rejected() {
        let (workflow, _clock, account) = setup();
        let result = workflow.create_event(account.id, "  ", Severity::Info, "x", None).await;
        assert!(matches!(result, Err(SafetyError::Validation(_))));
    }

    #[tokio::test]
    async fn resolution_is_set_once() {
        let (workflow, _clock, account) = setup();
        let parent = account.parent_id;
        let event = workflow
            .create_event(account.id, "risk_detected", Severity::Alert, "suspicious contact", None)
            .await
            .unwrap();

        let resolved = workflow.resolve_event(&event, parent, Some("talked".into())).await.unwrap();
        assert_eq!(resolved.resolution.as_ref().unwrap().resolved_by, parent);

        // A stale copy still loses against the stored resolution
        let again = workflow.resolve_event(&event, parent, None).await;
        assert!(matches!(again, Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyResolved))));
    }

    #[tokio::test]
    async fn trusted_kid_and_safe_target_is_auto_approved() {
        let (workflow, _clock, mut account) = setup();
        account.trust_score = 0.85;

        let approval = workflow
            .create_approval(&account, RequestType::Follow, Uuid::new_v4(), None, 0.95)
            .await
            .unwrap();
        assert!(approval.auto_approved);
        assert_eq!(approval.status, ApprovalStatus::Approved);

        let borderline = workflow
            .create_approval(&account, RequestType::Follow, Uuid::new_v4(), None, 0.9)
            .await
            .unwrap();
        assert!(!borderline.auto_approved);
        assert_eq!(borderline.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn decided_approval_is_terminal() {
        let (workflow, _clock, account) = setup();
        let approval = workflow
            .create_approval(&account, RequestType::Message, Uuid::new_v4(), None, 0.5)
            .await
            .unwrap();

        let decided = workflow.decide(&approval, account.parent_id, false, None).await.unwrap();
        assert_eq!(decided.status, ApprovalStatus::Denied);

        let again = workflow.decide(&approval, account.parent_id, true, None).await;
        assert!(matches!(again, Err(SafetyError::PolicyDenied(PolicyDenial::AlreadyDecided))));
    }

    #[tokio::test]
    async fn expired_approval_leaves_queue_and_cannot_be_decided() {
        let (workflow, clock, account) = setup();
        let approval = workflow
            .create_approval(&account, RequestType::Follow, Uuid::new_v4(), None, 0.5)
            .await
            .unwrap();
        assert_eq!(workflow.pending_for_parent(account.parent_id).await.unwrap().len(), 1);

        clock.advance(Duration::days(8));
        assert!(workflow.pending_for_parent(account.parent_id).await.unwrap().is_empty());

        let result = workflow.decide(&approval, account.parent_id, true, None).await;
        assert!(matches!(result, Err(SafetyError::PolicyDenied(PolicyDenial::ApprovalExpired))));
    }

    #[tokio::test]
    async fn history_is_paged_newest_first() {
        let (workflow, clock, account) = setup();
        for _ in 0..5 {
            workflow
                .create_approval(&account, RequestType::Follow, Uuid::new_v4(), None, 0.5)
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }

        let first = workflow.history(account.id, 1, 2).await.unwrap();
        let third = workflow.history(account.id, 3, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(third.len(), 1);
        assert!(first[0].created_at > first[1].created_at);
        assert!(workflow.history(account.id, 0, 2).await.is_err());
    }
}
