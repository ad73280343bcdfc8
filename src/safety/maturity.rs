//! Maturity scoring
//!
//! A kid's maturity score is the sum of three bounded components:
//! - age (0-40): four points per year above six
//! - parent assessment (0-30): the parent's 0-5 rating times six
//! - behavior (0-30): the mean of five 0-100 metrics scaled by 0.3
//!
//! The discrete level derived from the total drives login code lifetimes,
//! password permissions and revocation eligibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::MaturityConfig;
use crate::error::{SafetyError, SafetyResult};
use crate::safety::account::KidAccount;
use crate::store::SafetyStore;

pub const AGE_COMPONENT_MAX: u32 = 40;
pub const PARENT_COMPONENT_MAX: u32 = 30;
pub const BEHAVIORAL_COMPONENT_MAX: u32 = 30;
pub const MAX_PARENT_RATING: u8 = 5;

/// Totals at or above this are `high`
pub const HIGH_THRESHOLD: u32 = 70;
/// Totals at or above this are `medium`
pub const MEDIUM_THRESHOLD: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityLevel {
    Low,
    Medium,
    High,
}

impl MaturityLevel {
    pub fn from_total(total: u32) -> Self {
        if total >= HIGH_THRESHOLD {
            Self::High
        } else if total >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for MaturityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five behavioral dimensions, each on a 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BehavioralMetrics {
    pub time_management: f64,
    pub content_appropriateness: f64,
    pub social_interaction: f64,
    pub responsibility: f64,
    pub security_awareness: f64,
}

impl BehavioralMetrics {
    /// Same value on every dimension
    pub fn uniform(value: f64) -> Self {
        Self {
            time_management: value,
            content_appropriateness: value,
            social_interaction: value,
            responsibility: value,
            security_awareness: value,
        }
    }

    fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("time_management", self.time_management),
            ("content_appropriateness", self.content_appropriateness),
            ("social_interaction", self.social_interaction),
            ("responsibility", self.responsibility),
            ("security_awareness", self.security_awareness),
        ]
    }

    pub fn validate(&self) -> SafetyResult<()> {
        for (name, value) in self.values() {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(SafetyError::validation(format!(
                    "Behavioral metric {} must be within 0-100, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn average(&self) -> f64 {
        self.values().iter().map(|(_, v)| v).sum::<f64>() / 5.0
    }
}

/// Age 6 scores 0, every year above adds 4, capped at 40 from age 16
pub fn age_component(age: u8) -> u32 {
    ((i32::from(age) - 6) * 4).clamp(0, AGE_COMPONENT_MAX as i32) as u32
}

pub fn parent_component(rating: u8) -> u32 {
    (u32::from(rating) * 6).min(PARENT_COMPONENT_MAX)
}

pub fn behavioral_component(metrics: &BehavioralMetrics) -> u32 {
    let scaled = (metrics.average() * 0.3).round();
    (scaled.max(0.0) as u32).min(BEHAVIORAL_COMPONENT_MAX)
}

/// Persisted maturity score, one per kid account
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaturityScore {
    pub kid_account_id: Uuid,
    pub age_component: u32,
    pub parent_rating: u8,
    pub parent_assessment: u32,
    pub behavioral_component: u32,
    pub metrics: BehavioralMetrics,
    pub total: u32,
    pub level: MaturityLevel,
    pub previous_level: Option<MaturityLevel>,
    pub level_changed_at: Option<DateTime<Utc>>,
    pub assessment_notes: Option<String>,
    pub assessed_by: Option<Uuid>,
    pub assessment_method: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Caller-facing view of a maturity score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaturitySummary {
    pub kid_account_id: Uuid,
    pub total: u32,
    pub level: MaturityLevel,
    pub age_component: u32,
    pub parent_assessment: u32,
    pub behavioral_component: u32,
    pub parent_rating: u8,
    pub previous_level: Option<MaturityLevel>,
    pub level_changed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl From<&MaturityScore> for MaturitySummary {
    fn from(score: &MaturityScore) -> Self {
        Self {
            kid_account_id: score.kid_account_id,
            total: score.total,
            level: score.level,
            age_component: score.age_component,
            parent_assessment: score.parent_assessment,
            behavioral_component: score.behavioral_component,
            parent_rating: score.parent_rating,
            previous_level: score.previous_level,
            level_changed_at: score.level_changed_at,
            last_updated: score.last_updated,
        }
    }
}

/// A level change produced by a recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTransition {
    pub from: MaturityLevel,
    pub to: MaturityLevel,
    pub at: DateTime<Utc>,
}

impl MaturityScore {
    /// Fresh score: no parent rating yet, metrics at their starting value
    pub fn new(kid_account_id: Uuid, age: u8, metrics: BehavioralMetrics, now: DateTime<Utc>) -> Self {
        let mut score = Self {
            kid_account_id,
            age_component: 0,
            parent_rating: 0,
            parent_assessment: 0,
            behavioral_component: 0,
            metrics,
            total: 0,
            level: MaturityLevel::Low,
            previous_level: None,
            level_changed_at: None,
            assessment_notes: None,
            assessed_by: None,
            assessment_method: "automatic".to_string(),
            created_at: now,
            last_updated: now,
        };
        score.recompute(age, now);
        // The initial level is not a transition
        score.previous_level = None;
        score.level_changed_at = None;
        score
    }

    /// Recompute every component, the total and the level together
    pub fn recompute(&mut self, age: u8, now: DateTime<Utc>) -> Option<LevelTransition> {
        self.age_component = age_component(age);
        self.parent_assessment = parent_component(self.parent_rating);
        self.behavioral_component = behavioral_component(&self.metrics);
        self.total = self.age_component + self.parent_assessment + self.behavioral_component;
        self.last_updated = now;

        let level = MaturityLevel::from_total(self.total);
        if level == self.level {
            return None;
        }

        let transition = LevelTransition {
            from: self.level,
            to: level,
            at: now,
        };
        self.previous_level = Some(self.level);
        self.level_changed_at = Some(now);
        self.level = level;
        Some(transition)
    }
}

/// Computes and persists maturity scores
///
/// Callers hold the kid's aggregate lock around every mutating call.
pub struct MaturityEngine {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: MaturityConfig,
}

impl MaturityEngine {
    pub fn new(store: Arc<dyn SafetyStore>, clock: Arc<dyn Clock>, config: MaturityConfig) -> Self {
        Self { store, clock, config }
    }

    /// Stored score, created from the account's age on first access
    pub async fn current(&self, account: &KidAccount) -> SafetyResult<MaturityScore> {
        if let Some(score) = self.store.get_maturity(account.id).await? {
            return Ok(score);
        }

        let score = MaturityScore::new(
            account.id,
            account.age,
            BehavioralMetrics::uniform(self.config.default_behavioral_metric),
            self.clock.now(),
        );
        self.store.put_maturity(&score).await?;
        debug!(kid_account_id = %account.id, total = score.total, level = %score.level, "Created maturity score");
        Ok(score)
    }

    pub async fn current_level(&self, account: &KidAccount) -> SafetyResult<MaturityLevel> {
        Ok(self.current(account).await?.level)
    }

    pub async fn recompute(&self, account: &KidAccount) -> SafetyResult<MaturityScore> {
        let mut score = self.current(account).await?;
        self.persist_recomputed(account, &mut score).await?;
        Ok(score)
    }

    pub async fn apply_parent_assessment(
        &self,
        account: &KidAccount,
        parent_id: Uuid,
        rating: u8,
        notes: Option<String>,
    ) -> SafetyResult<MaturityScore> {
        if rating > MAX_PARENT_RATING {
            return Err(SafetyError::validation(format!(
                "Rating must be between 0 and {}, got {}",
                MAX_PARENT_RATING, rating
            )));
        }

        let mut score = self.current(account).await?;
        score.parent_rating = rating;
        score.assessment_notes = notes;
        score.assessed_by = Some(parent_id);
        score.assessment_method = "manual".to_string();
        self.persist_recomputed(account, &mut score).await?;
        Ok(score)
    }

    pub async fn apply_behavioral_metrics(
        &self,
        account: &KidAccount,
        metrics: BehavioralMetrics,
    ) -> SafetyResult<MaturityScore> {
        metrics.validate()?;

        let mut score = self.current(account).await?;
        score.metrics = metrics;
        self.persist_recomputed(account, &mut score).await?;
        Ok(score)
    }

    async fn persist_recomputed(&self, account: &KidAccount, score: &mut MaturityScore) -> SafetyResult<()> {
        let transition = score.recompute(account.age, self.clock.now());
        self.store.put_maturity(score).await?;

        if let Some(transition) = transition {
            info!(
                kid_account_id = %account.id,
                from = %transition.from,
                to = %transition.to,
                "Maturity level changed"
            );
        }
        debug!(kid_account_id = %account.id, total = score.total, level = %score.level, "Maturity score updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn age_component_is_clamped() {
        assert_eq!(age_component(5), 0);
        assert_eq!(age_component(6), 0);
        assert_eq!(age_component(7), 4);
        assert_eq!(age_component(11), 20);
        assert_eq!(age_component(16), 40);
        assert_eq!(age_component(20), 40);
    }

    #[test]
    fn age_component_matches_formula_over_range() {
        for age in 6u8..=20 {
            let expected = ((i32::from(age) - 6) * 4).clamp(0, 40) as u32;
            assert_eq!(age_component(age), expected, "age {}", age);
        }
    }

    #[test]
    fn parent_component_scales_rating() {
        for rating in 0..=MAX_PARENT_RATING {
            assert_eq!(parent_component(rating), u32::from(rating) * 6);
        }
        assert_eq!(parent_component(5), 30);
    }

    #[test]
    fn behavioral_component_rounds_average() {
        assert_eq!(behavioral_component(&BehavioralMetrics::uniform(100.0)), 30);
        assert_eq!(behavioral_component(&BehavioralMetrics::uniform(0.0)), 0);
        assert_eq!(behavioral_component(&BehavioralMetrics::uniform(50.0)), 15);

        let metrics = BehavioralMetrics {
            time_management: 80.0,
            content_appropriateness: 60.0,
            social_interaction: 70.0,
            responsibility: 90.0,
            security_awareness: 55.0,
        };
        // mean 71 * 0.3 = 21.3
        assert_eq!(behavioral_component(&metrics), 21);
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(MaturityLevel::from_total(0), MaturityLevel::Low);
        assert_eq!(MaturityLevel::from_total(39), MaturityLevel::Low);
        assert_eq!(MaturityLevel::from_total(40), MaturityLevel::Medium);
        assert_eq!(MaturityLevel::from_total(69), MaturityLevel::Medium);
        assert_eq!(MaturityLevel::from_total(70), MaturityLevel::High);
        assert_eq!(MaturityLevel::from_total(100), MaturityLevel::High);
    }

    #[test]
    fn metrics_outside_range_are_rejected() {
        let mut metrics = BehavioralMetrics::uniform(50.0);
        assert!(metrics.validate().is_ok());

        metrics.social_interaction = 101.0;
        assert!(matches!(metrics.validate(), Err(SafetyError::Validation(_))));

        metrics.social_interaction = f64::NAN;
        assert!(metrics.validate().is_err());
    }

    #[test]
    fn new_score_has_no_transition() {
        let score = MaturityScore::new(Uuid::new_v4(), 8, BehavioralMetrics::uniform(50.0), now());
        assert_eq!(score.total, 8 + 15);
        assert_eq!(score.level, MaturityLevel::Low);
        assert!(score.previous_level.is_none());
        assert!(score.level_changed_at.is_none());
    }

    #[test]
    fn total_is_sum_of_components_after_recompute() {
        let mut score = MaturityScore::new(Uuid::new_v4(), 12, BehavioralMetrics::uniform(40.0), now());
        score.parent_rating = 3;
        score.recompute(12, now());
        assert_eq!(
            score.total,
            score.age_component + score.parent_assessment + score.behavioral_component
        );
        assert_eq!(score.total, 24 + 18 + 12);
    }

    #[test]
    fn parent_rating_lifts_sixteen_year_old_to_high() {
        let mut score = MaturityScore::new(Uuid::new_v4(), 16, BehavioralMetrics::uniform(50.0), now());
        assert_eq!(score.total, 55);
        assert_eq!(score.level, MaturityLevel::Medium);

        score.parent_rating = 5;
        let later = now() + chrono::Duration::hours(1);
        let transition = score.recompute(16, later).unwrap();

        assert_eq!(score.total, 85);
        assert_eq!(score.level, MaturityLevel::High);
        assert_eq!(transition.from, MaturityLevel::Medium);
        assert_eq!(transition.to, MaturityLevel::High);
        assert_eq!(score.previous_level, Some(MaturityLevel::Medium));
        assert_eq!(score.level_changed_at, Some(later));
    }

    #[test]
    fn unchanged_level_keeps_transition_history() {
        let mut score = MaturityScore::new(Uuid::new_v4(), 16, BehavioralMetrics::uniform(50.0), now());
        score.parent_rating = 5;
        score.recompute(16, now());
        let changed_at = score.level_changed_at;
        assert!(changed_at.is_some());

        score.parent_rating = 4;
        assert!(score.recompute(16, now() + chrono::Duration::days(1)).is_none());
        assert_eq!(score.level, MaturityLevel::High);
        assert_eq!(score.level_changed_at, changed_at);
    }

    #[test]
    fn level_can_drop() {
        let mut score = MaturityScore::new(Uuid::new_v4(), 14, BehavioralMetrics::uniform(60.0), now());
        assert_eq!(score.level, MaturityLevel::Medium);

        score.metrics = BehavioralMetrics::uniform(0.0);
        let transition = score.recompute(14, now()).unwrap();
        assert_eq!(transition.from, MaturityLevel::Medium);
        assert_eq!(transition.to, MaturityLevel::Low);
    }
}
