//! Content and user safety scoring
//!
//! Scoring engines are external collaborators behind async traits; the
//! built-in implementations are keyword heuristics good enough for
//! deployments without a moderation backend.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SafetyResult;
use crate::safety::workflow::RequestType;

/// Upper bound on a single category's penalty
pub const MAX_CATEGORY_PENALTY: f64 = 0.3;
pub const MAX_CONTENT_LENGTH: usize = 10_000;
pub const EDUCATIONAL_THRESHOLD: f64 = 0.3;
/// Score assigned to media that passed the extension check
pub const MEDIA_SCORE: f64 = 0.9;

const INAPPROPRIATE_PATTERNS: &[(ContentCategory, &[&str])] = &[
    (
        ContentCategory::Violence,
        &["fight", "hurt", "weapon", "blood", "violent", "attack", "kill", "death", "war"],
    ),
    (
        ContentCategory::MatureThemes,
        &["adult", "mature", "inappropriate", "explicit", "sexual", "drug", "alcohol", "smoking"],
    ),
    (
        ContentCategory::NegativeBehavior,
        &["bully", "hate", "cruel", "mean", "nasty", "rude", "disrespect", "harassment"],
    ),
    (
        ContentCategory::FearInducing,
        &["scary", "terrifying", "nightmare", "horror", "frightening", "creepy", "disturbing"],
    ),
];

const EDUCATIONAL_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "science",
        &["experiment", "discovery", "research", "hypothesis", "theory", "biology", "chemistry", "physics", "astronomy", "nature"],
    ),
    (
        "math",
        &["calculate", "equation", "formula", "geometry", "algebra", "statistics", "problem solving", "mathematics", "numbers"],
    ),
    (
        "history",
        &["historical", "ancient", "civilization", "timeline", "events", "culture", "heritage", "archaeology", "museum"],
    ),
    (
        "literature",
        &["reading", "story", "book", "author", "poetry", "writing", "creative", "imagination", "narrative"],
    ),
    (
        "art",
        &["creative", "drawing", "painting", "sculpture", "design", "artistic", "gallery", "museum", "expression"],
    ),
    (
        "technology",
        &["coding", "programming", "computer", "digital", "innovation", "engineering", "robotics", "science"],
    ),
    (
        "language",
        &["vocabulary", "grammar", "communication", "translation", "linguistics", "speaking", "writing"],
    ),
    (
        "geography",
        &["countries", "maps", "continents", "climate", "environment", "travel", "exploration", "world"],
    ),
];

const UNSAFE_MEDIA_EXTENSIONS: &[&str] = &[".exe", ".zip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Violence,
    MatureThemes,
    NegativeBehavior,
    FearInducing,
}

impl ContentCategory {
    /// Younger kids weigh each category more heavily
    pub fn weight(&self, age: u8) -> f64 {
        match self {
            Self::Violence if age < 10 => 2.0,
            Self::Violence if age < 13 => 1.5,
            Self::Violence => 1.0,
            Self::MatureThemes if age < 13 => 2.0,
            Self::MatureThemes if age < 16 => 1.5,
            Self::MatureThemes => 1.0,
            Self::NegativeBehavior if age < 8 => 1.8,
            Self::NegativeBehavior => 1.2,
            Self::FearInducing if age < 10 => 2.0,
            Self::FearInducing => 1.3,
        }
    }
}

/// Scores arbitrary content for a kid of a given age
#[async_trait]
pub trait ContentSafetyScorer: Send + Sync {
    /// Safety score in [0, 1]; empty content scores 1.0
    async fn content_safety_score(&self, content: &str, kid_age: u8, media_urls: &[String]) -> SafetyResult<f64>;

    async fn is_educational(&self, content: &str, kid_age: u8) -> SafetyResult<bool>;
}

/// Keyword and heuristic scorer
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordContentScorer;

impl KeywordContentScorer {
    fn category_penalty(content_lower: &str, kid_age: u8) -> f64 {
        INAPPROPRIATE_PATTERNS
            .iter()
            .map(|(category, keywords)| {
                let matches = keywords.iter().filter(|k| content_lower.contains(*k)).count();
                (matches as f64 * 0.1 * category.weight(kid_age)).min(MAX_CATEGORY_PENALTY)
            })
            .sum()
    }

    /// 0.1 per educational keyword hit, capped at 1.0
    pub fn educational_score(content: &str) -> f64 {
        let lower = content.to_lowercase();
        let hits = EDUCATIONAL_KEYWORDS
            .iter()
            .flat_map(|(_, keywords)| keywords.iter())
            .filter(|k| lower.contains(*k))
            .count();
        (hits as f64 * 0.1).min(1.0)
    }

    /// Richer educational value estimate used for the educational-only gate
    pub fn educational_value(content: &str) -> f64 {
        if content.trim().is_empty() {
            return 0.0;
        }
        let lower = content.to_lowercase();

        let mut score: f64 = EDUCATIONAL_KEYWORDS
            .iter()
            .map(|(_, keywords)| keywords.iter().filter(|k| lower.contains(*k)).count() as f64 * 0.1)
            .sum();

        if content.contains('?') {
            score += 0.1;
        }
        if content
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()))
        {
            score += 0.05;
        }
        let length = content.chars().count();
        if length > 100 && length < 1000 {
            score += 0.05;
        }

        score.clamp(0.0, 1.0)
    }

    fn age_penalty(content: &str, kid_age: u8) -> f64 {
        let words: Vec<&str> = content.split_whitespace().collect();
        let mut penalty = 0.0;

        if !words.is_empty() {
            let average = words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
            if kid_age < 8 && average > 6.0 {
                penalty += 0.1;
            } else if kid_age < 12 && average > 8.0 {
                penalty += 0.05;
            }
        }

        if kid_age < 10 && content.chars().count() > 500 {
            penalty += 0.05;
        }
        penalty
    }

    fn length_penalty(content: &str) -> f64 {
        let length = content.chars().count();
        if length > MAX_CONTENT_LENGTH {
            0.2
        } else if length < 10 {
            0.1
        } else {
            0.0
        }
    }

    fn media_score(media_urls: &[String]) -> f64 {
        let unsafe_media = media_urls.iter().any(|url| {
            let lower = url.to_lowercase();
            UNSAFE_MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        });
        if unsafe_media { 0.0 } else { MEDIA_SCORE }
    }

    pub fn score(content: &str, kid_age: u8, media_urls: &[String]) -> f64 {
        if content.trim().is_empty() {
            return 1.0;
        }
        let lower = content.to_lowercase();

        let mut score = 1.0 - Self::category_penalty(&lower, kid_age);

        let educational = Self::educational_score(content);
        if educational > 0.5 {
            score += (educational - 0.5) * 0.2;
        }

        score -= Self::age_penalty(content, kid_age);
        score -= Self::length_penalty(content);

        if !media_urls.is_empty() {
            score = score.min(Self::media_score(media_urls));
        }

        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl ContentSafetyScorer for KeywordContentScorer {
    async fn content_safety_score(&self, content: &str, kid_age: u8, media_urls: &[String]) -> SafetyResult<f64> {
        Ok(Self::score(content, kid_age, media_urls))
    }

    async fn is_educational(&self, content: &str, _kid_age: u8) -> SafetyResult<bool> {
        Ok(Self::educational_value(content) > EDUCATIONAL_THRESHOLD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub is_verified: bool,
}

/// Platform user lookup
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_profile(&self, user_id: Uuid) -> SafetyResult<Option<UserProfile>>;

    /// Whether `user_id` is inside the parent's trusted network
    async fn is_in_parent_network(&self, parent_id: Uuid, user_id: Uuid) -> SafetyResult<bool>;
}

/// Request safety score for a target user
///
/// Unknown users score 0.0. Known users start at 0.5 and gain for being in
/// the parent's network or verified, then shift by request type.
pub fn request_safety_score(profile: Option<&UserProfile>, in_parent_network: bool, request_type: RequestType) -> f64 {
    let Some(profile) = profile else {
        return 0.0;
    };

    let mut score = 0.5;
    if in_parent_network {
        score += 0.3;
    }
    if profile.is_verified {
        score += 0.2;
    }
    score += request_type.safety_adjustment();
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
    networks: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: Uuid, is_verified: bool) {
        self.profiles
            .write()
            .await
            .insert(user_id, UserProfile { user_id, is_verified });
    }

    pub async fn add_to_parent_network(&self, parent_id: Uuid, user_id: Uuid) {
        self.networks.write().await.entry(parent_id).or_default().insert(user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn user_profile(&self, user_id: Uuid) -> SafetyResult<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(&user_id).copied())
    }

    async fn is_in_parent_network(&self, parent_id: Uuid, user_id: Uuid) -> SafetyResult<bool> {
        Ok(self
            .networks
            .read()
            .await
            .get(&parent_id)
            .is_some_and(|members| members.contains(&user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALM: &str = "We went to the park and fed the ducks with our grandma today";

    #[test]
    fn empty_content_is_safe() {
        assert_eq!(KeywordContentScorer::score("", 6, &[]), 1.0);
        assert_eq!(KeywordContentScorer::score("   ", 6, &[]), 1.0);
    }

    #[test]
    fn calm_content_scores_full() {
        assert_eq!(KeywordContentScorer::score(CALM, 12, &[]), 1.0);
    }

    #[test]
    fn violence_weighs_more_for_younger_kids() {
        let text = "The knights started a fight with a weapon in the castle yard";
        let young = KeywordContentScorer::score(text, 8, &[]);
        let teen = KeywordContentScorer::score(text, 15, &[]);
        assert!(young < teen);
        // two hits: 2 * 0.1 * 2.0 capped at 0.3, and 2 * 0.1 * 1.0
        assert!((young - 0.7).abs() < 1e-9);
        assert!((teen - 0.8).abs() < 1e-9);
    }

    #[test]
    fn category_penalty_is_capped() {
        let text = "fight hurt weapon blood violent attack kill death war everywhere";
        let score = KeywordContentScorer::score(text, 16, &[]);
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn short_content_is_penalised() {
        assert!((KeywordContentScorer::score("hi there", 14, &[]) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn media_caps_score() {
        let media = vec!["https://cdn.example/pic.png".to_string()];
        assert!((KeywordContentScorer::score(CALM, 12, &media) - MEDIA_SCORE).abs() < 1e-9);

        let archive = vec!["https://cdn.example/setup.EXE".to_string()];
        assert_eq!(KeywordContentScorer::score(CALM, 12, &archive), 0.0);
    }

    #[test]
    fn score_stays_in_unit_range() {
        let text = "scary horror nightmare fight kill war drug alcohol bully hate ".repeat(2000);
        let score = KeywordContentScorer::score(&text, 5, &[]);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn educational_content_is_detected() {
        assert!(KeywordContentScorer::educational_value(
            "Can you calculate the answer to this geometry equation? It has 3 sides."
        ) > EDUCATIONAL_THRESHOLD);
        assert!(KeywordContentScorer::educational_value(CALM) <= EDUCATIONAL_THRESHOLD);
    }

    #[test]
    fn request_score_components() {
        let user = Uuid::new_v4();
        let verified = UserProfile { user_id: user, is_verified: true };
        let unverified = UserProfile { user_id: user, is_verified: false };

        assert_eq!(request_safety_score(None, true, RequestType::Follow), 0.0);
        assert!((request_safety_score(Some(&unverified), false, RequestType::Message) - 0.4).abs() < 1e-9);
        assert!((request_safety_score(Some(&unverified), true, RequestType::GroupJoin) - 0.85).abs() < 1e-9);
        assert_eq!(request_safety_score(Some(&verified), true, RequestType::Follow), 1.0);
    }

    #[tokio::test]
    async fn directory_tracks_networks_per_parent() {
        let directory = InMemoryUserDirectory::new();
        let parent = Uuid::new_v4();
        let friend = Uuid::new_v4();
        directory.add_user(friend, true).await;
        directory.add_to_parent_network(parent, friend).await;

        assert!(directory.is_in_parent_network(parent, friend).await.unwrap());
        assert!(!directory.is_in_parent_network(Uuid::new_v4(), friend).await.unwrap());
        assert!(directory.user_profile(friend).await.unwrap().unwrap().is_verified);
        assert!(directory.user_profile(Uuid::new_v4()).await.unwrap().is_none());
    }
}
