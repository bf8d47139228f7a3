//! Core data types for the personalization core
//!
//! Defines articles, user preference profiles, feedback records and the
//! fixed-width style vectors shared by articles and users.

use crate::error::{FeedError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Index;
use std::str::FromStr;
use uuid::Uuid;

/// Number of stylistic dimensions in every feature and preference vector
pub const DIMENSIONS: usize = 11;

/// Opaque article identifier assigned by the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub String);

impl ArticleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ArticleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An 11-dimensional style vector on the 1-5 label scale
///
/// Articles carry one as their feature vector; users carry one as their
/// preference vector. The two are directly comparable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleVector([f64; DIMENSIONS]);

impl StyleVector {
    pub const fn new(values: [f64; DIMENSIONS]) -> Self {
        Self(values)
    }

    /// Build from a slice, rejecting anything that is not exactly 11 wide
    pub fn try_from_slice(values: &[f64]) -> Result<Self> {
        let array: [f64; DIMENSIONS] =
            values
                .try_into()
                .map_err(|_| FeedError::DimensionMismatch {
                    expected: DIMENSIONS,
                    actual: values.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn values(&self) -> [f64; DIMENSIONS] {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    pub fn euclidean_distance(&self, other: &StyleVector) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Cosine distance in [0, 2]; a zero vector is treated as maximally distant
    pub fn cosine_distance(&self, other: &StyleVector) -> f64 {
        let dot: f64 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let norm_a = self.0.iter().map(|a| a * a).sum::<f64>().sqrt();
        let norm_b = other.0.iter().map(|b| b * b).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 2.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Index<usize> for StyleVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl TryFrom<Vec<f64>> for StyleVector {
    type Error = FeedError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::try_from_slice(&values)
    }
}

/// One of the four archetypal taste profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    DataDrivenAnalyst,
    EngagingStoryteller,
    CriticalThinker,
    BalancedEvaluator,
}

impl Persona {
    /// All personas in centroid-table order
    pub const ALL: [Persona; 4] = [
        Persona::DataDrivenAnalyst,
        Persona::EngagingStoryteller,
        Persona::CriticalThinker,
        Persona::BalancedEvaluator,
    ];

    /// Row of this persona in the centroid table
    pub fn index(&self) -> usize {
        match self {
            Persona::DataDrivenAnalyst => 0,
            Persona::EngagingStoryteller => 1,
            Persona::CriticalThinker => 2,
            Persona::BalancedEvaluator => 3,
        }
    }

    /// Human-facing label, also the persona collection name
    pub fn label(&self) -> &'static str {
        match self {
            Persona::DataDrivenAnalyst => "Data-Driven Analyst",
            Persona::EngagingStoryteller => "Engaging Storyteller",
            Persona::CriticalThinker => "Critical Thinker",
            Persona::BalancedEvaluator => "Balanced Evaluator",
        }
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            Persona::DataDrivenAnalyst => "data_driven_analyst",
            Persona::EngagingStoryteller => "engaging_storyteller",
            Persona::CriticalThinker => "critical_thinker",
            Persona::BalancedEvaluator => "balanced_evaluator",
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Persona {
    type Err = FeedError;

    /// Accepts the display label (any case) or the snake_case key
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Persona::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(trimmed) || p.as_key() == trimmed)
            .ok_or_else(|| FeedError::InvalidPersona(s.to_string()))
    }
}

/// Ternary feedback signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum FeedbackScore {
    Reject,
    Neutral,
    Accept,
}

impl FeedbackScore {
    pub fn value(&self) -> i64 {
        match self {
            FeedbackScore::Reject => -1,
            FeedbackScore::Neutral => 0,
            FeedbackScore::Accept => 1,
        }
    }
}

impl TryFrom<i64> for FeedbackScore {
    type Error = FeedError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(FeedbackScore::Reject),
            0 => Ok(FeedbackScore::Neutral),
            1 => Ok(FeedbackScore::Accept),
            other => Err(FeedError::InvalidScore(other)),
        }
    }
}

impl From<FeedbackScore> for i64 {
    fn from(score: FeedbackScore) -> i64 {
        score.value()
    }
}

impl std::fmt::Display for FeedbackScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Which feature or page produced a piece of feedback
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeedbackContext {
    Curated,
    LatestNews,
    NewsByDate,
    Random,
    Popular,
    Other(String),
}

impl FeedbackContext {
    pub fn as_str(&self) -> &str {
        match self {
            FeedbackContext::Curated => "curated",
            FeedbackContext::LatestNews => "latest_news",
            FeedbackContext::NewsByDate => "news_by_date",
            FeedbackContext::Random => "random",
            FeedbackContext::Popular => "popular",
            FeedbackContext::Other(tag) => tag,
        }
    }
}

impl From<String> for FeedbackContext {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "curated" => FeedbackContext::Curated,
            "latest_news" => FeedbackContext::LatestNews,
            "news_by_date" => FeedbackContext::NewsByDate,
            "random" => FeedbackContext::Random,
            "popular" => FeedbackContext::Popular,
            _ => FeedbackContext::Other(tag),
        }
    }
}

impl From<&str> for FeedbackContext {
    fn from(tag: &str) -> Self {
        FeedbackContext::from(tag.to_string())
    }
}

impl From<FeedbackContext> for String {
    fn from(context: FeedbackContext) -> String {
        context.as_str().to_string()
    }
}

impl std::fmt::Display for FeedbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An article as the core sees it; owned by the document store, read-only here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Produced offline by the labeling pipeline
    #[serde(default)]
    pub feature_vector: Option<StyleVector>,
}

impl Article {
    pub fn new(id: impl Into<ArticleId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: None,
            published_at: None,
            feature_vector: None,
        }
    }

    pub fn with_vector(mut self, vector: StyleVector) -> Self {
        self.feature_vector = Some(vector);
        self
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// Per-user preference state
///
/// `vector` is absent only while `feedback_count == 0`; once present it is
/// always 11 wide, which `StyleVector` guarantees by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub persona: Option<Persona>,
    pub vector: Option<StyleVector>,
    pub feedback_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            persona: None,
            vector: None,
            feedback_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Exclusion-history entry: this user has rated this article in this context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub user: String,
    pub article_id: ArticleId,
    pub context: FeedbackContext,
    pub created_at: DateTime<Utc>,
}

/// A scored rating with optional free-text comment, used for popularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub submission_id: Uuid,
    pub user: String,
    pub article_id: ArticleId,
    pub score: FeedbackScore,
    pub comment: Option<String>,
    pub context: FeedbackContext,
    pub created_at: DateTime<Utc>,
}

/// Inclusive publication-time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The whole UTC calendar day
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::days(1) - chrono::Duration::nanoseconds(1);
        Self { start, end }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        *at >= self.start && *at <= self.end
    }
}
