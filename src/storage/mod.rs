//! Storage layer for the personalization core
//!
//! The core never owns articles or users; it talks to them through the
//! traits below. Two backends implement all of them:
//!
//! - [`memory::MemoryStore`]: process-local maps, used by tests and demos
//! - [`libsql::LibsqlStore`]: libSQL file database with a native vector column

pub mod libsql;
pub mod memory;
pub mod schema;

use crate::error::Result;
use crate::types::{
    Article, ArticleId, DateRange, FeedbackContext, Persona, RatingRecord, StyleVector,
    UserProfile,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Distance used to order similarity results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    Euclidean,
}

impl SimilarityMetric {
    pub fn distance(&self, a: &StyleVector, b: &StyleVector) -> f64 {
        match self {
            SimilarityMetric::Cosine => a.cosine_distance(b),
            SimilarityMetric::Euclidean => a.euclidean_distance(b),
        }
    }
}

/// An article together with its distance from a query vector
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredArticle {
    pub article: Article,
    pub distance: f64,
}

/// Keyed read/write access to user preference state
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert a new profile; `AlreadyExists` if the username is taken
    async fn create_profile(&self, profile: &UserProfile) -> Result<()>;

    /// Fetch a profile, `None` if the user has no record
    async fn get_profile(&self, username: &str) -> Result<Option<UserProfile>>;

    /// Store the persona label
    async fn set_persona(&self, username: &str, persona: Persona) -> Result<()>;

    /// Write a new vector and count if the stored count still equals `expected_count`
    ///
    /// Fails with `ConcurrentUpdate` when another writer got there first and
    /// with `UserNotFound` when the record is gone.
    async fn store_vector(
        &self,
        username: &str,
        vector: &StyleVector,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()>;

    /// Put back an earlier vector (possibly none) and count, guarded like `store_vector`
    ///
    /// Undoes a `store_vector` whose feedback could not be completed.
    async fn restore_vector(
        &self,
        username: &str,
        vector: Option<&StyleVector>,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()>;
}

/// Append-mostly record of which user rated which article where
#[async_trait]
pub trait FeedbackLedger: Send + Sync {
    /// Insert the triple unless it already exists; returns whether a row was added
    async fn record(
        &self,
        user: &str,
        article_id: &ArticleId,
        context: &FeedbackContext,
    ) -> Result<bool>;

    /// Article ids the user has feedback for, optionally limited to one context
    async fn list_article_ids(
        &self,
        user: &str,
        context: Option<&FeedbackContext>,
    ) -> Result<Vec<ArticleId>>;

    /// Every article the user has rated in any context
    async fn excluded_articles(&self, user: &str) -> Result<HashSet<ArticleId>> {
        Ok(self.list_article_ids(user, None).await?.into_iter().collect())
    }
}

/// Read access to the article corpus and persona collections
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert or replace an article in the corpus
    async fn upsert_article(&self, article: &Article) -> Result<()>;

    /// Append an article to a named collection (no-op if already a member)
    async fn add_to_collection(&self, collection: &str, article_id: &ArticleId) -> Result<()>;

    async fn get_article(&self, id: &ArticleId) -> Result<Option<Article>>;

    async fn count_articles(&self) -> Result<usize>;

    /// One page of a collection, minus `exclude`
    ///
    /// Insertion order, or newest first when a date range is given.
    async fn collection_page(
        &self,
        collection: &str,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>>;

    /// The `candidates` nearest vectorized articles, ordered by (distance, id)
    async fn nearest(
        &self,
        query: &StyleVector,
        metric: SimilarityMetric,
        candidates: usize,
    ) -> Result<Vec<ScoredArticle>>;

    /// Corpus page newest first (ties by id), minus `exclude`
    async fn latest(
        &self,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>>;

    /// Up to `limit` articles sampled uniformly without replacement, minus `exclude`
    async fn random_sample(
        &self,
        exclude: &HashSet<ArticleId>,
        limit: usize,
    ) -> Result<Vec<Article>>;
}

/// Log of scored ratings, source of the popularity ranking
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Append a rating; `AlreadyExists` if the submission id was seen before
    async fn append_rating(&self, rating: &RatingRecord) -> Result<()>;

    /// Drop a rating by submission id; returns whether one was removed
    async fn remove_rating(&self, submission_id: &Uuid) -> Result<bool>;

    async fn ratings_for_user(&self, user: &str) -> Result<Vec<RatingRecord>>;

    /// Articles by summed score, highest first, ties by id
    async fn top_rated(&self, limit: usize) -> Result<Vec<(ArticleId, i64)>>;
}
