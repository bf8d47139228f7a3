//! Feed service facade
//!
//! The operations a presentation layer calls: register users, pick personas,
//! submit feedback and ratings, page through the personalized feed and read
//! the plain feeds. Preference updates are serialized per user; pagination
//! cursors live here, one per user, and are handed to the orchestrator
//! explicitly for each call.

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::learning::{EmbeddingUpdateEngine, NoiseSource, UpdateOutcome};
use crate::personas::{CollectionRegistry, PersonaCentroidTable};
use crate::retrieval::{
    ArticleRetriever, FeedCatalog, PageOutcome, PaginationCursor, RetrievalOrchestrator,
};
use crate::storage::{ArticleStore, FeedbackLedger, ProfileStore, RatingStore};
use crate::types::{
    Article, ArticleId, DateRange, FeedbackContext, FeedbackScore, Persona, RatingRecord,
    StyleVector, UserProfile,
};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handles to the four backing stores
#[derive(Clone)]
pub struct FeedStores {
    pub profiles: Arc<dyn ProfileStore>,
    pub ledger: Arc<dyn FeedbackLedger>,
    pub articles: Arc<dyn ArticleStore>,
    pub ratings: Arc<dyn RatingStore>,
}

impl FeedStores {
    /// Use one backend for every store
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ProfileStore + FeedbackLedger + ArticleStore + RatingStore + 'static,
    {
        Self {
            profiles: store.clone(),
            ledger: store.clone(),
            articles: store.clone(),
            ratings: store,
        }
    }
}

/// Per-user lock entries live only while a task holds or waits on them.
/// Cursors stay until `close_feed`, so the cursor table is bounded by the
/// number of users with an open feed.
pub struct FeedService {
    stores: FeedStores,
    engine: EmbeddingUpdateEngine,
    orchestrator: RetrievalOrchestrator,
    catalog: FeedCatalog,
    collections: Arc<CollectionRegistry>,
    config: FeedConfig,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cursors: Mutex<HashMap<String, PaginationCursor>>,
}

impl FeedService {
    /// Build with default centroids and collections
    pub fn new(stores: FeedStores, config: FeedConfig) -> Result<Self> {
        config.validate()?;
        let centroids = Arc::new(PersonaCentroidTable::default());
        let engine = EmbeddingUpdateEngine::new(centroids, config.learning.clone());
        Ok(Self::assemble(
            stores,
            config,
            engine,
            Arc::new(CollectionRegistry::default()),
        ))
    }

    /// Build with explicit reference data and noise source
    pub fn with_parts(
        stores: FeedStores,
        config: FeedConfig,
        centroids: Arc<PersonaCentroidTable>,
        collections: Arc<CollectionRegistry>,
        noise: Box<dyn NoiseSource>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = EmbeddingUpdateEngine::with_noise(centroids, config.learning.clone(), noise);
        Ok(Self::assemble(stores, config, engine, collections))
    }

    fn assemble(
        stores: FeedStores,
        config: FeedConfig,
        engine: EmbeddingUpdateEngine,
        collections: Arc<CollectionRegistry>,
    ) -> Self {
        let retriever = ArticleRetriever::new(
            stores.articles.clone(),
            collections.clone(),
            config.retrieval.clone(),
        );
        let orchestrator =
            RetrievalOrchestrator::new(retriever, stores.profiles.clone(), stores.ledger.clone());
        let catalog = FeedCatalog::new(
            stores.articles.clone(),
            stores.ledger.clone(),
            stores.ratings.clone(),
        );
        Self {
            stores,
            engine,
            orchestrator,
            catalog,
            collections,
            config,
            user_locks: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn stores(&self) -> &FeedStores {
        &self.stores
    }

    fn user_lock(&self, user: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|e| FeedError::Other(format!("User lock table poisoned: {}", e)))?;
        Ok(locks.entry(user.to_string()).or_default().clone())
    }

    /// Drop the table entry once no other task holds or waits on its lock
    fn release_lock(&self, user: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.user_locks.lock() else {
            warn!("User lock table poisoned; keeping entry for {}", user);
            return;
        };
        // Clones are taken and released only under the table lock
        drop(lock);
        if locks
            .get(user)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(user);
        }
    }

    fn take_cursor(&self, user: &str) -> Result<Option<PaginationCursor>> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|e| FeedError::Other(format!("Cursor table poisoned: {}", e)))?;
        Ok(cursors.remove(user))
    }

    fn put_cursor(&self, cursor: PaginationCursor) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|e| FeedError::Other(format!("Cursor table poisoned: {}", e)))?;
        cursors.insert(cursor.user.clone(), cursor);
        Ok(())
    }

    async fn load_profile(&self, user: &str) -> Result<UserProfile> {
        self.stores
            .profiles
            .get_profile(user)
            .await?
            .ok_or_else(|| FeedError::UserNotFound(user.to_string()))
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create an empty profile: no persona, no vector, count 0
    pub async fn register_user(&self, username: &str) -> Result<UserProfile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FeedError::Other("Username must not be empty".to_string()));
        }
        let profile = UserProfile::new(username);
        self.stores.profiles.create_profile(&profile).await?;
        info!("Registered user {}", username);
        Ok(profile)
    }

    pub async fn profile(&self, username: &str) -> Result<UserProfile> {
        self.load_profile(username).await
    }

    /// Store the persona; seeds an absent vector with its centroid when configured
    pub async fn select_persona(&self, username: &str, persona: Persona) -> Result<UserProfile> {
        let lock = self.user_lock(username)?;
        let result = {
            let _guard = lock.lock().await;
            self.store_persona(username, persona).await
        };
        self.release_lock(username, lock);
        result
    }

    async fn store_persona(&self, username: &str, persona: Persona) -> Result<UserProfile> {
        let profile = self.load_profile(username).await?;
        self.stores.profiles.set_persona(username, persona).await?;

        if self.config.learning.seed_with_centroid && profile.vector.is_none() {
            let centroid = self.engine.centroids().centroid(persona);
            self.stores
                .profiles
                .store_vector(
                    username,
                    centroid,
                    profile.feedback_count,
                    profile.feedback_count,
                )
                .await?;
            debug!("Seeded {} with the {} centroid", username, persona);
        }
        info!("User {} selected persona {}", username, persona);
        self.load_profile(username).await
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Apply one score to the user's vector, then record it in the ledger
    pub async fn submit_feedback(
        &self,
        username: &str,
        article_id: &ArticleId,
        article_vector: &[f64],
        score: FeedbackScore,
        context: FeedbackContext,
    ) -> Result<UpdateOutcome> {
        let article = StyleVector::try_from_slice(article_vector)?;
        self.apply_feedback(username, article_id, &article, score, &context, None)
            .await
    }

    /// Serialize one feedback submission behind the user's lock
    async fn apply_feedback(
        &self,
        username: &str,
        article_id: &ArticleId,
        article: &StyleVector,
        score: FeedbackScore,
        context: &FeedbackContext,
        rating: Option<&RatingRecord>,
    ) -> Result<UpdateOutcome> {
        let lock = self.user_lock(username)?;
        let result = {
            let _guard = lock.lock().await;
            self.write_feedback(username, article_id, article, score, context, rating)
                .await
        };
        self.release_lock(username, lock);
        result
    }

    /// Vector (CAS), then rating, then ledger entry
    ///
    /// A failed step undoes the writes before it, so an `Err` leaves the
    /// stores as they were.
    async fn write_feedback(
        &self,
        username: &str,
        article_id: &ArticleId,
        article: &StyleVector,
        score: FeedbackScore,
        context: &FeedbackContext,
        rating: Option<&RatingRecord>,
    ) -> Result<UpdateOutcome> {
        let profile = self.load_profile(username).await?;
        let outcome = self.engine.apply(
            profile.vector.as_ref(),
            article,
            score,
            profile.feedback_count,
            profile.persona,
        )?;

        self.stores
            .profiles
            .store_vector(
                username,
                &outcome.vector,
                outcome.feedback_count,
                profile.feedback_count,
            )
            .await
            .map_err(|e| {
                warn!("Failed to persist vector for {}: {}", username, e);
                e
            })?;

        if let Some(rating) = rating {
            if let Err(e) = self.stores.ratings.append_rating(rating).await {
                warn!("Failed to log rating {} from {}: {}", rating.submission_id, username, e);
                self.undo_vector(username, &profile, outcome.feedback_count)
                    .await;
                return Err(e);
            }
        }

        if let Err(e) = self.stores.ledger.record(username, article_id, context).await {
            warn!("Failed to record feedback from {} on {}: {}", username, article_id, e);
            if let Some(rating) = rating {
                self.undo_rating(rating).await;
            }
            self.undo_vector(username, &profile, outcome.feedback_count)
                .await;
            return Err(e);
        }

        info!(
            "Feedback {} from {} on {} ({}): {} update, count {} -> {}",
            score,
            username,
            article_id,
            context,
            outcome.regime,
            profile.feedback_count,
            outcome.feedback_count
        );
        Ok(outcome)
    }

    async fn undo_vector(&self, username: &str, previous: &UserProfile, written_count: u64) {
        match self
            .stores
            .profiles
            .restore_vector(
                username,
                previous.vector.as_ref(),
                previous.feedback_count,
                written_count,
            )
            .await
        {
            Ok(()) => debug!(
                "Rolled {} back to count {}",
                username, previous.feedback_count
            ),
            Err(e) => error!("Failed to roll back vector for {}: {}", username, e),
        }
    }

    async fn undo_rating(&self, rating: &RatingRecord) {
        if let Err(e) = self.stores.ratings.remove_rating(&rating.submission_id).await {
            error!("Failed to remove rating {}: {}", rating.submission_id, e);
        }
    }

    /// Feedback on a stored article, using its stored feature vector
    pub async fn submit_article_feedback(
        &self,
        username: &str,
        article_id: &ArticleId,
        score: FeedbackScore,
        context: FeedbackContext,
    ) -> Result<UpdateOutcome> {
        let vector = self.article_vector(article_id).await?;
        self.apply_feedback(username, article_id, &vector, score, &context, None)
            .await
    }

    async fn article_vector(&self, article_id: &ArticleId) -> Result<StyleVector> {
        let article = self
            .stores
            .articles
            .get_article(article_id)
            .await?
            .ok_or_else(|| FeedError::ArticleNotFound(article_id.to_string()))?;
        article.feature_vector.ok_or(FeedError::DimensionMismatch {
            expected: crate::types::DIMENSIONS,
            actual: 0,
        })
    }

    /// Apply a rating as feedback and log it in the rating store
    ///
    /// Comments are kept only on rejections. A repeated `submission_id`
    /// fails with `AlreadyExists` and changes nothing.
    pub async fn submit_rating(
        &self,
        username: &str,
        article_id: &ArticleId,
        score: FeedbackScore,
        comment: Option<String>,
        context: FeedbackContext,
        submission_id: Option<Uuid>,
    ) -> Result<UpdateOutcome> {
        let vector = self.article_vector(article_id).await?;

        let comment = match score {
            FeedbackScore::Reject => comment.filter(|c| !c.trim().is_empty()),
            _ => None,
        };
        let rating = RatingRecord {
            submission_id: submission_id.unwrap_or_else(Uuid::new_v4),
            user: username.to_string(),
            article_id: article_id.clone(),
            score,
            comment,
            context: context.clone(),
            created_at: Utc::now(),
        };
        let outcome = self
            .apply_feedback(username, article_id, &vector, score, &context, Some(&rating))
            .await?;
        debug!("Logged rating {} from {}", rating.submission_id, username);
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Personalized feed
    // ------------------------------------------------------------------

    /// First page on the first call, the next page afterwards
    pub async fn get_next_page(&self, username: &str, limit: usize) -> Result<PageOutcome> {
        match self.take_cursor(username)? {
            None => {
                let (cursor, outcome) = self.orchestrator.initial_page(username, limit).await?;
                self.put_cursor(cursor)?;
                Ok(outcome)
            }
            Some(mut cursor) => {
                let result = self.orchestrator.next_page(&mut cursor, limit).await;
                self.put_cursor(cursor)?;
                result
            }
        }
    }

    /// Drop fetched state and re-snapshot the user's profile and exclusions
    pub async fn refresh(&self, username: &str) -> Result<()> {
        match self.take_cursor(username)? {
            Some(mut cursor) => {
                let result = self.orchestrator.refresh(&mut cursor).await;
                self.put_cursor(cursor)?;
                result
            }
            None => {
                let cursor = self.orchestrator.open(username, None).await?;
                self.put_cursor(cursor)
            }
        }
    }

    /// Start a fresh feed, optionally limited to a publication window
    ///
    /// Replaces any open cursor; the next `get_next_page` returns its first
    /// page. `refresh` keeps the window.
    pub async fn open_feed(&self, username: &str, date_range: Option<DateRange>) -> Result<()> {
        let cursor = self.orchestrator.open(username, date_range).await?;
        self.put_cursor(cursor)
    }

    /// Forget the user's cursor; returns whether one was open
    pub fn close_feed(&self, username: &str) -> Result<bool> {
        Ok(self.take_cursor(username)?.is_some())
    }

    /// Snapshot of the user's cursor, if a feed is open
    pub fn cursor(&self, username: &str) -> Result<Option<PaginationCursor>> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|e| FeedError::Other(format!("Cursor table poisoned: {}", e)))?;
        Ok(cursors.get(username).cloned())
    }

    // ------------------------------------------------------------------
    // Corpus and plain feeds
    // ------------------------------------------------------------------

    /// Add an article to the corpus and, optionally, to a persona's collection
    pub async fn add_article(&self, article: &Article, persona: Option<Persona>) -> Result<()> {
        self.stores.articles.upsert_article(article).await?;
        if let Some(persona) = persona {
            let collection = self.collections.collection_for(persona);
            self.stores
                .articles
                .add_to_collection(collection, &article.id)
                .await?;
        }
        Ok(())
    }

    pub async fn latest(
        &self,
        username: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.catalog.latest(username, offset, limit).await
    }

    pub async fn by_date(
        &self,
        username: Option<&str>,
        date: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.catalog.by_date(username, date, offset, limit).await
    }

    pub async fn random(&self, username: Option<&str>, limit: usize) -> Result<Vec<Article>> {
        self.catalog.random(username, limit).await
    }

    pub async fn popular(&self, limit: usize) -> Result<Vec<(Article, i64)>> {
        self.catalog.popular(limit).await
    }
}
