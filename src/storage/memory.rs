//! In-process storage backend
//!
//! Holds everything in maps behind one `RwLock`. Implements every store
//! trait so a whole `FeedService` can run without a database.

use crate::error::{FeedError, Result};
use crate::storage::{
    ArticleStore, FeedbackLedger, ProfileStore, RatingStore, ScoredArticle, SimilarityMetric,
};
use crate::types::{
    Article, ArticleId, DateRange, FeedbackContext, FeedbackRecord, Persona, RatingRecord,
    StyleVector, UserProfile,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    profiles: HashMap<String, UserProfile>,
    feedback: Vec<FeedbackRecord>,
    articles: HashMap<ArticleId, Article>,
    /// Corpus insertion order
    article_order: Vec<ArticleId>,
    collections: HashMap<String, Vec<ArticleId>>,
    ratings: Vec<RatingRecord>,
}

impl Inner {
    fn ordered_articles(&self) -> impl Iterator<Item = &Article> {
        self.article_order
            .iter()
            .filter_map(|id| self.articles.get(id))
    }
}

/// Map-backed implementation of all store traits
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_range(article: &Article, date_range: Option<&DateRange>) -> bool {
    match date_range {
        None => true,
        Some(range) => article
            .published_at
            .map(|at| range.contains(&at))
            .unwrap_or(false),
    }
}

fn newest_first(a: &Article, b: &Article) -> std::cmp::Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn create_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.profiles.contains_key(&profile.username) {
            return Err(FeedError::AlreadyExists(profile.username.clone()));
        }
        inner
            .profiles
            .insert(profile.username.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, username: &str) -> Result<Option<UserProfile>> {
        Ok(self.inner.read().await.profiles.get(username).cloned())
    }

    async fn set_persona(&self, username: &str, persona: Persona) -> Result<()> {
        let mut inner = self.inner.write().await;
        let profile = inner
            .profiles
            .get_mut(username)
            .ok_or_else(|| FeedError::UserNotFound(username.to_string()))?;
        profile.persona = Some(persona);
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn store_vector(
        &self,
        username: &str,
        vector: &StyleVector,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let profile = inner
            .profiles
            .get_mut(username)
            .ok_or_else(|| FeedError::UserNotFound(username.to_string()))?;
        if profile.feedback_count != expected_count {
            return Err(FeedError::ConcurrentUpdate(username.to_string()));
        }
        profile.vector = Some(*vector);
        profile.feedback_count = feedback_count;
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn restore_vector(
        &self,
        username: &str,
        vector: Option<&StyleVector>,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let profile = inner
            .profiles
            .get_mut(username)
            .ok_or_else(|| FeedError::UserNotFound(username.to_string()))?;
        if profile.feedback_count != expected_count {
            return Err(FeedError::ConcurrentUpdate(username.to_string()));
        }
        profile.vector = vector.copied();
        profile.feedback_count = feedback_count;
        profile.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl FeedbackLedger for MemoryStore {
    async fn record(
        &self,
        user: &str,
        article_id: &ArticleId,
        context: &FeedbackContext,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let exists = inner.feedback.iter().any(|r| {
            r.user == user && &r.article_id == article_id && &r.context == context
        });
        if exists {
            debug!("Feedback for {} on {} ({}) already recorded", user, article_id, context);
            return Ok(false);
        }
        inner.feedback.push(FeedbackRecord {
            user: user.to_string(),
            article_id: article_id.clone(),
            context: context.clone(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_article_ids(
        &self,
        user: &str,
        context: Option<&FeedbackContext>,
    ) -> Result<Vec<ArticleId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .feedback
            .iter()
            .filter(|r| r.user == user && context.map_or(true, |c| &r.context == c))
            .map(|r| r.article_id.clone())
            .collect())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn upsert_article(&self, article: &Article) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner
            .articles
            .insert(article.id.clone(), article.clone())
            .is_none()
        {
            inner.article_order.push(article.id.clone());
        }
        Ok(())
    }

    async fn add_to_collection(&self, collection: &str, article_id: &ArticleId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let members = inner.collections.entry(collection.to_string()).or_default();
        if !members.contains(article_id) {
            members.push(article_id.clone());
        }
        Ok(())
    }

    async fn get_article(&self, id: &ArticleId) -> Result<Option<Article>> {
        Ok(self.inner.read().await.articles.get(id).cloned())
    }

    async fn count_articles(&self) -> Result<usize> {
        Ok(self.inner.read().await.articles.len())
    }

    async fn collection_page(
        &self,
        collection: &str,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.read().await;
        let Some(members) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut page: Vec<Article> = members
            .iter()
            .filter(|id| !exclude.contains(*id))
            .filter_map(|id| inner.articles.get(id))
            .filter(|a| in_range(a, date_range))
            .cloned()
            .collect();
        if date_range.is_some() {
            page.sort_by(newest_first);
        }
        Ok(page.into_iter().skip(offset).take(limit).collect())
    }

    async fn nearest(
        &self,
        query: &StyleVector,
        metric: SimilarityMetric,
        candidates: usize,
    ) -> Result<Vec<ScoredArticle>> {
        let inner = self.inner.read().await;
        let mut scored: Vec<ScoredArticle> = inner
            .ordered_articles()
            .filter_map(|article| {
                article.feature_vector.map(|v| ScoredArticle {
                    distance: metric.distance(query, &v),
                    article: article.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.article.id.cmp(&b.article.id))
        });
        scored.truncate(candidates);
        Ok(scored)
    }

    async fn latest(
        &self,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.read().await;
        let mut page: Vec<Article> = inner
            .ordered_articles()
            .filter(|a| !exclude.contains(&a.id) && in_range(a, date_range))
            .cloned()
            .collect();
        page.sort_by(newest_first);
        Ok(page.into_iter().skip(offset).take(limit).collect())
    }

    async fn random_sample(
        &self,
        exclude: &HashSet<ArticleId>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.read().await;
        let pool: Vec<&Article> = inner
            .ordered_articles()
            .filter(|a| !exclude.contains(&a.id))
            .collect();
        let mut rng = rand::thread_rng();
        Ok(pool
            .choose_multiple(&mut rng, limit)
            .map(|a| (*a).clone())
            .collect())
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn append_rating(&self, rating: &RatingRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner
            .ratings
            .iter()
            .any(|r| r.submission_id == rating.submission_id)
        {
            return Err(FeedError::AlreadyExists(rating.submission_id.to_string()));
        }
        inner.ratings.push(rating.clone());
        Ok(())
    }

    async fn remove_rating(&self, submission_id: &Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.ratings.len();
        inner.ratings.retain(|r| &r.submission_id != submission_id);
        Ok(inner.ratings.len() < before)
    }

    async fn ratings_for_user(&self, user: &str) -> Result<Vec<RatingRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .ratings
            .iter()
            .filter(|r| r.user == user)
            .cloned()
            .collect())
    }

    async fn top_rated(&self, limit: usize) -> Result<Vec<(ArticleId, i64)>> {
        let inner = self.inner.read().await;
        let mut totals: HashMap<&ArticleId, i64> = HashMap::new();
        for rating in &inner.ratings {
            *totals.entry(&rating.article_id).or_insert(0) += rating.score.value();
        }
        let mut ranked: Vec<(ArticleId, i64)> = totals
            .into_iter()
            .map(|(id, total)| (id.clone(), total))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedbackScore;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn article(id: &str, day: u32, fill: f64) -> Article {
        Article::new(id, format!("Title {}", id))
            .with_vector(StyleVector::new([fill; 11]))
            .published(Utc.with_ymd_and_hms(2025, 1, day, 8, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_ledger_is_idempotent() {
        let store = MemoryStore::new();
        let id = ArticleId::from("a1");
        assert!(store.record("u", &id, &FeedbackContext::Curated).await.unwrap());
        assert!(!store.record("u", &id, &FeedbackContext::Curated).await.unwrap());
        assert!(store.record("u", &id, &FeedbackContext::Random).await.unwrap());

        let excluded = store.excluded_articles("u").await.unwrap();
        assert_eq!(excluded.len(), 1);
        assert_eq!(
            store
                .list_article_ids("u", Some(&FeedbackContext::Random))
                .await
                .unwrap(),
            vec![id]
        );
    }

    #[tokio::test]
    async fn test_store_vector_compare_and_swap() {
        let store = MemoryStore::new();
        store.create_profile(&UserProfile::new("alice")).await.unwrap();
        let v = StyleVector::new([2.0; 11]);

        store.store_vector("alice", &v, 1, 0).await.unwrap();
        let err = store.store_vector("alice", &v, 2, 0).await.unwrap_err();
        assert!(matches!(err, FeedError::ConcurrentUpdate(_)));

        let err = store.store_vector("bob", &v, 1, 0).await.unwrap_err();
        assert!(matches!(err, FeedError::UserNotFound(_)));

        let profile = store.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.feedback_count, 1);
        assert_eq!(profile.vector, Some(v));
    }

    #[tokio::test]
    async fn test_restore_vector_puts_back_none() {
        let store = MemoryStore::new();
        store.create_profile(&UserProfile::new("alice")).await.unwrap();
        store
            .store_vector("alice", &StyleVector::new([4.0; 11]), 1, 0)
            .await
            .unwrap();

        let err = store.restore_vector("alice", None, 0, 3).await.unwrap_err();
        assert!(matches!(err, FeedError::ConcurrentUpdate(_)));

        store.restore_vector("alice", None, 0, 1).await.unwrap();
        let profile = store.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.feedback_count, 0);
        assert!(profile.vector.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_profile() {
        let store = MemoryStore::new();
        store.create_profile(&UserProfile::new("alice")).await.unwrap();
        assert!(matches!(
            store.create_profile(&UserProfile::new("alice")).await,
            Err(FeedError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance_then_id() {
        let store = MemoryStore::new();
        for (id, fill) in [("c", 2.0), ("a", 2.0), ("b", 4.0), ("d", 1.0)] {
            store.upsert_article(&article(id, 1, fill)).await.unwrap();
        }
        store
            .upsert_article(&Article::new("novec", "No vector"))
            .await
            .unwrap();

        let query = StyleVector::new([2.0; 11]);
        let hits = store
            .nearest(&query, SimilarityMetric::Euclidean, 10)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.article.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "b"]);

        let top = store
            .nearest(&query, SimilarityMetric::Euclidean, 2)
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn test_collection_and_latest_pages() {
        let store = MemoryStore::new();
        for (id, day) in [("x", 3), ("y", 1), ("z", 2)] {
            store.upsert_article(&article(id, day, 3.0)).await.unwrap();
            store.add_to_collection("Critical Thinker", &id.into()).await.unwrap();
        }

        let none = HashSet::new();
        let page = store
            .collection_page("Critical Thinker", &none, None, 1, 5)
            .await
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);

        let exclude: HashSet<ArticleId> = [ArticleId::from("x")].into_iter().collect();
        let latest = store.latest(&exclude, None, 0, 5).await.unwrap();
        let ids: Vec<&str> = latest.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y"]);

        let day = DateRange::day(chrono::NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        let on_day = store.latest(&none, Some(&day), 0, 5).await.unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].id.as_str(), "z");
    }

    #[tokio::test]
    async fn test_random_sample_respects_exclusions() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .upsert_article(&article(&format!("r{}", i), 1, 3.0))
                .await
                .unwrap();
        }
        let exclude: HashSet<ArticleId> = (0..5).map(|i| ArticleId(format!("r{}", i))).collect();
        let sample = store.random_sample(&exclude, 20).await.unwrap();
        assert_eq!(sample.len(), 5);
        let unique: HashSet<_> = sample.iter().map(|a| a.id.clone()).collect();
        assert_eq!(unique.len(), 5);
        assert!(unique.is_disjoint(&exclude));
    }

    #[tokio::test]
    async fn test_top_rated_sums_scores() {
        let store = MemoryStore::new();
        let rate = |user: &str, id: &str, score| RatingRecord {
            submission_id: Uuid::new_v4(),
            user: user.to_string(),
            article_id: ArticleId::from(id),
            score,
            comment: None,
            context: FeedbackContext::Curated,
            created_at: Utc::now(),
        };
        store.append_rating(&rate("u1", "b", FeedbackScore::Accept)).await.unwrap();
        store.append_rating(&rate("u2", "b", FeedbackScore::Accept)).await.unwrap();
        store.append_rating(&rate("u1", "a", FeedbackScore::Accept)).await.unwrap();
        store.append_rating(&rate("u2", "a", FeedbackScore::Accept)).await.unwrap();
        store.append_rating(&rate("u1", "c", FeedbackScore::Reject)).await.unwrap();

        let top = store.top_rated(3).await.unwrap();
        assert_eq!(
            top,
            vec![
                (ArticleId::from("a"), 2),
                (ArticleId::from("b"), 2),
                (ArticleId::from("c"), -1)
            ]
        );
        assert_eq!(store.ratings_for_user("u1").await.unwrap().len(), 3);

        let dropped = rate("u1", "c", FeedbackScore::Accept);
        store.append_rating(&dropped).await.unwrap();
        assert!(store.remove_rating(&dropped.submission_id).await.unwrap());
        assert!(!store.remove_rating(&dropped.submission_id).await.unwrap());
        assert_eq!(store.top_rated(3).await.unwrap()[2], (ArticleId::from("c"), -1));
    }
}
