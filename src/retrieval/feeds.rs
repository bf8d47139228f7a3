//! Non-personalized feeds: latest, random, popular and by-date
//!
//! All of them honour the caller's exclusion set. Anonymous callers pass
//! `None` and see the whole corpus.

use crate::error::Result;
use crate::storage::{ArticleStore, FeedbackLedger, RatingStore};
use crate::types::{Article, ArticleId, DateRange};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct FeedCatalog {
    articles: Arc<dyn ArticleStore>,
    ledger: Arc<dyn FeedbackLedger>,
    ratings: Arc<dyn RatingStore>,
}

impl FeedCatalog {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        ledger: Arc<dyn FeedbackLedger>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        Self {
            articles,
            ledger,
            ratings,
        }
    }

    async fn exclusions_for(&self, user: Option<&str>) -> Result<HashSet<ArticleId>> {
        match user {
            Some(user) => self.ledger.excluded_articles(user).await,
            None => Ok(HashSet::new()),
        }
    }

    /// Newest articles across the corpus
    pub async fn latest(
        &self,
        user: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let exclude = self.exclusions_for(user).await?;
        self.articles.latest(&exclude, None, offset, limit).await
    }

    /// Articles published on one UTC calendar day, newest first
    pub async fn by_date(
        &self,
        user: Option<&str>,
        date: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let exclude = self.exclusions_for(user).await?;
        let range = DateRange::day(date);
        self.articles
            .latest(&exclude, Some(&range), offset, limit)
            .await
    }

    /// Uniform sample without replacement
    pub async fn random(&self, user: Option<&str>, limit: usize) -> Result<Vec<Article>> {
        let exclude = self.exclusions_for(user).await?;
        self.articles.random_sample(&exclude, limit).await
    }

    /// Top articles by summed rating score, with their totals
    ///
    /// Ratings that point at articles no longer in the corpus are skipped.
    pub async fn popular(&self, limit: usize) -> Result<Vec<(Article, i64)>> {
        let ranked = self.ratings.top_rated(limit).await?;
        let mut popular = Vec::with_capacity(ranked.len());
        for (id, total) in ranked {
            match self.articles.get_article(&id).await? {
                Some(article) => popular.push((article, total)),
                None => warn!("Rated article {} is missing from the corpus", id),
            }
        }
        debug!("Popular feed has {} articles", popular.len());
        Ok(popular)
    }
}
