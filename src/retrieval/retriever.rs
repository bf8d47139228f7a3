//! Page-level article retrieval
//!
//! Two strategies share one contract: return at most `limit` articles after
//! skipping `offset`, never including anything in the exclusion set.
//!
//! - Persona mode reads the persona's curated collection in insertion order.
//! - Similarity mode over-fetches nearest neighbours of the preference
//!   vector, filters, then orders by `(distance, id)` before skip/limit so
//!   successive pages over the same snapshot neither repeat nor skip.
//!   A publication window widens the candidate pool to the whole corpus.

use crate::config::RetrievalConfig;
use crate::error::{FeedError, Result};
use crate::personas::CollectionRegistry;
use crate::storage::{ArticleStore, ScoredArticle};
use crate::types::{Article, ArticleId, DateRange, Persona, StyleVector, UserProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Persona,
    Similarity,
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalMode::Persona => write!(f, "persona"),
            RetrievalMode::Similarity => write!(f, "similarity"),
        }
    }
}

impl RetrievalMode {
    /// Similarity once the count reaches the threshold and a vector exists
    pub fn select(profile: &UserProfile, similarity_threshold: u64) -> Self {
        match profile.vector {
            Some(_) if profile.feedback_count >= similarity_threshold => {
                RetrievalMode::Similarity
            }
            _ => RetrievalMode::Persona,
        }
    }
}

/// Everything one retrieval call needs
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub mode: RetrievalMode,
    pub preference_vector: Option<&'a StyleVector>,
    pub persona: Option<Persona>,
    pub offset: usize,
    pub limit: usize,
    pub exclusions: &'a HashSet<ArticleId>,
    pub date_range: Option<&'a DateRange>,
}

/// Fetches one page of articles in either mode
pub struct ArticleRetriever {
    articles: Arc<dyn ArticleStore>,
    collections: Arc<CollectionRegistry>,
    config: RetrievalConfig,
}

impl ArticleRetriever {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        collections: Arc<CollectionRegistry>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            articles,
            collections,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Number of nearest neighbours to request for a page
    pub fn candidate_window(&self, offset: usize, limit: usize, excluded: usize) -> usize {
        let needed = offset
            .saturating_add(limit)
            .saturating_mul(self.config.candidate_multiplier)
            .saturating_add(excluded);
        needed.max(self.config.num_candidates)
    }

    /// Fetch a page; store failures are logged and returned to the caller
    pub async fn retrieve(&self, request: &RetrievalRequest<'_>) -> Result<Vec<Article>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let result = match request.mode {
            RetrievalMode::Persona => self.persona_page(request).await,
            RetrievalMode::Similarity => self.similarity_page(request).await,
        };
        match &result {
            Ok(page) => debug!(
                "Retrieved {} articles ({} mode, offset {}, limit {})",
                page.len(),
                request.mode,
                request.offset,
                request.limit
            ),
            Err(e) => warn!("Retrieval failed in {} mode: {}", request.mode, e),
        }
        result
    }

    async fn persona_page(&self, request: &RetrievalRequest<'_>) -> Result<Vec<Article>> {
        let persona = request.persona.unwrap_or(self.config.default_persona);
        let collection = self.collections.collection_for(persona);
        self.articles
            .collection_page(
                collection,
                request.exclusions,
                request.date_range,
                request.offset,
                request.limit,
            )
            .await
    }

    async fn similarity_page(&self, request: &RetrievalRequest<'_>) -> Result<Vec<Article>> {
        let query = request.preference_vector.ok_or_else(|| {
            FeedError::Other("Similarity retrieval requires a preference vector".to_string())
        })?;

        let mut window =
            self.candidate_window(request.offset, request.limit, request.exclusions.len());
        if request.date_range.is_some() {
            // Neighbours outside the window can't be bounded; rank the whole corpus
            window = window.max(self.articles.count_articles().await?);
        }
        let candidates = self
            .articles
            .nearest(query, self.config.metric, window)
            .await?;
        debug!(
            "Similarity window {} returned {} candidates",
            window,
            candidates.len()
        );

        Ok(paginate_candidates(
            candidates,
            request.exclusions,
            request.date_range,
            request.offset,
            request.limit,
        ))
    }
}

/// Filter, order by `(distance, id)` and cut one page out of a candidate list
pub fn paginate_candidates(
    mut candidates: Vec<ScoredArticle>,
    exclusions: &HashSet<ArticleId>,
    date_range: Option<&DateRange>,
    offset: usize,
    limit: usize,
) -> Vec<Article> {
    candidates.retain(|c| {
        !exclusions.contains(&c.article.id)
            && date_range.map_or(true, |range| {
                c.article
                    .published_at
                    .map_or(false, |at| range.contains(&at))
            })
    });
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.article.id.cmp(&b.article.id))
    });
    candidates
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|c| c.article)
        .collect()
}
