//! Mode selection and "load more" pagination per user
//!
//! A [`PaginationCursor`] snapshots everything a feed depends on when it is
//! opened: mode, query vector, persona and exclusion set. Later pages query
//! against that snapshot so ordering stays fixed while the user keeps rating.
//! Articles rated after the snapshot are dropped from returned pages.
//!
//! ```text
//! Empty --initial_page--> Loaded --next_page (empty)--> Exhausted
//!   ^                        |
//!   +------- refresh --------+
//! ```

use crate::error::{FeedError, Result};
use crate::retrieval::retriever::{ArticleRetriever, RetrievalMode, RetrievalRequest};
use crate::storage::{FeedbackLedger, ProfileStore};
use crate::types::{Article, ArticleId, DateRange, Persona, StyleVector, UserProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorState {
    Empty,
    Loaded,
    Exhausted,
}

/// Result of asking for a page
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Page(Vec<Article>),
    /// Nothing left after filtering; a terminal state, not an error
    Exhausted,
}

impl PageOutcome {
    pub fn articles(&self) -> &[Article] {
        match self {
            PageOutcome::Page(articles) => articles,
            PageOutcome::Exhausted => &[],
        }
    }

    pub fn into_articles(self) -> Vec<Article> {
        match self {
            PageOutcome::Page(articles) => articles,
            PageOutcome::Exhausted => Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PageOutcome::Exhausted)
    }
}

/// Per-user pagination state, owned by the caller
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    pub user: String,
    pub mode: RetrievalMode,
    pub query: Option<StyleVector>,
    pub persona: Option<Persona>,
    pub exclusions: HashSet<ArticleId>,
    pub date_range: Option<DateRange>,
    pub offset: usize,
    pub state: CursorState,
}

impl PaginationCursor {
    fn request(&self, limit: usize) -> RetrievalRequest<'_> {
        RetrievalRequest {
            mode: self.mode,
            preference_vector: self.query.as_ref(),
            persona: self.persona,
            offset: self.offset,
            limit,
            exclusions: &self.exclusions,
            date_range: self.date_range.as_ref(),
        }
    }
}

/// Chooses a retrieval mode per user and walks pages
pub struct RetrievalOrchestrator {
    retriever: ArticleRetriever,
    profiles: Arc<dyn ProfileStore>,
    ledger: Arc<dyn FeedbackLedger>,
}

impl RetrievalOrchestrator {
    pub fn new(
        retriever: ArticleRetriever,
        profiles: Arc<dyn ProfileStore>,
        ledger: Arc<dyn FeedbackLedger>,
    ) -> Self {
        Self {
            retriever,
            profiles,
            ledger,
        }
    }

    pub fn retriever(&self) -> &ArticleRetriever {
        &self.retriever
    }

    async fn load_profile(&self, user: &str) -> Result<UserProfile> {
        self.profiles
            .get_profile(user)
            .await?
            .ok_or_else(|| FeedError::UserNotFound(user.to_string()))
    }

    /// Snapshot a fresh cursor for the user, without fetching
    pub async fn open(&self, user: &str, date_range: Option<DateRange>) -> Result<PaginationCursor> {
        let profile = self.load_profile(user).await?;
        let exclusions = self.ledger.excluded_articles(user).await?;
        let mode = RetrievalMode::select(&profile, self.retriever.config().similarity_threshold);
        info!(
            "Opened {} feed for {} (count {}, {} excluded)",
            mode,
            user,
            profile.feedback_count,
            exclusions.len()
        );

        Ok(PaginationCursor {
            user: user.to_string(),
            mode,
            query: profile.vector,
            persona: profile.persona,
            exclusions,
            date_range,
            offset: 0,
            state: CursorState::Empty,
        })
    }

    /// Open a cursor and fetch the first page; the cursor then sits at `limit`
    pub async fn initial_page(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<(PaginationCursor, PageOutcome)> {
        let mut cursor = self.open(user, None).await?;
        let outcome = self.first_page(&mut cursor, limit).await?;
        Ok((cursor, outcome))
    }

    /// Fetch offset 0 for an already-open cursor
    pub async fn first_page(
        &self,
        cursor: &mut PaginationCursor,
        limit: usize,
    ) -> Result<PageOutcome> {
        cursor.offset = 0;
        let page = self.retriever.retrieve(&cursor.request(limit)).await?;
        cursor.offset = limit;
        if page.is_empty() {
            cursor.state = CursorState::Exhausted;
            debug!("Feed for {} is empty", cursor.user);
            return Ok(PageOutcome::Exhausted);
        }
        cursor.state = CursorState::Loaded;
        Ok(PageOutcome::Page(page))
    }

    /// Fetch the page at the cursor and advance past it
    ///
    /// A failed fetch leaves the cursor untouched.
    pub async fn next_page(
        &self,
        cursor: &mut PaginationCursor,
        limit: usize,
    ) -> Result<PageOutcome> {
        if cursor.state == CursorState::Empty {
            return self.first_page(cursor, limit).await;
        }
        if cursor.state == CursorState::Exhausted {
            return Ok(PageOutcome::Exhausted);
        }

        let rated_now = self.ledger.excluded_articles(&cursor.user).await?;
        loop {
            let page = self.retriever.retrieve(&cursor.request(limit)).await?;
            if page.is_empty() {
                cursor.state = CursorState::Exhausted;
                debug!("Feed for {} exhausted at offset {}", cursor.user, cursor.offset);
                return Ok(PageOutcome::Exhausted);
            }
            cursor.offset += page.len();

            let fresh: Vec<Article> = page
                .into_iter()
                .filter(|a| !rated_now.contains(&a.id))
                .collect();
            if !fresh.is_empty() {
                debug!(
                    "Page of {} for {}, cursor now {}",
                    fresh.len(),
                    cursor.user,
                    cursor.offset
                );
                return Ok(PageOutcome::Page(fresh));
            }
        }
    }

    /// Re-read the profile and exclusions and rewind to an empty cursor
    pub async fn refresh(&self, cursor: &mut PaginationCursor) -> Result<()> {
        let fresh = self.open(&cursor.user, cursor.date_range).await?;
        *cursor = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::personas::CollectionRegistry;
    use crate::storage::memory::MemoryStore;
    use crate::storage::ArticleStore;
    use crate::types::FeedbackContext;

    async fn setup(articles: usize) -> (Arc<MemoryStore>, RetrievalOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..articles {
            let id = ArticleId(format!("a{:02}", i));
            store
                .upsert_article(&Article::new(id.clone(), format!("Article {}", i)))
                .await
                .unwrap();
            store.add_to_collection("Critical Thinker", &id).await.unwrap();
        }
        store.create_profile(&UserProfile::new("bob")).await.unwrap();
        let retriever = ArticleRetriever::new(
            store.clone(),
            Arc::new(CollectionRegistry::default()),
            RetrievalConfig::default(),
        );
        let orchestrator = RetrievalOrchestrator::new(retriever, store.clone(), store.clone());
        (store, orchestrator)
    }

    #[tokio::test]
    async fn test_cursor_walks_to_exhaustion() {
        let (_store, orchestrator) = setup(7).await;
        let (mut cursor, first) = orchestrator.initial_page("bob", 3).await.unwrap();
        assert_eq!(first.articles().len(), 3);
        assert_eq!(cursor.offset, 3);
        assert_eq!(cursor.mode, RetrievalMode::Persona);

        let second = orchestrator.next_page(&mut cursor, 3).await.unwrap();
        assert_eq!(second.articles().len(), 3);
        let third = orchestrator.next_page(&mut cursor, 3).await.unwrap();
        assert_eq!(third.articles().len(), 1);
        assert_eq!(cursor.offset, 7);

        let done = orchestrator.next_page(&mut cursor, 3).await.unwrap();
        assert!(done.is_exhausted());
        assert_eq!(cursor.state, CursorState::Exhausted);
        assert_eq!(cursor.offset, 7);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (_store, orchestrator) = setup(1).await;
        assert!(matches!(
            orchestrator.initial_page("ghost", 3).await,
            Err(FeedError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rated_after_snapshot_is_dropped() {
        let (store, orchestrator) = setup(6).await;
        let (mut cursor, _) = orchestrator.initial_page("bob", 2).await.unwrap();

        store
            .record("bob", &ArticleId::from("a02"), &FeedbackContext::Random)
            .await
            .unwrap();
        let next = orchestrator.next_page(&mut cursor, 2).await.unwrap();
        let ids: Vec<&str> = next.articles().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a03"]);
        assert_eq!(cursor.offset, 4);
    }

    #[tokio::test]
    async fn test_refresh_rewinds_and_resnapshots() {
        let (store, orchestrator) = setup(4).await;
        let (mut cursor, _) = orchestrator.initial_page("bob", 4).await.unwrap();
        assert!(orchestrator
            .next_page(&mut cursor, 4)
            .await
            .unwrap()
            .is_exhausted());

        store
            .record("bob", &ArticleId::from("a00"), &FeedbackContext::Curated)
            .await
            .unwrap();
        orchestrator.refresh(&mut cursor).await.unwrap();
        assert_eq!(cursor.state, CursorState::Empty);
        assert_eq!(cursor.offset, 0);
        assert!(cursor.exclusions.contains(&ArticleId::from("a00")));

        let page = orchestrator.next_page(&mut cursor, 10).await.unwrap();
        assert_eq!(page.articles().len(), 3);
    }
}
