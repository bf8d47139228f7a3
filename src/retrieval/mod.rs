//! Article retrieval: personalized pages plus the plain feeds

pub mod feeds;
pub mod orchestrator;
pub mod retriever;

pub use feeds::FeedCatalog;
pub use orchestrator::{CursorState, PageOutcome, PaginationCursor, RetrievalOrchestrator};
pub use retriever::{paginate_candidates, ArticleRetriever, RetrievalMode, RetrievalRequest};
