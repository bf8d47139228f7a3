//! Read My Sources - persona-aware article personalization
//!
//! Each user carries an 11-dimensional preference vector on the same
//! stylistic scale as the articles. Feedback moves the vector; once enough
//! feedback has accumulated, the feed switches from the persona's curated
//! collection to a nearest-neighbour search around that vector.
//!
//! # Architecture
//!
//! - **Types**: articles, profiles, feedback records, style vectors
//! - **Personas**: centroid table and persona -> collection registry
//! - **Learning**: the preference-vector update rule
//! - **Storage**: store traits with in-memory and libSQL backends
//! - **Retrieval**: page retrieval, pagination cursors, plain feeds
//! - **Service**: the facade the presentation layer talks to
//!
//! # Example
//!
//! ```ignore
//! use readmysources_core::{FeedConfig, FeedService, FeedStores, LibsqlStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> readmysources_core::Result<()> {
//!     let store = Arc::new(LibsqlStore::create("feed.db").await?);
//!     let service = FeedService::new(FeedStores::shared(store), FeedConfig::default())?;
//!
//!     service.register_user("alice").await?;
//!     let page = service.get_next_page("alice", 5).await?;
//!     for article in page.articles() {
//!         println!("{}", article.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod learning;
pub mod personas;
pub mod retrieval;
pub mod service;
pub mod storage;
pub mod style;
pub mod types;

pub use config::{ConfigError, FeedConfig, LearningConfig, RetrievalConfig, StorageConfig};
pub use error::{FeedError, Result};
pub use learning::{EmbeddingUpdateEngine, GaussianNoise, NoiseSource, UpdateOutcome, ZeroNoise};
pub use personas::{CollectionRegistry, PersonaCentroidTable};
pub use retrieval::{
    ArticleRetriever, CursorState, FeedCatalog, PageOutcome, PaginationCursor,
    RetrievalOrchestrator, RetrievalMode,
};
pub use service::{FeedService, FeedStores};
pub use storage::libsql::{ConnectionMode, LibsqlStore};
pub use storage::memory::MemoryStore;
pub use storage::{
    ArticleStore, FeedbackLedger, ProfileStore, RatingStore, ScoredArticle, SimilarityMetric,
};
pub use style::StyleDimension;
pub use types::{
    Article, ArticleId, DateRange, FeedbackContext, FeedbackRecord, FeedbackScore, Persona,
    RatingRecord, StyleVector, UserProfile, DIMENSIONS,
};
