//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use readmysources_core::{
    Article, ArticleId, CollectionRegistry, FeedConfig, FeedService, FeedStores, LibsqlStore,
    MemoryStore, Persona, PersonaCentroidTable, StyleVector, ZeroNoise,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Article vector from the Data-Driven Analyst centroid
pub const ANALYST: [f64; 11] = [1.0, 1.0, 3.0, 3.0, 4.0, 1.0, 3.0, 3.0, 1.0, 1.0, 3.0];

/// Article vector from the Engaging Storyteller centroid
pub const STORYTELLER: [f64; 11] = [4.0, 4.0, 3.0, 4.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0, 3.0];

/// Service over a fresh in-memory store with deterministic rejections
pub fn memory_service() -> (Arc<MemoryStore>, FeedService) {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(FeedStores::shared(store.clone()), FeedConfig::default());
    (store, service)
}

pub fn service_over(stores: FeedStores, config: FeedConfig) -> FeedService {
    FeedService::with_parts(
        stores,
        config,
        Arc::new(PersonaCentroidTable::default()),
        Arc::new(CollectionRegistry::default()),
        Box::new(ZeroNoise),
    )
    .expect("Failed to build feed service")
}

/// Fresh libSQL store in a temporary directory
///
/// Keep the `TempDir` alive for as long as the store is used.
pub async fn create_test_store() -> (TempDir, Arc<LibsqlStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("readmysources_test.db");
    let store = LibsqlStore::create(path.to_str().expect("utf-8 temp path"))
        .await
        .expect("Failed to create test store");
    (temp_dir, Arc::new(store))
}

/// Deterministic spread of vectors over the 1..=5 scale
pub fn spread_vector(i: usize) -> StyleVector {
    let mut values = [0.0; 11];
    for (d, slot) in values.iter_mut().enumerate() {
        *slot = 1.0 + ((i * 7 + d * 3) % 9) as f64 * 0.5;
    }
    StyleVector::new(values)
}

/// `count` vectorized articles, ids `n000..`, one hour apart
pub fn corpus(count: usize) -> Vec<Article> {
    let base = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            Article::new(ArticleId(format!("n{:03}", i)), format!("Story {}", i))
                .with_vector(spread_vector(i))
                .published(base + Duration::hours(i as i64))
        })
        .collect()
}

/// Load articles into the corpus and into one persona collection
pub async fn seed(service: &FeedService, articles: &[Article], persona: Option<Persona>) {
    for article in articles {
        service
            .add_article(article, persona)
            .await
            .expect("Failed to add article");
    }
}
