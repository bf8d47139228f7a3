//! LibSQL storage backend
//!
//! One file database holding users, the article corpus, persona collections,
//! the feedback ledger and the rating log. Article feature vectors live in a
//! native `F32_BLOB(11)` column so nearest-neighbour ordering runs in SQL via
//! `vector_distance_cos` / `vector_distance_l2`.
//!
//! Exclusion sets are passed as a JSON array and expanded with `json_each`.

use crate::error::{FeedError, Result};
use crate::storage::schema::{split_statements, SCHEMA, SCHEMA_VERSION};
use crate::storage::{
    ArticleStore, FeedbackLedger, ProfileStore, RatingStore, ScoredArticle, SimilarityMetric,
};
use crate::types::{
    Article, ArticleId, DateRange, FeedbackContext, FeedbackScore, Persona, RatingRecord,
    StyleVector, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Builder, Connection, Database};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const ARTICLE_COLUMNS: &str = "a.id, a.title, a.link, a.published_at, \
     CASE WHEN a.feature_vector IS NULL THEN NULL ELSE vector_extract(a.feature_vector) END";

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
}

/// LibSQL implementation of every store trait
pub struct LibsqlStore {
    // Kept alive for the lifetime of the connection
    _db: Database,
    conn: Connection,
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedError::Database(format!("Invalid timestamp '{}': {}", value, e)))
}

fn parse_vector(json: &str) -> Result<StyleVector> {
    let values: Vec<f64> = serde_json::from_str(json)?;
    StyleVector::try_from(values)
}

fn exclusion_json(exclude: &HashSet<ArticleId>) -> Result<String> {
    let ids: Vec<&str> = exclude.iter().map(ArticleId::as_str).collect();
    Ok(serde_json::to_string(&ids)?)
}

impl LibsqlStore {
    /// Check that an existing file at `db_path` looks like a SQLite database
    ///
    /// Returns `Ok(false)` when the file is absent and `must_exist` is off.
    fn validate_database_file(db_path: &str, must_exist: bool) -> Result<bool> {
        let path = Path::new(db_path);
        if !path.exists() {
            if must_exist {
                return Err(FeedError::Database(format!(
                    "Database file not found at '{}'. Run 'readmysources init' first.",
                    db_path
                )));
            }
            return Ok(false);
        }

        let bytes = std::fs::read(path).map_err(|e| {
            FeedError::StoreUnavailable(format!("Cannot read database file '{}': {}", db_path, e))
        })?;
        // Empty files are fine; SQLite initializes them on first write
        if !bytes.is_empty() && !bytes.starts_with(b"SQLite format 3\0") {
            return Err(FeedError::Database(format!(
                "File at '{}' is not a valid SQLite database",
                db_path
            )));
        }
        debug!("Database file validation passed: {}", db_path);
        Ok(true)
    }

    /// Open a database, optionally creating the file and its parent directory
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!(
            "Opening libSQL database: {:?} (create_if_missing: {})",
            mode, create_if_missing
        );

        let db = match &mode {
            ConnectionMode::Local(path) => {
                let exists = Self::validate_database_file(path, !create_if_missing)?;
                if !exists {
                    if let Some(parent) = Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                }
                Builder::new_local(path).build().await.map_err(|e| {
                    FeedError::StoreUnavailable(format!("Failed to open local database: {}", e))
                })?
            }
            ConnectionMode::InMemory => Builder::new_local(":memory:")
                .build()
                .await
                .map_err(|e| {
                    FeedError::StoreUnavailable(format!("Failed to open in-memory database: {}", e))
                })?,
        };

        // A single shared connection; `:memory:` databases are per connection
        let conn = db
            .connect()
            .map_err(|e| FeedError::StoreUnavailable(format!("Failed to connect: {}", e)))?;

        let store = Self { _db: db, conn };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an existing database file
    pub async fn open(path: &str) -> Result<Self> {
        Self::new_with_validation(ConnectionMode::Local(path.to_string()), false).await
    }

    /// Open or create a database file
    pub async fn create(path: &str) -> Result<Self> {
        Self::new_with_validation(ConnectionMode::Local(path.to_string()), true).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new_with_validation(ConnectionMode::InMemory, true).await
    }

    /// Apply the embedded schema; safe to run repeatedly
    pub async fn migrate(&self) -> Result<()> {
        let statements = split_statements(SCHEMA);
        debug!("Applying {} schema statements", statements.len());
        for statement in &statements {
            self.conn.execute(statement, params![]).await.map_err(|e| {
                FeedError::Database(format!(
                    "Schema statement failed: {}\nStatement: {}",
                    e,
                    &statement[..statement.len().min(200)]
                ))
            })?;
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO _schema_version (version, applied_at) VALUES (?, ?)",
                params![SCHEMA_VERSION, format_time(&Utc::now())],
            )
            .await?;
        info!("Schema version {} ready", SCHEMA_VERSION);
        Ok(())
    }

    /// Highest applied schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT MAX(version) FROM _schema_version", params![])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn row_to_profile(row: &libsql::Row) -> Result<UserProfile> {
        let username: String = row.get(0)?;
        let persona = row
            .get::<Option<String>>(1)?
            .map(|p| p.parse::<Persona>())
            .transpose()?;
        let vector = row
            .get::<Option<String>>(2)?
            .map(|json| parse_vector(&json))
            .transpose()?;
        let feedback_count: i64 = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(UserProfile {
            username,
            persona,
            vector,
            feedback_count: feedback_count.max(0) as u64,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    /// Decode the five `ARTICLE_COLUMNS` starting at column 0
    fn row_to_article(row: &libsql::Row) -> Result<Article> {
        let id: String = row.get(0)?;
        let title: String = row.get(1)?;
        let link: Option<String> = row.get(2)?;
        let published_at = row
            .get::<Option<String>>(3)?
            .map(|s| parse_time(&s))
            .transpose()?;
        let feature_vector = row
            .get::<Option<String>>(4)?
            .map(|json| parse_vector(&json))
            .transpose()?;

        Ok(Article {
            id: ArticleId(id),
            title,
            link,
            published_at,
            feature_vector,
        })
    }

    fn row_to_rating(row: &libsql::Row) -> Result<RatingRecord> {
        let submission_id: String = row.get(0)?;
        let score: i64 = row.get(3)?;
        let context: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(RatingRecord {
            submission_id: Uuid::parse_str(&submission_id)
                .map_err(|e| FeedError::Database(format!("Invalid submission id: {}", e)))?,
            user: row.get(1)?,
            article_id: ArticleId(row.get(2)?),
            score: FeedbackScore::try_from(score)?,
            comment: row.get(4)?,
            context: FeedbackContext::from(context),
            created_at: parse_time(&created_at)?,
        })
    }

    async fn collect_articles(&self, mut rows: libsql::Rows) -> Result<Vec<Article>> {
        let mut articles = Vec::new();
        while let Some(row) = rows.next().await? {
            articles.push(Self::row_to_article(&row)?);
        }
        Ok(articles)
    }

    async fn user_exists(&self, username: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM users WHERE username = ?", params![username])
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

#[async_trait]
impl ProfileStore for LibsqlStore {
    async fn create_profile(&self, profile: &UserProfile) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO users (username, persona, vector, feedback_count, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    profile.username.clone(),
                    profile.persona.map(|p| p.as_key().to_string()),
                    profile
                        .vector
                        .map(|v| serde_json::to_string(v.as_slice()))
                        .transpose()?,
                    profile.feedback_count as i64,
                    format_time(&profile.created_at),
                    format_time(&profile.updated_at)
                ],
            )
            .await?;
        if changed == 0 {
            return Err(FeedError::AlreadyExists(profile.username.clone()));
        }
        debug!("Created profile for {}", profile.username);
        Ok(())
    }

    async fn get_profile(&self, username: &str) -> Result<Option<UserProfile>> {
        let mut rows = self
            .conn
            .query(
                "SELECT username, persona, vector, feedback_count, created_at, updated_at
                 FROM users WHERE username = ?",
                params![username],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_profile(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_persona(&self, username: &str, persona: Persona) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET persona = ?, updated_at = ? WHERE username = ?",
                params![persona.as_key(), format_time(&Utc::now()), username],
            )
            .await?;
        if changed == 0 {
            return Err(FeedError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn store_vector(
        &self,
        username: &str,
        vector: &StyleVector,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET vector = ?, feedback_count = ?, updated_at = ?
                 WHERE username = ? AND feedback_count = ?",
                params![
                    serde_json::to_string(vector.as_slice())?,
                    feedback_count as i64,
                    format_time(&Utc::now()),
                    username,
                    expected_count as i64
                ],
            )
            .await?;
        if changed == 0 {
            if self.user_exists(username).await? {
                return Err(FeedError::ConcurrentUpdate(username.to_string()));
            }
            return Err(FeedError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn restore_vector(
        &self,
        username: &str,
        vector: Option<&StyleVector>,
        feedback_count: u64,
        expected_count: u64,
    ) -> Result<()> {
        let vector = vector
            .map(|v| serde_json::to_string(v.as_slice()))
            .transpose()?;
        let changed = self
            .conn
            .execute(
                "UPDATE users SET vector = ?, feedback_count = ?, updated_at = ?
                 WHERE username = ? AND feedback_count = ?",
                params![
                    vector,
                    feedback_count as i64,
                    format_time(&Utc::now()),
                    username,
                    expected_count as i64
                ],
            )
            .await?;
        if changed == 0 {
            if self.user_exists(username).await? {
                return Err(FeedError::ConcurrentUpdate(username.to_string()));
            }
            return Err(FeedError::UserNotFound(username.to_string()));
        }
        debug!("Restored vector for {} at count {}", username, feedback_count);
        Ok(())
    }
}

#[async_trait]
impl FeedbackLedger for LibsqlStore {
    async fn record(
        &self,
        user: &str,
        article_id: &ArticleId,
        context: &FeedbackContext,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO feedback (user, article_id, context, created_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    user,
                    article_id.as_str(),
                    context.as_str(),
                    format_time(&Utc::now())
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn list_article_ids(
        &self,
        user: &str,
        context: Option<&FeedbackContext>,
    ) -> Result<Vec<ArticleId>> {
        let mut rows = match context {
            Some(context) => {
                self.conn
                    .query(
                        "SELECT article_id FROM feedback WHERE user = ? AND context = ?
                         ORDER BY created_at, article_id",
                        params![user, context.as_str()],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT DISTINCT article_id FROM feedback WHERE user = ? ORDER BY article_id",
                        params![user],
                    )
                    .await?
            }
        };

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(ArticleId(row.get(0)?));
        }
        Ok(ids)
    }
}

#[async_trait]
impl ArticleStore for LibsqlStore {
    async fn upsert_article(&self, article: &Article) -> Result<()> {
        let published_at = article.published_at.as_ref().map(format_time);
        match &article.feature_vector {
            Some(vector) => {
                self.conn
                    .execute(
                        "INSERT INTO articles (id, title, link, published_at, feature_vector)
                         VALUES (?, ?, ?, ?, vector32(?))
                         ON CONFLICT(id) DO UPDATE SET
                            title = excluded.title,
                            link = excluded.link,
                            published_at = excluded.published_at,
                            feature_vector = excluded.feature_vector",
                        params![
                            article.id.as_str(),
                            article.title.clone(),
                            article.link.clone(),
                            published_at,
                            serde_json::to_string(vector.as_slice())?
                        ],
                    )
                    .await?;
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO articles (id, title, link, published_at, feature_vector)
                         VALUES (?, ?, ?, ?, NULL)
                         ON CONFLICT(id) DO UPDATE SET
                            title = excluded.title,
                            link = excluded.link,
                            published_at = excluded.published_at,
                            feature_vector = NULL",
                        params![
                            article.id.as_str(),
                            article.title.clone(),
                            article.link.clone(),
                            published_at
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn add_to_collection(&self, collection: &str, article_id: &ArticleId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO collection_articles (collection, article_id) VALUES (?, ?)",
                params![collection, article_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn get_article(&self, id: &ArticleId) -> Result<Option<Article>> {
        let sql = format!("SELECT {} FROM articles a WHERE a.id = ?", ARTICLE_COLUMNS);
        let mut rows = self.conn.query(&sql, params![id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_article(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_articles(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM articles", params![])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as usize),
            None => Ok(0),
        }
    }

    async fn collection_page(
        &self,
        collection: &str,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let excluded = exclusion_json(exclude)?;
        let rows = match date_range {
            None => {
                let sql = format!(
                    "SELECT {} FROM collection_articles c
                     JOIN articles a ON a.id = c.article_id
                     WHERE c.collection = ?
                       AND c.article_id NOT IN (SELECT value FROM json_each(?))
                     ORDER BY c.seq
                     LIMIT ? OFFSET ?",
                    ARTICLE_COLUMNS
                );
                self.conn
                    .query(
                        &sql,
                        params![collection, excluded, limit as i64, offset as i64],
                    )
                    .await?
            }
            Some(range) => {
                let sql = format!(
                    "SELECT {} FROM collection_articles c
                     JOIN articles a ON a.id = c.article_id
                     WHERE c.collection = ?
                       AND c.article_id NOT IN (SELECT value FROM json_each(?))
                       AND a.published_at BETWEEN ? AND ?
                     ORDER BY a.published_at DESC, a.id
                     LIMIT ? OFFSET ?",
                    ARTICLE_COLUMNS
                );
                self.conn
                    .query(
                        &sql,
                        params![
                            collection,
                            excluded,
                            format_time(&range.start),
                            format_time(&range.end),
                            limit as i64,
                            offset as i64
                        ],
                    )
                    .await?
            }
        };
        self.collect_articles(rows).await
    }

    async fn nearest(
        &self,
        query: &StyleVector,
        metric: SimilarityMetric,
        candidates: usize,
    ) -> Result<Vec<ScoredArticle>> {
        let distance_fn = match metric {
            SimilarityMetric::Cosine => "vector_distance_cos",
            SimilarityMetric::Euclidean => "vector_distance_l2",
        };
        let sql = format!(
            "SELECT {}, {}(a.feature_vector, vector32(?)) AS distance
             FROM articles a
             WHERE a.feature_vector IS NOT NULL
             ORDER BY distance ASC, a.id ASC
             LIMIT ?",
            ARTICLE_COLUMNS, distance_fn
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![serde_json::to_string(query.as_slice())?, candidates as i64],
            )
            .await?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next().await? {
            let distance: f64 = row.get(5)?;
            scored.push(ScoredArticle {
                article: Self::row_to_article(&row)?,
                distance,
            });
        }
        debug!("Nearest-neighbour query returned {} candidates", scored.len());
        Ok(scored)
    }

    async fn latest(
        &self,
        exclude: &HashSet<ArticleId>,
        date_range: Option<&DateRange>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let excluded = exclusion_json(exclude)?;
        let rows = match date_range {
            None => {
                let sql = format!(
                    "SELECT {} FROM articles a
                     WHERE a.id NOT IN (SELECT value FROM json_each(?))
                     ORDER BY a.published_at IS NULL, a.published_at DESC, a.id
                     LIMIT ? OFFSET ?",
                    ARTICLE_COLUMNS
                );
                self.conn
                    .query(&sql, params![excluded, limit as i64, offset as i64])
                    .await?
            }
            Some(range) => {
                let sql = format!(
                    "SELECT {} FROM articles a
                     WHERE a.id NOT IN (SELECT value FROM json_each(?))
                       AND a.published_at BETWEEN ? AND ?
                     ORDER BY a.published_at DESC, a.id
                     LIMIT ? OFFSET ?",
                    ARTICLE_COLUMNS
                );
                self.conn
                    .query(
                        &sql,
                        params![
                            excluded,
                            format_time(&range.start),
                            format_time(&range.end),
                            limit as i64,
                            offset as i64
                        ],
                    )
                    .await?
            }
        };
        self.collect_articles(rows).await
    }

    async fn random_sample(
        &self,
        exclude: &HashSet<ArticleId>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {} FROM articles a
             WHERE a.id NOT IN (SELECT value FROM json_each(?))
             ORDER BY RANDOM()
             LIMIT ?",
            ARTICLE_COLUMNS
        );
        let rows = self
            .conn
            .query(&sql, params![exclusion_json(exclude)?, limit as i64])
            .await?;
        self.collect_articles(rows).await
    }
}

#[async_trait]
impl RatingStore for LibsqlStore {
    async fn append_rating(&self, rating: &RatingRecord) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO ratings
                    (submission_id, user, article_id, score, comment, context, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    rating.submission_id.to_string(),
                    rating.user.clone(),
                    rating.article_id.as_str(),
                    rating.score.value(),
                    rating.comment.clone(),
                    rating.context.as_str(),
                    format_time(&rating.created_at)
                ],
            )
            .await?;
        if changed == 0 {
            return Err(FeedError::AlreadyExists(rating.submission_id.to_string()));
        }
        Ok(())
    }

    async fn remove_rating(&self, submission_id: &Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM ratings WHERE submission_id = ?",
                params![submission_id.to_string()],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn ratings_for_user(&self, user: &str) -> Result<Vec<RatingRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT submission_id, user, article_id, score, comment, context, created_at
                 FROM ratings WHERE user = ? ORDER BY created_at, submission_id",
                params![user],
            )
            .await?;
        let mut ratings = Vec::new();
        while let Some(row) = rows.next().await? {
            ratings.push(Self::row_to_rating(&row)?);
        }
        Ok(ratings)
    }

    async fn top_rated(&self, limit: usize) -> Result<Vec<(ArticleId, i64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT article_id, SUM(score) AS total FROM ratings
                 GROUP BY article_id
                 ORDER BY total DESC, article_id ASC
                 LIMIT ?",
                params![limit as i64],
            )
            .await?;
        let mut ranked = Vec::new();
        while let Some(row) = rows.next().await? {
            ranked.push((ArticleId(row.get(0)?), row.get::<i64>(1)?));
        }
        Ok(ranked)
    }
}
