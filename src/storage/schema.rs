//! Embedded libSQL schema
//!
//! Timestamps are RFC 3339 text with a fixed microsecond width so that
//! lexical order equals chronological order in range filters.

/// Current schema version recorded in `_schema_version`
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    persona TEXT,
    -- JSON array of 11 numbers; NULL until the first feedback
    vector TEXT,
    feedback_count INTEGER NOT NULL DEFAULT 0 CHECK(feedback_count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS articles (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    link TEXT,
    published_at TEXT,
    feature_vector F32_BLOB(11)
);

CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC, id);

CREATE TABLE IF NOT EXISTS collection_articles (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    article_id TEXT NOT NULL,
    UNIQUE(collection, article_id)
);

CREATE TABLE IF NOT EXISTS feedback (
    user TEXT NOT NULL,
    article_id TEXT NOT NULL,
    context TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user, article_id, context)
);

CREATE TABLE IF NOT EXISTS ratings (
    submission_id TEXT PRIMARY KEY NOT NULL,
    user TEXT NOT NULL,
    article_id TEXT NOT NULL,
    score INTEGER NOT NULL CHECK(score IN (-1, 0, 1)),
    comment TEXT,
    context TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ratings_article ON ratings(article_id);
CREATE INDEX IF NOT EXISTS idx_ratings_user ON ratings(user);
"#;

/// Split a SQL script into statements, skipping blank and comment-only lines
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}
