//! Read My Sources - operator CLI
//!
//! Thin command-line front end over the feed service: initialize a database,
//! import labeled articles, manage users, submit ratings and page through
//! feeds.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use readmysources_core::{
    error::Result,
    Article, ArticleId, DateRange, FeedConfig, FeedService, FeedStores, FeedbackContext,
    FeedbackScore, LibsqlStore, PageOutcome, Persona, StyleVector,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "readmysources")]
#[command(about = "Persona-aware article personalization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database path (overrides the config file and default location)
    #[arg(long, env = "READMYSOURCES_DB_PATH")]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,

    /// Import articles from a JSON array
    Import {
        /// JSON file with article records
        file: PathBuf,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Rate an article (-1 reject, 0 neutral, 1 accept)
    Rate {
        user: String,
        article: String,

        #[arg(allow_negative_numbers = true)]
        score: i64,

        /// Free-text comment, kept on rejections
        #[arg(long)]
        comment: Option<String>,

        /// Page or feature the rating came from
        #[arg(long, default_value = "curated")]
        context: String,
    },

    /// Personalized feed: first page plus load-more pages
    Feed {
        user: String,

        /// Additional pages to load after the first
        #[arg(long, default_value = "0")]
        pages: usize,

        /// Articles per page (defaults to the configured page size)
        #[arg(long)]
        limit: Option<usize>,

        /// Only articles published on this day (YYYY-MM-DD, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Newest articles
    Latest {
        /// Exclude articles this user has rated
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Random sample of articles
    Random {
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Highest rated articles
    Popular {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Articles published on one day (YYYY-MM-DD, UTC)
    ByDate {
        date: NaiveDate,

        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a new user
    Add { name: String },

    /// Select a persona ("Data-Driven Analyst", "critical_thinker", ...)
    Persona { name: String, persona: String },

    /// Show a user's profile
    Show { name: String },
}

/// One article in an import file
#[derive(Debug, Deserialize)]
struct ImportRecord {
    id: String,
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    /// Numeric feature vector
    #[serde(default)]
    vector: Option<Vec<f64>>,
    /// Style labels keyed by dimension, used when `vector` is absent
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    /// Persona collection to add the article to
    #[serde(default)]
    persona: Option<String>,
}

impl ImportRecord {
    fn into_article(self) -> Result<(Article, Option<Persona>)> {
        let feature_vector = match (self.vector, self.labels) {
            (Some(values), _) => Some(StyleVector::try_from(values)?),
            (None, Some(labels)) => Some(StyleVector::from_labels(&labels)?),
            (None, None) => None,
        };
        let persona = self.persona.map(|p| p.parse::<Persona>()).transpose()?;
        let article = Article {
            id: ArticleId(self.id),
            title: self.title,
            link: self.link,
            published_at: self.published_at,
            feature_vector,
        };
        Ok((article, persona))
    }
}

fn load_config(path: Option<&Path>) -> Result<FeedConfig> {
    match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            Ok(FeedConfig::from_file(path)?)
        }
        None => Ok(FeedConfig::default()),
    }
}

async fn open_service(
    db_path: &Path,
    config: FeedConfig,
    create_if_missing: bool,
) -> Result<FeedService> {
    let path = db_path.to_string_lossy();
    let store = if create_if_missing {
        LibsqlStore::create(&path).await?
    } else {
        LibsqlStore::open(&path).await?
    };
    FeedService::new(FeedStores::shared(Arc::new(store)), config)
}

fn print_articles(articles: &[Article], start: usize) {
    for (i, article) in articles.iter().enumerate() {
        let published = article
            .published_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "undated".to_string());
        println!(
            "{:>3}. {} [{}] ({})",
            start + i + 1,
            article.title,
            article.id,
            published
        );
        if let Some(link) = &article.link {
            println!("     {}", link);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::new(format!(
        "readmysources={level},readmysources_core={level},libsql=warn",
        level = level.as_str().to_lowercase()
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("readmysources v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;
    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| config.storage.database.clone());
    debug!("Database: {}", db_path.display());

    match cli.command {
        Commands::Init => {
            open_service(&db_path, config, true).await?;
            println!("Initialized database at {}", db_path.display());
            Ok(())
        }
        Commands::Import { file } => {
            let service = open_service(&db_path, config, true).await?;
            let contents = std::fs::read_to_string(&file)?;
            let records: Vec<ImportRecord> = serde_json::from_str(&contents)?;

            let total = records.len();
            let mut imported = 0;
            for record in records {
                let id = record.id.clone();
                match record.into_article() {
                    Ok((article, persona)) => {
                        service.add_article(&article, persona).await?;
                        imported += 1;
                    }
                    Err(e) => warn!("Skipping article {}: {}", id, e),
                }
            }
            info!("Imported {} of {} articles", imported, total);
            println!("Imported {} of {} articles", imported, total);
            Ok(())
        }
        Commands::User { action } => {
            let service = open_service(&db_path, config, true).await?;
            match action {
                UserAction::Add { name } => {
                    service.register_user(&name).await?;
                    println!("Registered {}", name);
                }
                UserAction::Persona { name, persona } => {
                    let persona: Persona = persona.parse()?;
                    let profile = service.select_persona(&name, persona).await?;
                    println!(
                        "{} is now a {} (feedback count {})",
                        profile.username, persona, profile.feedback_count
                    );
                }
                UserAction::Show { name } => {
                    let profile = service.profile(&name).await?;
                    println!("{}", serde_json::to_string_pretty(&profile)?);
                }
            }
            Ok(())
        }
        Commands::Rate {
            user,
            article,
            score,
            comment,
            context,
        } => {
            let service = open_service(&db_path, config, false).await?;
            let score = FeedbackScore::try_from(score)?;
            let outcome = service
                .submit_rating(
                    &user,
                    &ArticleId(article),
                    score,
                    comment,
                    FeedbackContext::from(context),
                    None,
                )
                .await?;
            println!(
                "{} update applied; feedback count now {}",
                outcome.regime, outcome.feedback_count
            );
            Ok(())
        }
        Commands::Feed {
            user,
            pages,
            limit,
            date,
        } => {
            let limit = limit.unwrap_or(config.retrieval.page_size);
            let service = open_service(&db_path, config, false).await?;
            if let Some(date) = date {
                service.open_feed(&user, Some(DateRange::day(date))).await?;
            }

            let mut shown = 0;
            for page_number in 0..=pages {
                match service.get_next_page(&user, limit).await {
                    Ok(PageOutcome::Page(articles)) => {
                        print_articles(&articles, shown);
                        shown += articles.len();
                    }
                    Ok(PageOutcome::Exhausted) => {
                        println!("No more articles.");
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        warn!("Page {} unavailable: {}", page_number + 1, e);
                        println!("Articles are unavailable right now; try again.");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Some(cursor) = service.cursor(&user)? {
                debug!("Feed mode {} ended at offset {}", cursor.mode, cursor.offset);
            }
            Ok(())
        }
        Commands::Latest {
            user,
            offset,
            limit,
        } => {
            let service = open_service(&db_path, config, false).await?;
            let articles = service.latest(user.as_deref(), offset, limit).await?;
            print_articles(&articles, offset);
            Ok(())
        }
        Commands::Random { user, limit } => {
            let service = open_service(&db_path, config, false).await?;
            let articles = service.random(user.as_deref(), limit).await?;
            print_articles(&articles, 0);
            Ok(())
        }
        Commands::Popular { limit } => {
            let service = open_service(&db_path, config, false).await?;
            for (i, (article, total)) in service.popular(limit).await?.iter().enumerate() {
                println!("{:>3}. {:+} {} [{}]", i + 1, total, article.title, article.id);
            }
            Ok(())
        }
        Commands::ByDate {
            date,
            user,
            offset,
            limit,
        } => {
            let service = open_service(&db_path, config, false).await?;
            let articles = service
                .by_date(user.as_deref(), date, offset, limit)
                .await?;
            if articles.is_empty() {
                println!("No articles published on {}", date);
            }
            print_articles(&articles, offset);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readmysources_core::FeedError;

    #[test]
    fn test_import_record_from_labels() {
        let json = r#"{
            "id": "lab1",
            "title": "Labeled",
            "persona": "Critical Thinker",
            "labels": {
                "plain_poeticness": "Balanced",
                "fact_opinion": "Strongly Fact-Based",
                "critique_affirmation": "Balanced",
                "complexity_simplicity": "Balanced",
                "general_detailed": "Somewhat Detailed",
                "informative_entertaining": "Balanced",
                "upside_downside": "Balanced",
                "agreement_counterargument": "Balanced",
                "dry_emotionally_charged": "Balanced",
                "data_narrative": "Balanced",
                "quoted_authorial": "Purely Quoted Statements"
            }
        }"#;
        let record: ImportRecord = serde_json::from_str(json).unwrap();
        let (article, persona) = record.into_article().unwrap();
        assert_eq!(persona, Some(Persona::CriticalThinker));
        let vector = article.feature_vector.unwrap();
        assert_eq!(vector[1], 1.0);
        assert_eq!(vector[4], 4.0);
        assert_eq!(vector[10], 1.0);
    }

    #[test]
    fn test_import_record_wrong_width() {
        let json = r#"{"id": "v1", "title": "Short", "vector": [1, 2, 3]}"#;
        let record: ImportRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(
            record.into_article(),
            Err(FeedError::DimensionMismatch { .. })
        ));
    }
}
