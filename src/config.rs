// Feed Configuration
//
// Tunable constants for the preference-vector learning rule and the
// retrieval pipeline, loaded from TOML with validated defaults.

use crate::storage::SimilarityMetric;
use crate::types::Persona;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Coefficients of the preference-vector update rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Weight of an accepted article in the running mean
    pub accept_weight: u64,

    /// Weight of a neutral article in the running mean
    pub neutral_weight: u64,

    /// Rejection: pull toward the persona centroid, away from the article
    pub centroid_pull: f64,

    /// Rejection: push away from the article, attenuated by distance
    pub distance_repulsion: f64,

    /// Rejection: weight of the exploration noise
    pub noise_weight: f64,

    /// Standard deviation of the per-dimension Gaussian noise
    pub noise_std_dev: f64,

    /// Centroid used when a user has not picked a persona
    pub fallback_persona: Persona,

    /// Persona selection seeds an absent vector with the persona centroid.
    /// The first feedback still replaces it with the article vector.
    pub seed_with_centroid: bool,

    /// Fixed seed for the noise generator; entropy-seeded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            accept_weight: 2,
            neutral_weight: 1,
            centroid_pull: 0.4,
            distance_repulsion: 0.3,
            noise_weight: 0.3,
            noise_std_dev: 0.3,
            fallback_persona: Persona::BalancedEvaluator,
            seed_with_centroid: false,
            noise_seed: None,
        }
    }
}

/// Retrieval and pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Articles per page
    pub page_size: usize,

    /// Feedback count at which similarity retrieval switches on (inclusive)
    pub similarity_threshold: u64,

    /// Minimum candidate pool requested from the similarity search
    pub num_candidates: usize,

    /// Headroom factor applied to offset + limit before adding exclusions
    pub candidate_multiplier: usize,

    /// Distance used for similarity ordering
    pub metric: SimilarityMetric,

    /// Persona collection served to users without a persona
    pub default_persona: Persona,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            page_size: 5,
            similarity_threshold: 5,
            num_candidates: 300,
            candidate_multiplier: 1,
            metric: SimilarityMetric::Cosine,
            default_persona: Persona::CriticalThinker,
        }
    }
}

/// Backing store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_db_path(),
        }
    }
}

/// Default database path under the platform data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("readmysources")
        .join("readmysources.db")
}

impl FeedConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let learning = &self.learning;
        for (name, value) in [
            ("learning.centroid_pull", learning.centroid_pull),
            ("learning.distance_repulsion", learning.distance_repulsion),
            ("learning.noise_weight", learning.noise_weight),
            ("learning.noise_std_dev", learning.noise_std_dev),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}: must be a finite, non-negative number",
                    name
                )));
            }
        }

        if learning.accept_weight == 0 || learning.neutral_weight == 0 {
            return Err(ConfigError::ValidationError(
                "learning: accept_weight and neutral_weight must be positive".to_string(),
            ));
        }

        let retrieval = &self.retrieval;
        if retrieval.page_size == 0 || retrieval.page_size > 100 {
            return Err(ConfigError::ValidationError(
                "retrieval.page_size must be between 1 and 100".to_string(),
            ));
        }

        if retrieval.similarity_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.similarity_threshold must be at least 1".to_string(),
            ));
        }

        if retrieval.num_candidates < retrieval.page_size {
            return Err(ConfigError::ValidationError(
                "retrieval.num_candidates must be at least page_size".to_string(),
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.candidate_multiplier must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FeedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning.centroid_pull, 0.4);
        assert_eq!(config.learning.distance_repulsion, 0.3);
        assert_eq!(config.learning.noise_weight, 0.3);
        assert_eq!(config.learning.noise_std_dev, 0.3);
        assert_eq!(config.retrieval.similarity_threshold, 5);
        assert!(!config.learning.seed_with_centroid);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml_str = r#"
            [learning]
            centroid_pull = 0.5
            fallback_persona = "critical_thinker"
            noise_seed = 7

            [retrieval]
            page_size = 10
            metric = "euclidean"
        "#;

        let config = FeedConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.learning.centroid_pull, 0.5);
        assert_eq!(config.learning.distance_repulsion, 0.3);
        assert_eq!(config.learning.fallback_persona, Persona::CriticalThinker);
        assert_eq!(config.learning.noise_seed, Some(7));
        assert_eq!(config.retrieval.page_size, 10);
        assert_eq!(config.retrieval.metric, SimilarityMetric::Euclidean);
        assert_eq!(config.retrieval.num_candidates, 300);
    }

    #[test]
    fn test_validate_negative_coefficient() {
        let mut config = FeedConfig::default();
        config.learning.noise_weight = -0.1;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("learning.noise_weight"));
    }

    #[test]
    fn test_validate_page_size() {
        let mut config = FeedConfig::default();
        config.retrieval.page_size = 0;
        assert!(config.validate().is_err());

        config.retrieval.page_size = 500;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("page_size must be between"));
    }

    #[test]
    fn test_validate_candidate_pool() {
        let mut config = FeedConfig::default();
        config.retrieval.num_candidates = 2;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("num_candidates"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("feed.toml");

        let mut config = FeedConfig::default();
        config.retrieval.page_size = 8;
        config.to_file(&path).unwrap();

        let loaded = FeedConfig::from_file(&path).unwrap();
        assert_eq!(loaded.retrieval.page_size, 8);
        assert_eq!(loaded.learning.fallback_persona, Persona::BalancedEvaluator);
    }
}
