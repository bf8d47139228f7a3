//! Online learning of user preference vectors
//!
//! Feedback on an article nudges the user's 11-dimensional preference vector.
//! Accepts and neutrals fold the article into a weighted running mean;
//! rejections push away from the article and toward the persona centroid,
//! with a little Gaussian noise for exploration.

pub mod update;

pub use update::{
    weighted_mean, EmbeddingUpdateEngine, GaussianNoise, NoiseSource, RejectionTerms,
    UpdateOutcome, UpdateRegime, ZeroNoise,
};
