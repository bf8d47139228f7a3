//! Preference-vector update rule.
//!
//! Four regimes, selected by the current state and the feedback score:
//!
//! | state / score        | new vector                                             | count     |
//! |----------------------|--------------------------------------------------------|-----------|
//! | no vector or n = 0   | article vector                                         | 1         |
//! | accept (+1)          | `(cur * n + art * w_a) / (n + w_a)`                    | `n + w_a` |
//! | neutral (0)          | `(cur * n + art * w_n) / (n + w_n)`                    | `n + w_n` |
//! | reject (-1)          | `cur + p*(c - art) + r*(cur - art)/(1 + d) + k*noise`   | `n + 1`   |
//!
//! `c` is the centroid of the user's persona, `d` the Euclidean distance
//! between `cur` and `art`, and `noise` a fresh zero-mean Gaussian sample per
//! dimension. `w_a`, `w_n`, `p`, `r`, `k` and the noise deviation come from
//! [`LearningConfig`].

use crate::config::LearningConfig;
use crate::error::{FeedError, Result};
use crate::personas::PersonaCentroidTable;
use crate::types::{FeedbackScore, Persona, StyleVector, DIMENSIONS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Source of per-dimension exploration noise
pub trait NoiseSource: Send {
    /// Draw one zero-mean sample per dimension with the given deviation
    fn sample(&mut self, std_dev: f64) -> [f64; DIMENSIONS];
}

/// Gaussian noise from a seedable RNG
pub struct GaussianNoise {
    rng: StdRng,
}

impl GaussianNoise {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl NoiseSource for GaussianNoise {
    fn sample(&mut self, std_dev: f64) -> [f64; DIMENSIONS] {
        let mut out = [0.0; DIMENSIONS];
        for slot in out.iter_mut() {
            // Box-Muller transform
            let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = self.rng.gen_range(0.0..1.0);
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            *slot = std_dev * z;
        }
        out
    }
}

/// Noise source that always returns zero; makes rejection deterministic
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn sample(&mut self, _std_dev: f64) -> [f64; DIMENSIONS] {
        [0.0; DIMENSIONS]
    }
}

/// Which branch of the rule produced an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateRegime {
    Bootstrap,
    Accept,
    Neutral,
    Reject,
}

impl std::fmt::Display for UpdateRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateRegime::Bootstrap => write!(f, "bootstrap"),
            UpdateRegime::Accept => write!(f, "accept"),
            UpdateRegime::Neutral => write!(f, "neutral"),
            UpdateRegime::Reject => write!(f, "reject"),
        }
    }
}

/// Result of one update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateOutcome {
    pub vector: StyleVector,
    pub feedback_count: u64,
    pub regime: UpdateRegime,
}

/// Additive terms of a rejection update, exposed for inspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionTerms {
    pub distance: f64,
    pub centroid_pull: [f64; DIMENSIONS],
    pub repulsion: [f64; DIMENSIONS],
    pub noise: [f64; DIMENSIONS],
}

/// Computes the next preference vector from one piece of feedback
///
/// Pure apart from the noise draw; persistence is the caller's job.
pub struct EmbeddingUpdateEngine {
    centroids: Arc<PersonaCentroidTable>,
    config: LearningConfig,
    noise: Mutex<Box<dyn NoiseSource>>,
}

impl EmbeddingUpdateEngine {
    /// Create an engine whose noise source follows `config.noise_seed`
    pub fn new(centroids: Arc<PersonaCentroidTable>, config: LearningConfig) -> Self {
        let noise: Box<dyn NoiseSource> = match config.noise_seed {
            Some(seed) => Box::new(GaussianNoise::from_seed(seed)),
            None => Box::new(GaussianNoise::from_entropy()),
        };
        Self::with_noise(centroids, config, noise)
    }

    pub fn with_noise(
        centroids: Arc<PersonaCentroidTable>,
        config: LearningConfig,
        noise: Box<dyn NoiseSource>,
    ) -> Self {
        Self {
            centroids,
            config,
            noise: Mutex::new(noise),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn centroids(&self) -> &PersonaCentroidTable {
        &self.centroids
    }

    /// Centroid that anchors rejections for this persona (or the fallback)
    pub fn anchor(&self, persona: Option<Persona>) -> &StyleVector {
        self.centroids
            .centroid(persona.unwrap_or(self.config.fallback_persona))
    }

    /// Update from an untyped article vector, checking its width first
    pub fn update(
        &self,
        current: Option<&StyleVector>,
        article_vector: &[f64],
        score: FeedbackScore,
        feedback_count: u64,
        persona: Option<Persona>,
    ) -> Result<UpdateOutcome> {
        let article = StyleVector::try_from_slice(article_vector)?;
        self.apply(current, &article, score, feedback_count, persona)
    }

    /// Update from a validated article vector
    pub fn apply(
        &self,
        current: Option<&StyleVector>,
        article: &StyleVector,
        score: FeedbackScore,
        feedback_count: u64,
        persona: Option<Persona>,
    ) -> Result<UpdateOutcome> {
        // A vector without any feedback behind it (a seeded centroid) is
        // replaced just like an absent one
        let current = match current {
            Some(current) if feedback_count > 0 => current,
            _ => {
                debug!("No learned vector, seeding from article (score {} ignored)", score);
                return Ok(UpdateOutcome {
                    vector: *article,
                    feedback_count: 1,
                    regime: UpdateRegime::Bootstrap,
                });
            }
        };

        let outcome = match score {
            FeedbackScore::Accept => {
                let weight = self.config.accept_weight;
                UpdateOutcome {
                    vector: weighted_mean(current, feedback_count, article, weight),
                    feedback_count: feedback_count.saturating_add(weight),
                    regime: UpdateRegime::Accept,
                }
            }
            FeedbackScore::Neutral => {
                let weight = self.config.neutral_weight;
                UpdateOutcome {
                    vector: weighted_mean(current, feedback_count, article, weight),
                    feedback_count: feedback_count.saturating_add(weight),
                    regime: UpdateRegime::Neutral,
                }
            }
            FeedbackScore::Reject => {
                let terms = self.rejection_terms(current, article, persona)?;
                let mut next = current.values();
                for (i, value) in next.iter_mut().enumerate() {
                    *value += terms.centroid_pull[i] + terms.repulsion[i] + terms.noise[i];
                }
                UpdateOutcome {
                    vector: StyleVector::new(next),
                    feedback_count: feedback_count.saturating_add(1),
                    regime: UpdateRegime::Reject,
                }
            }
        };

        debug!(
            "Applied {} update: count {} -> {}",
            outcome.regime, feedback_count, outcome.feedback_count
        );
        Ok(outcome)
    }

    /// The three additive terms of a rejection, with a fresh noise draw
    pub fn rejection_terms(
        &self,
        current: &StyleVector,
        article: &StyleVector,
        persona: Option<Persona>,
    ) -> Result<RejectionTerms> {
        let centroid = self.anchor(persona);
        let distance = current.euclidean_distance(article);
        let attenuation = 1.0 / (1.0 + distance);

        let raw_noise = self
            .noise
            .lock()
            .map_err(|e| FeedError::Other(format!("Noise source poisoned: {}", e)))?
            .sample(self.config.noise_std_dev);

        let mut terms = RejectionTerms {
            distance,
            centroid_pull: [0.0; DIMENSIONS],
            repulsion: [0.0; DIMENSIONS],
            noise: [0.0; DIMENSIONS],
        };
        for i in 0..DIMENSIONS {
            terms.centroid_pull[i] = self.config.centroid_pull * (centroid[i] - article[i]);
            terms.repulsion[i] =
                self.config.distance_repulsion * (current[i] - article[i]) * attenuation;
            terms.noise[i] = self.config.noise_weight * raw_noise[i];
        }
        Ok(terms)
    }
}

/// Running mean where the new sample counts `weight` times
pub fn weighted_mean(
    current: &StyleVector,
    count: u64,
    article: &StyleVector,
    weight: u64,
) -> StyleVector {
    let n = count as f64;
    let w = weight as f64;
    let mut out = [0.0; DIMENSIONS];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (current[i] * n + article[i] * w) / (n + w);
    }
    StyleVector::new(out)
}

fn norm(values: &[f64; DIMENSIONS]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

impl RejectionTerms {
    /// Magnitude of the deterministic part of the step
    pub fn deterministic_norm(&self) -> f64 {
        let mut step = [0.0; DIMENSIONS];
        for (i, slot) in step.iter_mut().enumerate() {
            *slot = self.centroid_pull[i] + self.repulsion[i];
        }
        norm(&step)
    }

    pub fn repulsion_norm(&self) -> f64 {
        norm(&self.repulsion)
    }

    pub fn noise_norm(&self) -> f64 {
        norm(&self.noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYST: [f64; 11] = [1.0, 1.0, 3.0, 3.0, 4.0, 1.0, 3.0, 3.0, 1.0, 1.0, 3.0];
    const STORYTELLER: [f64; 11] = [4.0, 4.0, 3.0, 4.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0, 3.0];

    fn engine() -> EmbeddingUpdateEngine {
        EmbeddingUpdateEngine::with_noise(
            Arc::new(PersonaCentroidTable::default()),
            LearningConfig::default(),
            Box::new(ZeroNoise),
        )
    }

    #[test]
    fn test_bootstrap_ignores_score() {
        let engine = engine();
        let article = StyleVector::new(STORYTELLER);
        for score in [
            FeedbackScore::Reject,
            FeedbackScore::Neutral,
            FeedbackScore::Accept,
        ] {
            let outcome = engine.apply(None, &article, score, 0, None).unwrap();
            assert_eq!(outcome.vector, article);
            assert_eq!(outcome.feedback_count, 1);
            assert_eq!(outcome.regime, UpdateRegime::Bootstrap);
        }
    }

    #[test]
    fn test_seeded_vector_without_feedback_bootstraps() {
        let engine = engine();
        let seeded = *engine.anchor(Some(Persona::DataDrivenAnalyst));
        let article = StyleVector::new(STORYTELLER);
        let outcome = engine
            .apply(
                Some(&seeded),
                &article,
                FeedbackScore::Reject,
                0,
                Some(Persona::DataDrivenAnalyst),
            )
            .unwrap();
        assert_eq!(outcome.vector, article);
        assert_eq!(outcome.feedback_count, 1);
        assert_eq!(outcome.regime, UpdateRegime::Bootstrap);
    }

    #[test]
    fn test_neutral_running_mean() {
        let engine = engine();
        let current = StyleVector::new(ANALYST);
        let outcome = engine
            .apply(
                Some(&current),
                &StyleVector::new(STORYTELLER),
                FeedbackScore::Neutral,
                1,
                Some(Persona::DataDrivenAnalyst),
            )
            .unwrap();
        assert_eq!(outcome.vector[0], 2.5);
        assert_eq!(outcome.vector[2], 3.0);
        assert_eq!(outcome.feedback_count, 2);
    }

    #[test]
    fn test_accept_double_weight() {
        let engine = engine();
        let current = StyleVector::new(ANALYST);
        let outcome = engine
            .apply(
                Some(&current),
                &StyleVector::new(STORYTELLER),
                FeedbackScore::Accept,
                1,
                Some(Persona::DataDrivenAnalyst),
            )
            .unwrap();
        assert!((outcome.vector[0] - 3.0).abs() < 1e-12);
        assert_eq!(outcome.feedback_count, 3);
    }

    #[test]
    fn test_accept_moves_closer_than_neutral() {
        let engine = engine();
        let article = StyleVector::new(STORYTELLER);
        for count in [1u64, 2, 5, 40] {
            let current = StyleVector::new(ANALYST);
            let accepted = engine
                .apply(Some(&current), &article, FeedbackScore::Accept, count, None)
                .unwrap();
            let neutral = engine
                .apply(Some(&current), &article, FeedbackScore::Neutral, count, None)
                .unwrap();
            assert!(
                accepted.vector.euclidean_distance(&article)
                    < neutral.vector.euclidean_distance(&article)
            );
        }
    }

    #[test]
    fn test_update_rejects_wrong_width() {
        let engine = engine();
        let err = engine
            .update(None, &[1.0; 10], FeedbackScore::Accept, 0, None)
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::DimensionMismatch {
                expected: 11,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_reject_composite_terms() {
        let engine = engine();
        let current = StyleVector::new([3.0; 11]);
        let article = StyleVector::new(STORYTELLER);
        let outcome = engine
            .apply(
                Some(&current),
                &article,
                FeedbackScore::Reject,
                4,
                Some(Persona::DataDrivenAnalyst),
            )
            .unwrap();

        let d = current.euclidean_distance(&article);
        // dimension 0: centroid 1, article 4, current 3
        let expected = 3.0 + 0.4 * (1.0 - 4.0) + 0.3 * (3.0 - 4.0) * (1.0 / (1.0 + d));
        assert!((outcome.vector[0] - expected).abs() < 1e-12);
        // dimension 2: centroid 3, article 3, current 3 -> no movement
        assert_eq!(outcome.vector[2], 3.0);
        assert_eq!(outcome.feedback_count, 5);
        assert_eq!(outcome.regime, UpdateRegime::Reject);
    }

    #[test]
    fn test_reject_without_persona_uses_fallback() {
        let engine = engine();
        let current = StyleVector::new(ANALYST);
        let article = StyleVector::new(ANALYST);
        let outcome = engine
            .apply(Some(&current), &article, FeedbackScore::Reject, 3, None)
            .unwrap();
        // d = 0, repulsion vanishes; pull toward balanced (3.0) from 1.0
        assert!((outcome.vector[0] - (1.0 + 0.4 * 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_rejection_step_is_bounded() {
        let engine = engine();
        let article = StyleVector::new(STORYTELLER);
        let centroid = *engine.anchor(Some(Persona::CriticalThinker));
        let pull_bound = 0.4 * centroid.euclidean_distance(&article);

        let mut current = StyleVector::new([3.5; 11]);
        let mut count = 5;
        let mut last_distance = current.euclidean_distance(&article);
        for _ in 0..50 {
            let terms = engine
                .rejection_terms(&current, &article, Some(Persona::CriticalThinker))
                .unwrap();
            // repulsion magnitude is 0.3 * d / (1 + d) < 0.3
            assert!(terms.repulsion_norm() < 0.3);
            assert!(terms.deterministic_norm() <= pull_bound + 0.3 + 1e-9);
            assert_eq!(terms.noise_norm(), 0.0);

            let outcome = engine
                .apply(
                    Some(&current),
                    &article,
                    FeedbackScore::Reject,
                    count,
                    Some(Persona::CriticalThinker),
                )
                .unwrap();
            let distance = outcome.vector.euclidean_distance(&article);
            // rejection never moves the vector toward the rejected article here
            assert!(distance >= last_distance);
            last_distance = distance;
            current = outcome.vector;
            count = outcome.feedback_count;
        }
        assert_eq!(count, 55);
    }

    #[test]
    fn test_gaussian_noise_statistics() {
        let mut noise = GaussianNoise::from_seed(42);
        let mut samples = Vec::new();
        for _ in 0..2000 {
            samples.extend_from_slice(&noise.sample(0.3));
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.02, "mean {}", mean);
        assert!((var.sqrt() - 0.3).abs() < 0.02, "std {}", var.sqrt());
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let mut a = GaussianNoise::from_seed(9);
        let mut b = GaussianNoise::from_seed(9);
        assert_eq!(a.sample(0.3), b.sample(0.3));
    }

    #[test]
    fn test_reject_noise_is_weighted() {
        let mut config = LearningConfig::default();
        config.noise_seed = Some(11);
        let engine = EmbeddingUpdateEngine::new(Arc::new(PersonaCentroidTable::default()), config);
        let current = StyleVector::new(ANALYST);
        let terms = engine
            .rejection_terms(&current, &current, Some(Persona::DataDrivenAnalyst))
            .unwrap();

        let mut reference = GaussianNoise::from_seed(11);
        let raw = reference.sample(0.3);
        for i in 0..DIMENSIONS {
            assert!((terms.noise[i] - 0.3 * raw[i]).abs() < 1e-12);
        }
    }
}
