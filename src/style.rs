//! Stylistic dimensions and the label scale behind feature vectors
//!
//! The offline labeling pipeline rates each article with one named label per
//! dimension. This module maps those labels onto the integer scale the
//! learning rule and the similarity search operate on.

use crate::error::{FeedError, Result};
use crate::types::{StyleVector, DIMENSIONS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The eleven stylistic dimensions, in vector order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleDimension {
    PlainPoeticness,
    FactOpinion,
    CritiqueAffirmation,
    ComplexitySimplicity,
    GeneralDetailed,
    InformativeEntertaining,
    UpsideDownside,
    AgreementCounterargument,
    DryEmotionallyCharged,
    DataNarrative,
    QuotedAuthorial,
}

impl StyleDimension {
    pub const ALL: [StyleDimension; DIMENSIONS] = [
        StyleDimension::PlainPoeticness,
        StyleDimension::FactOpinion,
        StyleDimension::CritiqueAffirmation,
        StyleDimension::ComplexitySimplicity,
        StyleDimension::GeneralDetailed,
        StyleDimension::InformativeEntertaining,
        StyleDimension::UpsideDownside,
        StyleDimension::AgreementCounterargument,
        StyleDimension::DryEmotionallyCharged,
        StyleDimension::DataNarrative,
        StyleDimension::QuotedAuthorial,
    ];

    /// Field name used by the labeling output
    pub fn key(&self) -> &'static str {
        match self {
            StyleDimension::PlainPoeticness => "plain_poeticness",
            StyleDimension::FactOpinion => "fact_opinion",
            StyleDimension::CritiqueAffirmation => "critique_affirmation",
            StyleDimension::ComplexitySimplicity => "complexity_simplicity",
            StyleDimension::GeneralDetailed => "general_detailed",
            StyleDimension::InformativeEntertaining => "informative_entertaining",
            StyleDimension::UpsideDownside => "upside_downside",
            StyleDimension::AgreementCounterargument => "agreement_counterargument",
            StyleDimension::DryEmotionallyCharged => "dry_emotionally_charged",
            StyleDimension::DataNarrative => "data_narrative",
            StyleDimension::QuotedAuthorial => "quoted_authorial",
        }
    }

    /// Ordered labels; position + 1 is the numeric value
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            StyleDimension::PlainPoeticness => &[
                "Very Plain",
                "Somewhat Plain",
                "Balanced",
                "Somewhat Stylistic",
                "Very Stylistic",
            ],
            StyleDimension::FactOpinion => &[
                "Strongly Fact-Based",
                "Somewhat Fact-Based",
                "Balanced",
                "Somewhat Opinion-Based",
                "Strongly Opinion-Based",
            ],
            StyleDimension::CritiqueAffirmation => &[
                "Strong Critique",
                "Somewhat Critique",
                "Balanced",
                "Somewhat Affirmation",
                "Strong Affirmation",
            ],
            StyleDimension::ComplexitySimplicity => &[
                "Highly Complex",
                "Somewhat Complex",
                "Balanced",
                "Somewhat Simple",
                "Highly Simple",
            ],
            StyleDimension::GeneralDetailed => &[
                "Highly General",
                "Somewhat General",
                "Balanced",
                "Somewhat Detailed",
                "Highly Detailed",
            ],
            StyleDimension::InformativeEntertaining => &[
                "Highly Informative",
                "Somewhat Informative",
                "Balanced",
                "Somewhat Entertaining",
                "Highly Entertaining",
            ],
            StyleDimension::UpsideDownside => &[
                "Strongly Upside",
                "Somewhat Upside",
                "Balanced",
                "Somewhat Downside",
                "Strongly Downside",
            ],
            StyleDimension::AgreementCounterargument => &[
                "Strong Agreement",
                "Some Agreement",
                "Balanced",
                "Some Counterargument",
                "Strong Counterargument",
            ],
            StyleDimension::DryEmotionallyCharged => &[
                "Very Dry",
                "Somewhat Dry",
                "Balanced",
                "Somewhat Emotionally Charged",
                "Very Emotionally Charged",
            ],
            StyleDimension::DataNarrative => &[
                "Strongly Data-Driven",
                "Somewhat Data-Driven",
                "Balanced",
                "Somewhat Narrative-Driven",
                "Strongly Narrative-Driven",
            ],
            StyleDimension::QuotedAuthorial => &[
                "Purely Quoted Statements",
                "Mixed Quoted Statements and Authorial Narrative",
                "Purely Authorial Narrative",
            ],
        }
    }

    /// Numeric value of a label on this dimension's scale
    pub fn score(&self, label: &str) -> Result<u8> {
        let wanted = label.trim();
        self.labels()
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(wanted))
            .map(|pos| pos as u8 + 1)
            .ok_or_else(|| FeedError::InvalidStyleLabel {
                dimension: self.key().to_string(),
                label: label.to_string(),
            })
    }
}

impl std::fmt::Display for StyleDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl StyleVector {
    /// Encode a `{dimension_key: label}` map into a feature vector
    ///
    /// Every dimension must be present. Extra keys are ignored.
    pub fn from_labels(labels: &HashMap<String, String>) -> Result<Self> {
        let mut values = [0.0; DIMENSIONS];
        let mut present = 0;
        for (slot, dimension) in StyleDimension::ALL.iter().enumerate() {
            if let Some(label) = labels.get(dimension.key()) {
                values[slot] = dimension.score(label)? as f64;
                present += 1;
            }
        }
        if present != DIMENSIONS {
            return Err(FeedError::DimensionMismatch {
                expected: DIMENSIONS,
                actual: present,
            });
        }
        Ok(StyleVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced_labels() -> HashMap<String, String> {
        StyleDimension::ALL
            .iter()
            .map(|d| (d.key().to_string(), d.labels()[2].to_string()))
            .collect()
    }

    #[test]
    fn test_balanced_is_three_everywhere() {
        for dimension in StyleDimension::ALL {
            if dimension == StyleDimension::QuotedAuthorial {
                continue;
            }
            assert_eq!(dimension.score("Balanced").unwrap(), 3);
        }
    }

    #[test]
    fn test_quoted_authorial_is_three_point() {
        let d = StyleDimension::QuotedAuthorial;
        assert_eq!(d.score("Purely Quoted Statements").unwrap(), 1);
        assert_eq!(d.score("Purely Authorial Narrative").unwrap(), 3);
        assert!(d.score("Balanced").is_err());
    }

    #[test]
    fn test_from_labels() {
        let mut labels = balanced_labels();
        labels.insert("fact_opinion".into(), "Strongly Fact-Based".into());
        labels.insert("data_narrative".into(), "strongly narrative-driven".into());

        let vector = StyleVector::from_labels(&labels).unwrap();
        assert_eq!(vector[0], 3.0);
        assert_eq!(vector[1], 1.0);
        assert_eq!(vector[9], 5.0);
        // quoted_authorial third label is "Purely Authorial Narrative"
        assert_eq!(vector[10], 3.0);
    }

    #[test]
    fn test_from_labels_rejects_unknown_label() {
        let mut labels = balanced_labels();
        labels.insert("upside_downside".into(), "Sideways".into());
        let err = StyleVector::from_labels(&labels).unwrap_err();
        assert!(matches!(err, FeedError::InvalidStyleLabel { ref dimension, .. } if dimension == "upside_downside"));
    }

    #[test]
    fn test_from_labels_requires_every_dimension() {
        let mut labels = balanced_labels();
        labels.remove("general_detailed");
        assert!(matches!(
            StyleVector::from_labels(&labels),
            Err(FeedError::DimensionMismatch {
                expected: 11,
                actual: 10
            })
        ));
    }
}
