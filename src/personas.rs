//! Persona reference data
//!
//! - [`PersonaCentroidTable`]: the canonical 11-dimensional centroid of each
//!   persona. Injected into the update engine; never mutated.
//! - [`CollectionRegistry`]: which article collection serves each persona.
//!   Validated against the persona set when built.

use crate::error::{FeedError, Result};
use crate::types::{Persona, StyleVector};
use std::collections::HashMap;
use tracing::debug;

/// Canonical centroids, in `Persona::ALL` order
const DEFAULT_CENTROIDS: [[f64; 11]; 4] = [
    [1.0, 1.0, 3.0, 3.0, 4.0, 1.0, 3.0, 3.0, 1.0, 1.0, 3.0],
    [4.0, 4.0, 3.0, 4.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0, 3.0],
    [2.0, 2.0, 3.0, 3.0, 4.0, 2.0, 3.0, 3.0, 2.0, 2.0, 3.0],
    [3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0],
];

/// Immutable persona -> centroid mapping
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaCentroidTable {
    centroids: [StyleVector; 4],
}

impl PersonaCentroidTable {
    /// Build a table from explicit rows in `Persona::ALL` order
    pub fn new(centroids: [StyleVector; 4]) -> Result<Self> {
        if let Some(bad) = centroids.iter().position(|c| !c.is_finite()) {
            return Err(FeedError::Other(format!(
                "Centroid for {} contains non-finite values",
                Persona::ALL[bad]
            )));
        }
        Ok(Self { centroids })
    }

    pub fn centroid(&self, persona: Persona) -> &StyleVector {
        &self.centroids[persona.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Persona, &StyleVector)> {
        Persona::ALL.into_iter().zip(self.centroids.iter())
    }
}

impl Default for PersonaCentroidTable {
    fn default() -> Self {
        Self {
            centroids: DEFAULT_CENTROIDS.map(StyleVector::new),
        }
    }
}

/// Lookup table from persona to the name of its curated collection
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    collections: HashMap<Persona, String>,
}

impl CollectionRegistry {
    /// Build a registry, failing unless every persona has a collection
    pub fn new(collections: HashMap<Persona, String>) -> Result<Self> {
        for persona in Persona::ALL {
            match collections.get(&persona) {
                Some(name) if !name.trim().is_empty() => {}
                _ => {
                    return Err(FeedError::InvalidPersona(format!(
                        "no collection configured for persona {}",
                        persona
                    )))
                }
            }
        }
        debug!("Collection registry validated for {} personas", collections.len());
        Ok(Self { collections })
    }

    pub fn collection_for(&self, persona: Persona) -> &str {
        // Presence of every persona is checked in `new`
        self.collections
            .get(&persona)
            .map(String::as_str)
            .unwrap_or_else(|| persona.label())
    }
}

impl Default for CollectionRegistry {
    /// Each persona is served from the collection named after its label
    fn default() -> Self {
        Self {
            collections: Persona::ALL
                .into_iter()
                .map(|p| (p, p.label().to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_centroids() {
        let table = PersonaCentroidTable::default();
        assert_eq!(table.centroid(Persona::DataDrivenAnalyst)[0], 1.0);
        assert_eq!(table.centroid(Persona::EngagingStoryteller)[0], 4.0);
        assert_eq!(table.centroid(Persona::CriticalThinker)[5], 2.0);
        assert!(table
            .centroid(Persona::BalancedEvaluator)
            .iter()
            .all(|v| *v == 3.0));
        assert_eq!(table.iter().count(), 4);
    }

    #[test]
    fn test_rejects_non_finite_centroid() {
        let mut rows = DEFAULT_CENTROIDS.map(StyleVector::new);
        let mut bad = rows[2].values();
        bad[4] = f64::NAN;
        rows[2] = StyleVector::new(bad);
        assert!(PersonaCentroidTable::new(rows).is_err());
    }

    #[test]
    fn test_registry_requires_every_persona() {
        let mut map: HashMap<Persona, String> = Persona::ALL
            .into_iter()
            .map(|p| (p, format!("col-{}", p.as_key())))
            .collect();
        let registry = CollectionRegistry::new(map.clone()).unwrap();
        assert_eq!(
            registry.collection_for(Persona::CriticalThinker),
            "col-critical_thinker"
        );

        map.remove(&Persona::EngagingStoryteller);
        assert!(matches!(
            CollectionRegistry::new(map),
            Err(FeedError::InvalidPersona(_))
        ));
    }

    #[test]
    fn test_default_registry_uses_labels() {
        let registry = CollectionRegistry::default();
        assert_eq!(
            registry.collection_for(Persona::DataDrivenAnalyst),
            "Data-Driven Analyst"
        );
    }
}
