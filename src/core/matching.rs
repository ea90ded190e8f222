use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use crate::core::types::EnrolledIdentity;

/// Embedding distance; lower always means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

/// Infinite for embeddings of different lengths, so they never match.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    1.0 - cosine_similarity(a, b)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub name: String,
    pub distance: f32,
}

/// The enrolled set used for matching. Names are unique; the first
/// identity with a given name wins.
#[derive(Debug, Clone, Default)]
pub struct IdentitySet {
    identities: Vec<EnrolledIdentity>,
}

impl IdentitySet {
    pub fn new(identities: Vec<EnrolledIdentity>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(identities.len());

        for identity in identities {
            if identity.embedding.is_empty() {
                tracing::warn!("Skipping {}: empty embedding", identity.name);
                continue;
            }
            if !seen.insert(identity.name.clone()) {
                tracing::warn!("Skipping duplicate known face name: {}", identity.name);
                continue;
            }
            kept.push(identity);
        }

        Self { identities: kept }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrolledIdentity> {
        self.identities.iter()
    }

    /// Closest identity within `tolerance`, or `None`.
    ///
    /// Every candidate is scored; when several pass the tolerance the one
    /// with the smallest distance wins, regardless of enrollment order.
    pub fn best_match<F>(&self, embedding: &[f32], tolerance: f32, distance: F) -> Option<IdentityMatch>
    where
        F: Fn(&[f32], &[f32]) -> f32,
    {
        let mut best: Option<(&EnrolledIdentity, f32)> = None;

        for identity in &self.identities {
            let d = distance(&identity.embedding, embedding);
            if !d.is_finite() || d > tolerance {
                continue;
            }
            match best {
                Some((_, best_d)) if best_d <= d => {}
                _ => best = Some((identity, d)),
            }
        }

        best.map(|(identity, d)| IdentityMatch {
            name: identity.name.clone(),
            distance: d,
        })
    }
}
