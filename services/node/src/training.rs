//! Trainer and dataset boundaries.
//!
//! The statistical fitting procedure and dataset loading are external
//! collaborators: this module defines the capability traits the actors
//! consume and ships deterministic stand-ins for tests and local runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use fedmesh_wire::ModelWeights;
use serde::{Deserialize, Serialize};

/// A labeled dataset slice for one team: row-major feature matrix plus
/// binary labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamDataset {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

impl TeamDataset {
    pub fn new(features: Vec<Vec<f64>>, labels: Vec<u8>) -> Self {
        Self { features, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct label classes present. Training needs at least 2.
    pub fn class_count(&self) -> usize {
        let mut seen = [false; 256];
        let mut count = 0;
        for &label in &self.labels {
            if !seen[label as usize] {
                seen[label as usize] = true;
                count += 1;
            }
        }
        count
    }
}

/// The model-fitting capability.
pub trait Trainer: Send + Sync {
    /// Fit a weight vector to the given slice.
    fn fit(&self, data: &TeamDataset) -> ModelWeights;

    /// Proximal variant: penalize divergence from `reference` with
    /// coefficient `mu`.
    fn fit_fedprox(&self, data: &TeamDataset, mu: f64, reference: &ModelWeights) -> ModelWeights;
}

/// Dataset access by team.
pub trait DatasetProvider: Send + Sync {
    fn team_slice(&self, team: &str) -> Option<TeamDataset>;
}

/// Deterministic trainer stand-in: per-feature class-mean difference.
///
/// `coef[j]` is the mean of feature `j` over positive rows minus the mean
/// over negative rows; the intercept is the positive-label fraction
/// centered at zero. Deterministic for a given slice, which the gossip
/// convergence tests rely on.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockTrainer;

impl Trainer for MockTrainer {
    fn fit(&self, data: &TeamDataset) -> ModelWeights {
        let width = data.features.iter().map(Vec::len).max().unwrap_or(0);
        let mut pos_sum = vec![0.0; width];
        let mut neg_sum = vec![0.0; width];
        let mut pos_n = 0usize;
        let mut neg_n = 0usize;

        for (row, &label) in data.features.iter().zip(&data.labels) {
            let (sum, n) = if label > 0 {
                (&mut pos_sum, &mut pos_n)
            } else {
                (&mut neg_sum, &mut neg_n)
            };
            for (j, v) in row.iter().enumerate() {
                sum[j] += v;
            }
            *n += 1;
        }

        let coef = (0..width)
            .map(|j| {
                let pos = if pos_n > 0 { pos_sum[j] / pos_n as f64 } else { 0.0 };
                let neg = if neg_n > 0 { neg_sum[j] / neg_n as f64 } else { 0.0 };
                pos - neg
            })
            .collect();
        let total = (pos_n + neg_n).max(1) as f64;
        let intercept = pos_n as f64 / total - 0.5;
        ModelWeights::new(coef, intercept)
    }

    fn fit_fedprox(&self, data: &TeamDataset, mu: f64, reference: &ModelWeights) -> ModelWeights {
        let local = self.fit(data);
        crate::aggregate::blend(&local, reference, mu)
    }
}

/// In-memory dataset provider: a fixed team → slice map.
#[derive(Debug, Default, Clone)]
pub struct StaticDataset {
    slices: HashMap<String, TeamDataset>,
}

impl StaticDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, team: impl Into<String>, slice: TeamDataset) {
        self.slices.insert(team.into(), slice);
    }

    /// Load a `{team: {features, labels}}` JSON document.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let slices: HashMap<String, TeamDataset> = serde_json::from_str(&raw)?;
        Ok(Self { slices })
    }

    pub fn teams(&self) -> Vec<String> {
        let mut teams: Vec<String> = self.slices.keys().cloned().collect();
        teams.sort();
        teams
    }

    /// All slices concatenated, in team order. Gossip nodes train on their
    /// whole local holding rather than per-team cuts.
    pub fn merged(&self) -> TeamDataset {
        let mut merged = TeamDataset::default();
        for team in self.teams() {
            if let Some(slice) = self.slices.get(&team) {
                merged.features.extend(slice.features.iter().cloned());
                merged.labels.extend(slice.labels.iter().copied());
            }
        }
        merged
    }

    pub fn into_provider(self) -> Arc<dyn DatasetProvider> {
        Arc::new(self)
    }
}

impl DatasetProvider for StaticDataset {
    fn team_slice(&self, team: &str) -> Option<TeamDataset> {
        self.slices.get(team).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class_slice() -> TeamDataset {
        TeamDataset::new(
            vec![vec![1.0, 0.0], vec![3.0, 2.0], vec![0.0, 1.0], vec![0.0, 3.0]],
            vec![1, 1, 0, 0],
        )
    }

    #[test]
    fn mock_trainer_is_deterministic() {
        let slice = two_class_slice();
        let a = MockTrainer.fit(&slice);
        let b = MockTrainer.fit(&slice);
        assert_eq!(a, b);
        // positive mean [2, 1], negative mean [0, 2]
        assert_eq!(a.coef, vec![2.0, -1.0]);
        assert_eq!(a.intercept, 0.0);
    }

    #[test]
    fn fedprox_pulls_toward_reference() {
        let slice = two_class_slice();
        let reference = ModelWeights::new(vec![0.0, 0.0], 1.0);
        let proximal = MockTrainer.fit_fedprox(&slice, 0.5, &reference);
        assert_eq!(proximal.coef, vec![1.0, -0.5]);
        assert_eq!(proximal.intercept, 0.5);
    }

    #[test]
    fn class_count_detects_degenerate_slices() {
        let one_class = TeamDataset::new(vec![vec![1.0]], vec![1]);
        assert_eq!(one_class.class_count(), 1);
        assert_eq!(two_class_slice().class_count(), 2);
    }

    #[test]
    fn static_dataset_lookup() {
        let mut data = StaticDataset::new();
        data.insert("BOS", two_class_slice());
        assert!(data.team_slice("BOS").is_some());
        assert!(data.team_slice("MIA").is_none());
        assert_eq!(data.teams(), vec!["BOS".to_string()]);
    }

    #[test]
    fn merged_concatenates_in_team_order() {
        let mut data = StaticDataset::new();
        data.insert("MIA", TeamDataset::new(vec![vec![2.0]], vec![0]));
        data.insert("BOS", TeamDataset::new(vec![vec![1.0]], vec![1]));
        let merged = data.merged();
        assert_eq!(merged.features, vec![vec![1.0], vec![2.0]]);
        assert_eq!(merged.labels, vec![1, 0]);
    }

    #[test]
    fn loads_dataset_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teams.json");
        std::fs::write(
            &path,
            r#"{"BOS": {"features": [[1.0, 2.0], [0.0, 0.5]], "labels": [1, 0]}}"#,
        )
        .unwrap();

        let data = StaticDataset::from_path(&path).unwrap();
        assert_eq!(data.teams(), vec!["BOS".to_string()]);
        let slice = data.team_slice("BOS").unwrap();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.class_count(), 2);
    }
}
