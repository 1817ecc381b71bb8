//! Search configuration

use crate::training::ScoringMetric;
use serde::{Deserialize, Serialize};

/// How each candidate is cross-validated during a grid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of cross-validation folds per candidate
    pub cv_folds: usize,

    /// Shuffle rows before assigning folds
    pub shuffle: bool,

    /// Seed for fold assignment
    pub random_state: Option<u64>,

    /// Metric maximized by the search
    pub scoring: ScoringMetric,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            shuffle: true,
            random_state: Some(42),
            scoring: ScoringMetric::F1Macro,
        }
    }
}

impl SearchConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the number of folds
    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Builder method to toggle shuffling
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Builder method to set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Builder method to set the scoring metric
    pub fn with_scoring(mut self, scoring: ScoringMetric) -> Self {
        self.scoring = scoring;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.cv_folds, 5);
        assert!(config.shuffle);
        assert_eq!(config.random_state, Some(42));
        assert_eq!(config.scoring, ScoringMetric::F1Macro);
    }

    #[test]
    fn test_builder_pattern() {
        let config = SearchConfig::new()
            .with_cv_folds(3)
            .with_shuffle(false)
            .with_scoring(ScoringMetric::RocAuc);
        assert_eq!(config.cv_folds, 3);
        assert!(!config.shuffle);
        assert_eq!(config.scoring, ScoringMetric::RocAuc);
    }
}
