//! Permutation feature importance over the preprocessed output fields

use super::gbdt::BoostedTreeClassifier;
use super::metrics::ScoringMetric;
use crate::error::{Result, TabtuneError};
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Importance of one output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    /// Mean drop in score when the field is shuffled
    pub mean: f64,
    pub std: f64,
    pub raw: Vec<f64>,
}

/// Permutation importance calculator
#[derive(Debug, Clone)]
pub struct PermutationImportance {
    n_repeats: usize,
    seed: u64,
    metric: ScoringMetric,
}

impl PermutationImportance {
    pub fn new(metric: ScoringMetric) -> Self {
        Self {
            n_repeats: 5,
            seed: 42,
            metric,
        }
    }

    /// Set number of permutation repeats; `compute` rejects zero
    pub fn with_n_repeats(mut self, n_repeats: usize) -> Self {
        self.n_repeats = n_repeats;
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Importance per column of `x`, sorted by descending mean.
    ///
    /// Each column gets its own RNG derived from the seed, so results do not
    /// depend on thread scheduling.
    pub fn compute(
        &self,
        model: &BoostedTreeClassifier,
        x: &Array2<f64>,
        y: &Array1<f64>,
        names: &[String],
    ) -> Result<Vec<FeatureImportance>> {
        if self.n_repeats == 0 {
            return Err(TabtuneError::ConfigError(
                "permutation importance needs at least one repeat".to_string(),
            ));
        }
        if names.len() != x.ncols() {
            return Err(TabtuneError::DataError(format!(
                "{} names for {} columns",
                names.len(),
                x.ncols()
            )));
        }
        let baseline = self.metric.score(y, &model.predict_positive(x)?)?;

        let mut importances = (0..x.ncols())
            .into_par_iter()
            .map(|feature| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(feature as u64));
                let mut raw = Vec::with_capacity(self.n_repeats);
                for _ in 0..self.n_repeats {
                    let mut permuted = x.clone();
                    let mut column = x.column(feature).to_vec();
                    column.shuffle(&mut rng);
                    for (i, v) in column.into_iter().enumerate() {
                        permuted[[i, feature]] = v;
                    }
                    let score = self.metric.score(y, &model.predict_positive(&permuted)?)?;
                    raw.push(baseline - score);
                }
                let mean = raw.iter().sum::<f64>() / raw.len() as f64;
                let variance = raw.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / raw.len() as f64;
                Ok(FeatureImportance {
                    name: names[feature].clone(),
                    mean,
                    std: variance.sqrt(),
                    raw,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        importances.sort_by(|a, b| b.mean.partial_cmp(&a.mean).unwrap_or(Ordering::Equal));
        Ok(importances)
    }
}
