//! Leaf-wise gradient boosted trees for binary classification
//!
//! Trees grow best-first: the leaf with the largest split gain is expanded
//! until `num_leaves` is reached. Positive samples are weighted by
//! `scale_pos_weight` in both gradients and hessians.

use crate::error::{Result, TabtuneError};
use crate::optimizer::{ParamCandidate, ParamValue, ParameterGrid};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Prefix accepted on grid keys, as in `model__num_leaves`
pub const PARAM_PREFIX: &str = "model__";

/// Hyperparameter names understood by [`BoostingParams::from_candidate`]
pub const KNOWN_PARAMS: &[&str] = &[
    "n_estimators",
    "learning_rate",
    "num_leaves",
    "max_depth",
    "min_child_samples",
    "min_child_weight",
    "reg_alpha",
    "reg_lambda",
    "scale_pos_weight",
    "subsample",
    "colsample_bytree",
    "random_state",
];

/// Immutable estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_child_samples: usize,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    /// Weight applied to positive-class samples
    pub scale_pos_weight: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 250,
            learning_rate: 0.01,
            num_leaves: 60,
            max_depth: None,
            min_child_samples: 20,
            min_child_weight: 1e-3,
            reg_alpha: 0.0,
            reg_lambda: 0.0,
            scale_pos_weight: 0.55,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 42,
        }
    }
}

impl BoostingParams {
    /// Build a fresh configuration from `base` overridden by `candidate`.
    ///
    /// `base` is never modified; every candidate gets its own value.
    pub fn from_candidate(base: &BoostingParams, candidate: &ParamCandidate) -> Result<Self> {
        let mut params = base.clone();
        for (key, value) in candidate.iter() {
            params.set(key, value)?;
        }
        params.validate()?;
        Ok(params)
    }

    /// Fail on grid keys that no estimator parameter answers to
    pub fn check_grid(grid: &ParameterGrid) -> Result<()> {
        let unknown: Vec<&str> = grid
            .names()
            .filter(|name| !KNOWN_PARAMS.contains(&strip_prefix(name)))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(TabtuneError::ConfigError(format!(
                "unknown hyperparameters in grid: {}",
                unknown.join(", ")
            )))
        }
    }

    fn set(&mut self, key: &str, value: &ParamValue) -> Result<()> {
        let name = strip_prefix(key);
        let bad = || {
            TabtuneError::ConfigError(format!("invalid value '{}' for hyperparameter '{}'", value, key))
        };
        let as_count = || value.as_i64().filter(|v| *v >= 0).map(|v| v as usize).ok_or_else(bad);
        let as_real = || value.as_f64().ok_or_else(bad);

        match name {
            "n_estimators" => self.n_estimators = as_count()?,
            "learning_rate" => self.learning_rate = as_real()?,
            "num_leaves" => self.num_leaves = as_count()?,
            "max_depth" => {
                // LightGBM convention: a non-positive depth means unlimited
                let depth = value.as_i64().ok_or_else(bad)?;
                self.max_depth = if depth > 0 { Some(depth as usize) } else { None };
            }
            "min_child_samples" => self.min_child_samples = as_count()?,
            "min_child_weight" => self.min_child_weight = as_real()?,
            "reg_alpha" => self.reg_alpha = as_real()?,
            "reg_lambda" => self.reg_lambda = as_real()?,
            "scale_pos_weight" => self.scale_pos_weight = as_real()?,
            "subsample" => self.subsample = as_real()?,
            "colsample_bytree" => self.colsample_bytree = as_real()?,
            "random_state" => self.random_state = as_count()? as u64,
            _ => {
                return Err(TabtuneError::ConfigError(format!(
                    "unknown hyperparameter '{}'",
                    key
                )))
            }
        }
        Ok(())
    }

    /// Range checks on every parameter
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(TabtuneError::ConfigError(msg.to_string()));
        if self.n_estimators == 0 {
            return fail("n_estimators must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate must be positive");
        }
        if self.num_leaves < 2 {
            return fail("num_leaves must be greater than 1");
        }
        if !(self.scale_pos_weight > 0.0) {
            return fail("scale_pos_weight must be positive");
        }
        if !(self.reg_alpha >= 0.0) || !(self.reg_lambda >= 0.0) || !(self.min_child_weight >= 0.0) {
            return fail("regularization terms must be non-negative");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return fail("colsample_bytree must be in (0, 1]");
        }
        Ok(())
    }
}

fn strip_prefix(key: &str) -> &str {
    key.strip_prefix(PARAM_PREFIX).unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, sample: ArrayView1<f64>) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }

    fn count_splits(&self, counts: &mut [usize]) {
        if let TreeNode::Split {
            feature,
            left,
            right,
            ..
        } = self
        {
            counts[*feature] += 1;
            left.count_splits(counts);
            right.count_splits(counts);
        }
    }
}

fn leaf_weight(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g.abs() <= alpha {
        0.0
    } else {
        g - alpha * g.signum()
    };
    -g_adj / (h + lambda).max(1e-12)
}

fn gain_term(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g.abs() <= alpha {
        0.0
    } else {
        g - alpha * g.signum()
    };
    g_adj * g_adj / (h + lambda).max(1e-12)
}

struct Grad<'a> {
    g: &'a [f64],
    h: &'a [f64],
}

impl Grad<'_> {
    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.g[i], h + self.h[i]))
    }

    fn leaf(&self, indices: &[usize], params: &BoostingParams) -> TreeNode {
        let (g, h) = self.sums(indices);
        TreeNode::Leaf {
            value: leaf_weight(g, h, params.reg_lambda, params.reg_alpha),
        }
    }
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

fn best_split_for_feature(
    x: &Array2<f64>,
    grad: &Grad,
    indices: &[usize],
    feature: usize,
    params: &BoostingParams,
) -> Option<Candidate> {
    if indices.len() < 2 {
        return None;
    }
    let mut sorted: Vec<(usize, f64)> = indices.iter().map(|&i| (i, x[[i, feature]])).collect();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let (total_g, total_h) = grad.sums(indices);
    let parent = gain_term(total_g, total_h, params.reg_lambda, params.reg_alpha);
    let min_samples = params.min_child_samples.max(1);

    let mut left_g = 0.0;
    let mut left_h = 0.0;
    let mut best_gain = 0.0;
    let mut best: Option<(f64, usize)> = None;

    for i in 0..sorted.len() - 1 {
        left_g += grad.g[sorted[i].0];
        left_h += grad.h[sorted[i].0];
        let right_g = total_g - left_g;
        let right_h = total_h - left_h;

        if i + 1 < min_samples || sorted.len() - i - 1 < min_samples {
            continue;
        }
        if left_h < params.min_child_weight || right_h < params.min_child_weight {
            continue;
        }
        if sorted[i].1 == sorted[i + 1].1 {
            continue;
        }

        let gain = gain_term(left_g, left_h, params.reg_lambda, params.reg_alpha)
            + gain_term(right_g, right_h, params.reg_lambda, params.reg_alpha)
            - parent;
        if gain > best_gain {
            best_gain = gain;
            best = Some(((sorted[i].1 + sorted[i + 1].1) / 2.0, i + 1));
        }
    }

    best.map(|(threshold, pos)| Candidate {
        feature,
        threshold,
        gain: best_gain,
        left: sorted[..pos].iter().map(|&(i, _)| i).collect(),
        right: sorted[pos..].iter().map(|&(i, _)| i).collect(),
    })
}

fn best_split(
    x: &Array2<f64>,
    grad: &Grad,
    indices: &[usize],
    features: &[usize],
    params: &BoostingParams,
) -> Option<Candidate> {
    if indices.len() < params.min_child_samples.max(1) * 2 {
        return None;
    }
    features
        .par_iter()
        .filter_map(|&f| best_split_for_feature(x, grad, indices, f, params))
        .collect::<Vec<_>>()
        .into_iter()
        // first feature wins on equal gain
        .fold(None, |best: Option<Candidate>, c| match best {
            Some(b) if b.gain >= c.gain => Some(b),
            _ => Some(c),
        })
}

struct Pending {
    gain: f64,
    node: usize,
    split: Candidate,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // larger gain first, then the earlier node
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.node.cmp(&self.node))
    }
}

enum Slot {
    Leaf(Vec<usize>),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

fn build_tree(
    x: &Array2<f64>,
    grad: &Grad,
    indices: Vec<usize>,
    features: &[usize],
    params: &BoostingParams,
) -> TreeNode {
    let max_depth = params.max_depth.unwrap_or(usize::MAX);
    let mut heap = BinaryHeap::new();
    if let Some(split) = best_split(x, grad, &indices, features, params) {
        heap.push(Pending {
            gain: split.gain,
            node: 0,
            split,
        });
    }
    let mut slots = vec![Slot::Leaf(indices)];
    let mut depths = vec![0usize];
    let mut n_leaves = 1;

    while n_leaves < params.num_leaves {
        let Some(Pending { node, split, .. }) = heap.pop() else {
            break;
        };
        if depths[node] >= max_depth {
            continue;
        }
        let depth = depths[node] + 1;
        let left_id = slots.len();
        let right_id = left_id + 1;

        for (child_id, child) in [(left_id, &split.left), (right_id, &split.right)] {
            if depth < max_depth {
                if let Some(next) = best_split(x, grad, child, features, params) {
                    heap.push(Pending {
                        gain: next.gain,
                        node: child_id,
                        split: next,
                    });
                }
            }
        }

        slots[node] = Slot::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        slots.push(Slot::Leaf(split.left));
        slots.push(Slot::Leaf(split.right));
        depths.push(depth);
        depths.push(depth);
        n_leaves += 1;
    }

    fn assemble(slots: &[Slot], id: usize, grad: &Grad, params: &BoostingParams) -> TreeNode {
        match &slots[id] {
            Slot::Leaf(indices) => grad.leaf(indices, params),
            Slot::Split {
                feature,
                threshold,
                left,
                right,
            } => TreeNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(assemble(slots, *left, grad, params)),
                right: Box::new(assemble(slots, *right, grad, params)),
            },
        }
    }
    assemble(&slots, 0, grad, params)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Gradient boosted tree binary classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTreeClassifier {
    params: BoostingParams,
    trees: Vec<TreeNode>,
    base_score: f64,
    n_features: usize,
    is_fitted: bool,
}

impl BoostedTreeClassifier {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
            is_fitted: false,
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Fit on a feature matrix and 0/1 labels
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 {
            return Err(TabtuneError::TrainingError("Empty dataset".into()));
        }
        if y.len() != n {
            return Err(TabtuneError::TrainingError(format!(
                "label length {} does not match {} rows",
                y.len(),
                n
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(TabtuneError::TrainingError(
                "feature matrix contains non-finite values".into(),
            ));
        }
        self.params.validate()?;

        let params = &self.params;
        let weights: Vec<f64> = y
            .iter()
            .map(|&v| if v > 0.5 { params.scale_pos_weight } else { 1.0 })
            .collect();
        let pos: f64 = y.iter().zip(&weights).filter(|(&v, _)| v > 0.5).map(|(_, w)| w).sum();
        let neg: f64 = y.iter().filter(|&&v| v <= 0.5).count() as f64;
        let prior = (pos / (pos + neg)).clamp(1e-7, 1.0 - 1e-7);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.random_state);
        let n_features = x.ncols();
        let n_selected = ((n_features as f64 * params.colsample_bytree).ceil() as usize).clamp(1, n_features.max(1));
        let n_rows = ((n as f64 * params.subsample).ceil() as usize).clamp(1, n);

        let base_score = (prior / (1.0 - prior)).ln();
        let mut raw = Array1::from_elem(n, base_score);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let mut gradients = Vec::with_capacity(n);
            let mut hessians = Vec::with_capacity(n);
            for i in 0..n {
                let p = sigmoid(raw[i]);
                gradients.push(weights[i] * (p - y[i]));
                hessians.push((weights[i] * p * (1.0 - p)).max(1e-16));
            }

            let mut features: Vec<usize> = (0..n_features).collect();
            if n_selected < n_features {
                features.shuffle(&mut rng);
                features.truncate(n_selected);
                features.sort_unstable();
            }
            let mut rows: Vec<usize> = (0..n).collect();
            if n_rows < n {
                rows.shuffle(&mut rng);
                rows.truncate(n_rows);
            }

            let grad = Grad {
                g: &gradients,
                h: &hessians,
            };
            let tree = build_tree(x, &grad, rows, &features, params);
            for (i, row) in x.rows().into_iter().enumerate() {
                raw[i] += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        self.trees = trees;
        self.base_score = base_score;
        self.n_features = n_features;
        self.is_fitted = true;
        Ok(())
    }

    fn predict_raw(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted {
            return Err(TabtuneError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(TabtuneError::DataError(format!(
                "expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let lr = self.params.learning_rate;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.base_score + self.trees.iter().map(|t| lr * t.predict(row)).sum::<f64>())
            .collect())
    }

    /// Probability of the positive class per row
    pub fn predict_positive(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_raw(x)?.mapv(sigmoid))
    }

    /// Class probabilities, columns `[P(0), P(1)]`
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let positive = self.predict_positive(x)?;
        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, &p) in positive.iter().enumerate() {
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }
        Ok(proba)
    }

    /// Hard 0/1 predictions at threshold 0.5
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_positive(x)?
            .mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    /// Number of splits per feature across all trees
    pub fn split_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_features];
        for tree in &self.trees {
            tree.count_splits(&mut counts);
        }
        counts
    }
}
