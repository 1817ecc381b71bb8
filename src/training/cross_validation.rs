//! Cross-validation splits and the per-candidate runner

use super::gbdt::{BoostedTreeClassifier, BoostingParams};
use crate::error::{Result, TabtuneError};
use crate::optimizer::{CandidateEvaluator, Evaluation, ParamCandidate, SearchConfig};
use crate::preprocessing::{PreprocessingConfig, Preprocessor, Table};
use ndarray::{Array1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Stratified k-fold splitter; every fold keeps the class balance
#[derive(Debug, Clone)]
pub struct CrossValidator {
    n_splits: usize,
    shuffle: bool,
    random_state: Option<u64>,
}

impl CrossValidator {
    pub fn new(n_splits: usize, shuffle: bool) -> Self {
        Self {
            n_splits,
            shuffle,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn check_sizes(n_samples: usize, n_splits: usize) -> Result<()> {
        if n_splits < 2 {
            return Err(TabtuneError::ValidationError(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < n_splits {
            return Err(TabtuneError::ValidationError(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }
        Ok(())
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    /// Generate train/test splits for the labels `y`
    pub fn split(&self, y: &Array1<f64>) -> Result<Vec<CVSplit>> {
        let n_splits = self.n_splits;
        Self::check_sizes(y.len(), n_splits)?;

        // ordered by class so fold assignment is reproducible
        let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, &val) in y.iter().enumerate() {
            class_indices.entry(val.round() as i64).or_default().push(idx);
        }

        if self.shuffle {
            let mut rng = self.rng();
            for indices in class_indices.values_mut() {
                indices.shuffle(&mut rng);
            }
        }

        // deal each class round-robin, continuing where the previous class stopped
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut next = 0;
        for indices in class_indices.values() {
            for &idx in indices {
                folds[next % n_splits].push(idx);
                next += 1;
            }
        }

        let splits = (0..n_splits)
            .map(|fold_idx| {
                let mut test_indices = folds[fold_idx].clone();
                test_indices.sort_unstable();
                let mut train_indices: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect();
                train_indices.sort_unstable();
                CVSplit {
                    train_indices,
                    test_indices,
                    fold_idx,
                }
            })
            .collect();

        Ok(splits)
    }
}

/// Stratified hold-out split, reproducible from `seed`.
///
/// Returns `(train_indices, test_indices)`, each sorted. Every class keeps at
/// least one row on each side when it has two or more rows.
pub fn train_test_split(labels: &Array1<f64>, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TabtuneError::ValidationError(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    if labels.len() < 2 {
        return Err(TabtuneError::ValidationError(
            "need at least two rows to split".to_string(),
        ));
    }

    let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &val) in labels.iter().enumerate() {
        class_indices.entry(val.round() as i64).or_default().push(idx);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for indices in class_indices.values_mut() {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let mut n_test = (n as f64 * test_size).round() as usize;
        if n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        } else {
            n_test = 0;
        }
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Preprocessor and classifier fitted together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub preprocessor: Preprocessor,
    pub classifier: BoostedTreeClassifier,
}

impl FittedModel {
    /// Fit a fresh preprocessor on `table` restricted to `features`, then the classifier
    pub fn fit(
        table: &Table,
        labels: &Array1<f64>,
        features: &[String],
        preprocessing: &PreprocessingConfig,
        params: BoostingParams,
    ) -> Result<Self> {
        let mut preprocessor = Preprocessor::with_config(preprocessing.clone());
        preprocessor.fit_table(table, Some(features))?;
        let x = preprocessor.transform_table(table)?;
        let mut classifier = BoostedTreeClassifier::new(params);
        classifier.fit(&x, labels)?;
        Ok(Self {
            preprocessor,
            classifier,
        })
    }

    /// Positive-class probability per row
    pub fn predict_positive(&self, table: &Table) -> Result<Array1<f64>> {
        let x = self.preprocessor.transform_table(table)?;
        self.classifier.predict_positive(&x)
    }
}

/// Fold scores with their summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    pub scores: Vec<f64>,
    pub mean_score: f64,
    /// Population standard deviation
    pub std_score: f64,
    pub n_folds: usize,
}

impl CVResults {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean_score = scores.iter().sum::<f64>() / n_folds.max(1) as f64;
        let variance = scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds.max(1) as f64;
        Self {
            scores,
            mean_score,
            std_score: variance.sqrt(),
            n_folds,
        }
    }
}

/// Scores one candidate by stratified k-fold cross-validation.
///
/// Every fold fits its own preprocessor on the training rows only. Folds
/// are computed once, so all candidates see identical splits.
pub struct CrossValidationRunner<'a> {
    table: &'a Table,
    labels: &'a Array1<f64>,
    features: &'a [String],
    preprocessing: PreprocessingConfig,
    base_params: BoostingParams,
    config: SearchConfig,
    splits: Vec<CVSplit>,
}

impl<'a> CrossValidationRunner<'a> {
    pub fn new(
        table: &'a Table,
        labels: &'a Array1<f64>,
        features: &'a [String],
        preprocessing: PreprocessingConfig,
        base_params: BoostingParams,
        config: SearchConfig,
    ) -> Result<Self> {
        if table.n_rows() != labels.len() {
            return Err(TabtuneError::DataError(format!(
                "{} rows but {} labels",
                table.n_rows(),
                labels.len()
            )));
        }
        let mut validator = CrossValidator::new(config.cv_folds, config.shuffle);
        if let Some(seed) = config.random_state {
            validator = validator.with_random_state(seed);
        }
        let splits = validator.split(labels)?;

        Ok(Self {
            table,
            labels,
            features,
            preprocessing,
            base_params,
            config,
            splits,
        })
    }

    pub fn splits(&self) -> &[CVSplit] {
        &self.splits
    }

    /// Fold scores for one parameter set
    pub fn fold_scores(&self, params: &BoostingParams) -> Result<Vec<f64>> {
        self.splits
            .iter()
            .map(|split| {
                let train = self.table.select_rows(&split.train_indices);
                let test = self.table.select_rows(&split.test_indices);
                let y_train = self.labels.select(Axis(0), &split.train_indices);
                let y_test = self.labels.select(Axis(0), &split.test_indices);

                let model = FittedModel::fit(&train, &y_train, self.features, &self.preprocessing, params.clone())?;
                let score = self.config.scoring.score(&y_test, &model.predict_positive(&test)?)?;
                debug!(fold = split.fold_idx, score, "fold scored");
                Ok(score)
            })
            .collect()
    }

    pub fn cross_validate(&self, params: &BoostingParams) -> Result<CVResults> {
        Ok(CVResults::from_scores(self.fold_scores(params)?))
    }
}

impl CandidateEvaluator for CrossValidationRunner<'_> {
    type Estimator = FittedModel;

    /// Cross-validate, then refit on every row the runner holds
    fn evaluate(&self, candidate: &ParamCandidate) -> Result<Evaluation<FittedModel>> {
        let params = BoostingParams::from_candidate(&self.base_params, candidate)?;
        let fold_scores = self.fold_scores(&params)?;
        let estimator = FittedModel::fit(self.table, self.labels, self.features, &self.preprocessing, params)?;
        Ok(Evaluation {
            fold_scores,
            estimator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::Cell;

    #[test]
    fn test_stratified_k_fold() {
        let y = Array1::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let cv = CrossValidator::new(5, true).with_random_state(7);
        let splits = cv.split(&y).unwrap();

        assert_eq!(splits.len(), 5);
        for split in &splits {
            assert_eq!(split.test_indices.len(), 2);
            let positives = split.test_indices.iter().filter(|&&i| y[i] > 0.5).count();
            assert_eq!(positives, 1);
        }

        let again = cv.split(&y).unwrap();
        assert_eq!(splits[0].test_indices, again[0].test_indices);
    }

    #[test]
    fn test_too_few_samples() {
        let y = Array1::from_vec(vec![0.0, 1.0, 1.0]);
        assert!(CrossValidator::new(5, false).split(&y).is_err());
        assert!(CrossValidator::new(1, false).split(&y).is_err());
    }

    #[test]
    fn test_train_test_split_is_stratified() {
        let labels = Array1::from_vec((0..50).map(|i| if i % 5 == 0 { 1.0 } else { 0.0 }).collect());
        let (train, test) = train_test_split(&labels, 0.2, 42).unwrap();
        assert_eq!(train.len() + test.len(), 50);
        assert_eq!(test.len(), 10);
        assert_eq!(test.iter().filter(|&&i| labels[i] > 0.5).count(), 2);
        assert_eq!(train_test_split(&labels, 0.2, 42).unwrap(), (train, test));
        assert!(train_test_split(&labels, 1.5, 42).is_err());
    }

    fn separable_table(n: usize) -> (Table, Array1<f64>) {
        let x: Vec<Option<Cell>> = (0..n).map(|i| Some(Cell::Number(i as f64 + 0.5))).collect();
        let color: Vec<Option<Cell>> = (0..n)
            .map(|i| Some(Cell::from(if i % 2 == 0 { "red" } else { "blue" })))
            .collect();
        let table = Table::from_columns(vec![("x".to_string(), x), ("color".to_string(), color)]).unwrap();
        let labels = Array1::from_vec((0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect());
        (table, labels)
    }

    #[test]
    fn test_runner_scores_each_fold() {
        let (table, labels) = separable_table(40);
        let features = vec!["x".to_string(), "color".to_string()];
        let base = BoostingParams {
            n_estimators: 20,
            learning_rate: 0.3,
            num_leaves: 4,
            min_child_samples: 2,
            scale_pos_weight: 1.0,
            ..Default::default()
        };
        let runner = CrossValidationRunner::new(
            &table,
            &labels,
            &features,
            PreprocessingConfig::default(),
            base,
            SearchConfig::default().with_cv_folds(4),
        )
        .unwrap();

        let evaluation = runner.evaluate(&ParamCandidate::new().with("model__num_leaves", 3i64)).unwrap();
        assert_eq!(evaluation.fold_scores.len(), 4);
        assert!(evaluation.fold_scores.iter().all(|s| *s > 0.7));

        let summary = runner.cross_validate(&evaluation.estimator.classifier.params().clone()).unwrap();
        assert_eq!(summary.n_folds, 4);
        assert_eq!(summary.scores, evaluation.fold_scores);
        assert_eq!(evaluation.estimator.classifier.params().num_leaves, 3);
        assert_eq!(
            evaluation.estimator.preprocessor.final_output_fields(),
            &["x", "color_red", "color_blue"]
        );
    }

    #[test]
    fn test_runner_rejects_bad_candidate() {
        let (table, labels) = separable_table(20);
        let features = vec!["x".to_string()];
        let runner = CrossValidationRunner::new(
            &table,
            &labels,
            &features,
            PreprocessingConfig::default(),
            BoostingParams::default(),
            SearchConfig::default().with_cv_folds(2),
        )
        .unwrap();
        assert!(runner.evaluate(&ParamCandidate::new().with("num_leaves", 0i64)).is_err());
    }
}
