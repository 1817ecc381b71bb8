//! Training engine implementation
//!
//! `train_model` fits, evaluates, persists and explains one model with fixed
//! parameters. `tune_hyperparameters` grid-searches the parameters on the
//! training split. Both poll the engine's cancellation token at stage
//! boundaries; a stop is reported as an outcome, never as an error.

use super::columns::{binary_labels, class_counts, resolve_columns, ResolvedColumns};
use super::config::TrainingConfig;
use super::cross_validation::{train_test_split, CrossValidationRunner, FittedModel};
use super::gbdt::BoostingParams;
use super::importance::{FeatureImportance, PermutationImportance};
use super::metrics::ClassificationReport;
use crate::error::Result;
use crate::export::ModelBundle;
use crate::optimizer::{
    CancellationToken, GridSearch, NoResult, ParamCandidate, SearchOutcome, SearchResult,
};
use crate::preprocessing::{Preprocessor, Table};
use ndarray::{Array1, Axis};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Last stage a training run completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStage {
    NotStarted,
    ColumnsResolved,
    DataSplit,
    PipelineFitted,
    Evaluated,
    FinalRefit,
    BundleSaved,
}

impl fmt::Display for TrainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainStage::NotStarted => "before start",
            TrainStage::ColumnsResolved => "after loading data",
            TrainStage::DataSplit => "after splitting data",
            TrainStage::PipelineFitted => "after fitting the pipeline",
            TrainStage::Evaluated => "before the final refit",
            TrainStage::FinalRefit => "after the final refit",
            TrainStage::BundleSaved => "before feature importance",
        };
        f.write_str(name)
    }
}

/// Everything a completed training run produced
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub columns: ResolvedColumns,
    pub n_train: usize,
    pub n_valid: usize,
    pub train_metrics: ClassificationReport,
    pub valid_metrics: ClassificationReport,
    /// Model refit on every row
    pub bundle: ModelBundle,
    pub bundle_path: Option<PathBuf>,
    /// Sorted by descending mean importance
    pub importances: Vec<FeatureImportance>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Completed(Box<TrainReport>),
    Stopped { stage: TrainStage },
}

impl TrainOutcome {
    pub fn report(&self) -> Option<&TrainReport> {
        match self {
            TrainOutcome::Completed(report) => Some(report),
            TrainOutcome::Stopped { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum TuneOutcome {
    /// Nothing was scored: stopped before the first candidate, or every candidate failed
    NoResult(NoResult),
    Tuned {
        result: SearchResult<FittedModel>,
        /// Scores of the best model on the held-out split; `None` when stopped
        validation: Option<ClassificationReport>,
        /// The search was cut short by a stop request
        partial: bool,
        columns: ResolvedColumns,
    },
}

/// Holds a validated configuration and the token other threads use to stop a run
#[derive(Debug, Clone)]
pub struct TrainEngine {
    config: TrainingConfig,
    token: CancellationToken,
}

struct Prepared {
    table: Table,
    labels: Array1<f64>,
    columns: ResolvedColumns,
}

impl TrainEngine {
    /// Create a new training engine; configuration errors are fatal, warnings are logged
    pub fn new(config: TrainingConfig) -> Result<Self> {
        let report = config.validate();
        for warning in &report.warnings {
            warn!("{}", warning);
        }
        report.into_result()?;
        Ok(Self {
            config,
            token: CancellationToken::new(),
        })
    }

    /// Share an existing token, e.g. one owned by a UI
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn request_stop(&self) {
        self.token.request_stop();
    }

    /// Engine for training with a tuned candidate; shares this engine's token
    pub fn with_best_params(&self, candidate: &ParamCandidate) -> Result<Self> {
        let config = self.config.clone().with_best_params(candidate)?;
        info!(params = %candidate, "training with tuned parameters");
        Ok(Self::new(config)?.with_token(self.token.clone()))
    }

    /// Clear a previous stop request before starting a fresh run
    pub fn reset(&self) {
        self.token.reset();
    }

    fn stopped_at(&self, stage: TrainStage) -> bool {
        let stopped = self.token.is_cancelled();
        if stopped {
            info!(stage = %stage, "training stopped");
        }
        stopped
    }

    fn prepare(&self, df: &DataFrame) -> Result<Prepared> {
        let table = Table::from_frame(df)?;
        let columns = resolve_columns(
            &table,
            self.config.feature_columns.as_deref(),
            &self.config.target_column,
            &self.config.exclude_columns,
        )?;
        let labels = binary_labels(&table, &columns.target)?;
        info!(
            rows = table.n_rows(),
            features = columns.features.len(),
            target = %columns.target,
            "data loaded"
        );
        Ok(Prepared {
            table,
            labels,
            columns,
        })
    }

    /// Fit with the configured parameters, evaluate on a hold-out split, refit on
    /// all rows, save the bundle to `output` and compute permutation importance.
    pub fn train_model(&self, df: &DataFrame, output: Option<&Path>) -> Result<TrainOutcome> {
        let start = Instant::now();
        if self.stopped_at(TrainStage::NotStarted) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::NotStarted });
        }

        let Prepared {
            table,
            labels,
            columns,
        } = self.prepare(df)?;
        if self.stopped_at(TrainStage::ColumnsResolved) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::ColumnsResolved });
        }

        let (train_idx, valid_idx) = train_test_split(&labels, self.config.test_size, self.config.random_state)?;
        let train_table = table.select_rows(&train_idx);
        let valid_table = table.select_rows(&valid_idx);
        let y_train = labels.select(Axis(0), &train_idx);
        let y_valid = labels.select(Axis(0), &valid_idx);
        info!(train = train_idx.len(), valid = valid_idx.len(), "data split");
        if self.stopped_at(TrainStage::DataSplit) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::DataSplit });
        }

        let preprocessing = self.config.preprocessing_config();
        let params = self.config.boosting_params()?;
        let model = FittedModel::fit(&train_table, &y_train, &columns.features, &preprocessing, params.clone())?;
        info!(
            outputs = model.preprocessor.final_output_fields().len(),
            trees = model.classifier.n_trees(),
            "pipeline fitted"
        );
        if self.stopped_at(TrainStage::PipelineFitted) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::PipelineFitted });
        }

        let train_metrics = ClassificationReport::compute(&y_train, &model.predict_positive(&train_table)?);
        let valid_metrics = ClassificationReport::compute(&y_valid, &model.predict_positive(&valid_table)?);
        info!(
            train_f1 = train_metrics.f1_macro,
            valid_f1 = valid_metrics.f1_macro,
            valid_balanced_accuracy = valid_metrics.balanced_accuracy,
            "model evaluated"
        );
        if self.stopped_at(TrainStage::Evaluated) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::Evaluated });
        }

        let final_model = FittedModel::fit(&table, &labels, &columns.features, &preprocessing, params)?;
        info!(rows = table.n_rows(), "final model refit on all rows");
        if self.stopped_at(TrainStage::FinalRefit) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::FinalRefit });
        }

        let bundle = ModelBundle::new(final_model, columns.features.clone(), columns.target.clone());
        if let Some(path) = output {
            bundle.save(path)?;
        }
        if self.stopped_at(TrainStage::BundleSaved) {
            return Ok(TrainOutcome::Stopped { stage: TrainStage::BundleSaved });
        }

        let x = bundle.preprocessor.transform_table(&table)?;
        let importances = PermutationImportance::new(self.config.importance_scoring)
            .with_n_repeats(self.config.importance_n_repeats)
            .with_seed(self.config.random_state)
            .compute(&bundle.classifier, &x, &labels, bundle.preprocessor.final_output_fields())?;
        if let Some(top) = importances.first() {
            info!(feature = %top.name, importance = top.mean, "most important feature");
        }

        Ok(TrainOutcome::Completed(Box::new(TrainReport {
            columns,
            n_train: train_idx.len(),
            n_valid: valid_idx.len(),
            train_metrics,
            valid_metrics,
            bundle,
            bundle_path: output.map(Path::to_path_buf),
            importances,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })))
    }

    /// Grid-search the configured grid on the training split with k-fold
    /// cross-validation, then score the best model on the held-out split.
    pub fn tune_hyperparameters(&self, df: &DataFrame) -> Result<TuneOutcome> {
        let grid = self.config.effective_grid();
        BoostingParams::check_grid(&grid)?;
        let search = GridSearch::new(grid)?;

        let Prepared {
            table,
            labels,
            columns,
        } = self.prepare(df)?;
        let (train_idx, valid_idx) = train_test_split(&labels, self.config.test_size, self.config.random_state)?;
        let train_table = table.select_rows(&train_idx);
        let y_train = labels.select(Axis(0), &train_idx);
        // schema problems abort here instead of failing every candidate
        Preprocessor::with_config(self.config.preprocessing_config())
            .fit_table(&train_table, Some(&columns.features))?;
        let (negatives, positives) = class_counts(&y_train);
        info!(
            candidates = search.total_count(),
            folds = self.config.cv_folds,
            train = train_idx.len(),
            negatives,
            positives,
            quick = self.config.quick_mode,
            "starting hyperparameter search"
        );

        let runner = CrossValidationRunner::new(
            &train_table,
            &y_train,
            &columns.features,
            self.config.preprocessing_config(),
            self.config.boosting_params()?,
            self.config.search_config(),
        )?;

        let outcome = search.run(&runner, &self.token);
        let partial = outcome.is_cancelled();
        let result = match outcome {
            SearchOutcome::NoResult(no_result) => {
                warn!(reason = ?no_result.reason, "hyperparameter search produced no result");
                return Ok(TuneOutcome::NoResult(no_result));
            }
            SearchOutcome::Completed(result) | SearchOutcome::Partial(result) => result,
        };
        info!(
            best = %result.best_candidate,
            score = result.best_score,
            completed = result.completed_count,
            total = result.total_count,
            "hyperparameter search finished"
        );

        let validation = if self.token.is_cancelled() {
            info!("stopped; skipping validation of the best model");
            None
        } else {
            let valid_table = table.select_rows(&valid_idx);
            let y_valid = labels.select(Axis(0), &valid_idx);
            let report = ClassificationReport::compute(&y_valid, &result.best_estimator.predict_positive(&valid_table)?);
            info!(f1_macro = report.f1_macro, "best model validated");
            Some(report)
        };

        Ok(TuneOutcome::Tuned {
            result,
            validation,
            partial,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TabtuneError;
    use crate::optimizer::{NoResultReason, ParamValue, ParameterGrid};
    use polars::prelude::*;

    fn sample_frame(n: usize) -> DataFrame {
        let price: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let brand: Vec<&str> = (0..n).map(|i| if i % 3 == 0 { "acme" } else { "other" }).collect();
        let rating: Vec<f64> = (0..n).map(|i| (i % 5) as f64).collect();
        let label: Vec<i32> = (0..n).map(|i| i32::from(i >= n / 2)).collect();
        df!(
            "price" => price,
            "brand" => brand,
            "rating" => rating,
            "is_recommended" => label
        )
        .unwrap()
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig::new()
            .with_n_estimators(15)
            .with_learning_rate(0.3)
            .with_num_leaves(4)
            .with_scale_pos_weight(1.0)
            .with_cv_folds(3)
            .with_importance_repeats(2)
    }

    #[test]
    fn test_train_model_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let engine = TrainEngine::new(small_config().with_exclude(vec!["rating".into()])).unwrap();

        let outcome = engine.train_model(&sample_frame(60), Some(&path)).unwrap();
        let report = outcome.report().expect("completed");
        assert_eq!(report.columns.features, vec!["price", "brand"]);
        assert_eq!(report.n_train + report.n_valid, 60);
        assert_eq!(report.n_valid, 12);
        assert!(report.valid_metrics.accuracy > 0.8);
        assert!(path.exists());
        assert_eq!(report.importances.len(), 3);
        assert_eq!(report.importances[0].name, "price");
    }

    #[test]
    fn test_stop_before_start() {
        let engine = TrainEngine::new(small_config()).unwrap();
        engine.request_stop();
        let outcome = engine.train_model(&sample_frame(30), None).unwrap();
        assert!(matches!(outcome, TrainOutcome::Stopped { stage: TrainStage::NotStarted }));

        engine.reset();
        assert!(engine.train_model(&sample_frame(30), None).unwrap().report().is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = TrainEngine::new(TrainingConfig::new().with_cv_folds(1));
        assert!(matches!(result, Err(TabtuneError::ConfigError(_))));
    }

    #[test]
    fn test_missing_target_aborts() {
        let engine = TrainEngine::new(small_config().with_target("label")).unwrap();
        assert!(matches!(
            engine.train_model(&sample_frame(30), None),
            Err(TabtuneError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_tune_small_grid() {
        let grid = ParameterGrid::new()
            .with_param("model__num_leaves", [2i64, 4])
            .with_param("model__learning_rate", [0.3]);
        let engine = TrainEngine::new(small_config().with_param_grid(grid)).unwrap();

        match engine.tune_hyperparameters(&sample_frame(60)).unwrap() {
            TuneOutcome::Tuned {
                result,
                validation,
                partial,
                columns,
            } => {
                assert!(!partial);
                assert_eq!(result.completed_count, 2);
                assert_eq!(result.total_count, 2);
                assert!(validation.is_some());
                assert_eq!(columns.target, "is_recommended");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retrain_with_tuned_parameters() {
        let grid = ParameterGrid::new()
            .with_param("model__num_leaves", [2i64, 4])
            .with_param("model__min_child_samples", [5i64]);
        let engine = TrainEngine::new(small_config().with_param_grid(grid)).unwrap();
        let df = sample_frame(60);

        let best = match engine.tune_hyperparameters(&df).unwrap() {
            TuneOutcome::Tuned { result, .. } => result.best_candidate,
            other => panic!("unexpected {:?}", other),
        };
        let retrain = engine.with_best_params(&best).unwrap();
        let report = match retrain.train_model(&df, None).unwrap() {
            TrainOutcome::Completed(report) => report,
            other => panic!("unexpected {:?}", other),
        };

        let params = report.bundle.classifier.params();
        assert_eq!(Some(&ParamValue::Int(params.num_leaves as i64)), best.get("model__num_leaves"));
        assert_eq!(params.min_child_samples, 5);
        assert_eq!(report.n_train + report.n_valid, 60);

        engine.request_stop();
        assert!(retrain.token().is_cancelled());
    }

    #[test]
    fn test_tune_aborts_on_schema_error() {
        let mut df = sample_frame(40);
        df.with_column(Column::new("ghost".into(), vec![None::<f64>; 40])).unwrap();
        let grid = ParameterGrid::new().with_param("model__num_leaves", [2i64, 4]);
        let engine = TrainEngine::new(small_config().with_param_grid(grid)).unwrap();

        match engine.tune_hyperparameters(&df) {
            Err(TabtuneError::SchemaInference { field, .. }) => assert_eq!(field, "ghost"),
            other => panic!("expected a schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_tune_stopped_before_first_candidate() {
        let engine = TrainEngine::new(small_config().with_quick_mode(true)).unwrap();
        engine.request_stop();
        match engine.tune_hyperparameters(&sample_frame(30)).unwrap() {
            TuneOutcome::NoResult(no_result) => {
                assert_eq!(no_result.reason, NoResultReason::CancelledBeforeFirst);
                assert!(no_result.results_log.is_empty());
                assert_eq!(no_result.total_count, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
