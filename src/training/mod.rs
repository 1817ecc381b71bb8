//! Model training module
//!
//! Provides the pieces a train or tune run is assembled from:
//! - Leaf-wise gradient boosted trees for binary classification
//! - Stratified splits and the cross-validation candidate runner
//! - Classification metrics and permutation importance
//! - Column resolution, configuration and the training engine

mod columns;
mod config;
mod engine;
mod importance;
pub mod cross_validation;
pub mod gbdt;
pub mod metrics;

pub use columns::{binary_labels, class_counts, resolve_columns, ResolvedColumns};
pub use config::{ConfigReport, TrainingConfig, DEFAULT_TARGET_COLUMN};
pub use cross_validation::{
    train_test_split, CVResults, CVSplit, CrossValidationRunner, CrossValidator, FittedModel,
};
pub use engine::{TrainEngine, TrainOutcome, TrainReport, TrainStage, TuneOutcome};
pub use gbdt::{BoostedTreeClassifier, BoostingParams, KNOWN_PARAMS, PARAM_PREFIX};
pub use importance::{FeatureImportance, PermutationImportance};
pub use metrics::{roc_auc, ClassificationReport, ConfusionMatrix, ScoringMetric};
