//! tabtune - schema-inferring preprocessing and cancellable grid search
//!
//! This crate provides:
//! - A preprocessor that infers each column's kind from its values and
//!   learns fill, scaling and one-hot strategies at fit time
//! - Exhaustive hyperparameter search that isolates failing candidates and
//!   stops cooperatively when asked
//! - A gradient boosted tree classifier, cross-validation, metrics and
//!   permutation importance for binary targets
//! - Versioned model bundles and a CLI
//!
//! # Modules
//!
//! - [`preprocessing`] - Column kinds, field strategies, the preprocessor
//! - [`optimizer`] - Parameter grids, cancellation, grid search
//! - [`training`] - Classifier, cross-validation, training engine
//! - [`export`] - Model bundle persistence
//! - [`utils`] - Data loading
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core ML modules
pub mod preprocessing;
pub mod optimizer;
pub mod training;

// Persistence and IO
pub mod export;
pub mod utils;

// Services
pub mod cli;

pub use error::{Result, TabtuneError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, TabtuneError};

    // Preprocessing
    pub use crate::preprocessing::{Cell, ColumnKind, PreprocessingConfig, Preprocessor, Record, Table};

    // Optimization
    pub use crate::optimizer::{
        CancellationToken, GridSearch, ParamCandidate, ParamValue, ParameterGrid, SearchOutcome,
    };

    // Training
    pub use crate::training::{
        BoostedTreeClassifier, BoostingParams, ClassificationReport, ScoringMetric, TrainEngine,
        TrainOutcome, TrainingConfig, TuneOutcome,
    };

    // Export
    pub use crate::export::{load_model, LoadedModel, ModelBundle};
}
