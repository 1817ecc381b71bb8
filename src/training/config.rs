//! Training configuration, JSON import/export and parameter validation

use super::gbdt::{BoostingParams, KNOWN_PARAMS, PARAM_PREFIX};
use super::metrics::ScoringMetric;
use crate::error::{Result, TabtuneError};
use crate::optimizer::{ParamCandidate, ParamValue, ParameterGrid, SearchConfig};
use crate::preprocessing::PreprocessingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Label column used when none is configured
pub const DEFAULT_TARGET_COLUMN: &str = "is_recommended";

/// Full configuration for a train or tune run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Binary label column
    pub target_column: String,

    /// Explicit feature list; `None` means every other column
    pub feature_columns: Option<Vec<String>>,

    /// Columns left out of the implicit feature list, e.g. to avoid leakage
    pub exclude_columns: Vec<String>,

    /// Fraction of rows held out for validation
    pub test_size: f64,

    pub random_state: u64,

    /// Distinct-value limit for small-integer categorical columns
    pub categorical_threshold: usize,

    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub scale_pos_weight: f64,
    pub reg_alpha: f64,

    /// Further estimator overrides, e.g. the best candidate of a tuning run.
    /// Applied on top of the values above.
    pub model_params: ParamCandidate,

    pub cv_folds: usize,

    /// Shuffle repeats for permutation importance
    pub importance_n_repeats: usize,

    pub scoring: ScoringMetric,
    pub importance_scoring: ScoringMetric,

    pub param_grid: ParameterGrid,

    /// Search the small built-in grid instead of `param_grid`
    pub quick_mode: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            feature_columns: None,
            exclude_columns: Vec::new(),
            test_size: 0.2,
            random_state: 42,
            categorical_threshold: 10,
            n_estimators: 250,
            learning_rate: 0.01,
            num_leaves: 60,
            scale_pos_weight: 0.55,
            reg_alpha: 0.0,
            model_params: ParamCandidate::new(),
            cv_folds: 5,
            importance_n_repeats: 5,
            scoring: ScoringMetric::F1Macro,
            importance_scoring: ScoringMetric::F1Macro,
            param_grid: Self::default_grid(),
            quick_mode: false,
        }
    }
}

/// Outcome of [`TrainingConfig::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn errors into a single `ConfigError`; warnings never fail
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(TabtuneError::ConfigError(self.errors.join("; ")))
        }
    }
}

impl TrainingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// 72 candidates
    pub fn default_grid() -> ParameterGrid {
        ParameterGrid::new()
            .with_param("model__n_estimators", [250i64, 300])
            .with_param("model__learning_rate", [0.01, 0.005])
            .with_param("model__num_leaves", [40i64, 60])
            .with_param("model__scale_pos_weight", [0.55, 0.56, 0.52])
            .with_param(
                "model__reg_alpha",
                [ParamValue::Int(0), ParamValue::Float(0.5), ParamValue::Int(1)],
            )
    }

    /// Small grid for quick runs
    pub fn quick_grid() -> ParameterGrid {
        ParameterGrid::new()
            .with_param("model__n_estimators", [250i64])
            .with_param("model__learning_rate", [0.01])
            .with_param("model__num_leaves", [40i64, 60])
            .with_param("model__scale_pos_weight", [0.55])
            .with_param("model__reg_alpha", [ParamValue::Int(0), ParamValue::Float(0.5)])
    }

    /// Builder method to set the target column
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_column = target.into();
        self
    }

    /// Builder method to set explicit feature columns
    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.feature_columns = Some(features);
        self
    }

    /// Builder method to set excluded columns
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude_columns = exclude;
        self
    }

    /// Builder method to set test size
    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    /// Builder method to set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Builder method to set the number of boosting rounds
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    /// Builder method to set the learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Builder method to set the maximum leaves per tree
    pub fn with_num_leaves(mut self, leaves: usize) -> Self {
        self.num_leaves = leaves;
        self
    }

    /// Builder method to set the positive-class weight
    pub fn with_scale_pos_weight(mut self, weight: f64) -> Self {
        self.scale_pos_weight = weight;
        self
    }

    /// Builder method to set the number of CV folds
    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Builder method to set importance repeats
    pub fn with_importance_repeats(mut self, repeats: usize) -> Self {
        self.importance_n_repeats = repeats;
        self
    }

    /// Builder method to set the search grid
    pub fn with_param_grid(mut self, grid: ParameterGrid) -> Self {
        self.param_grid = grid;
        self
    }

    /// Builder method to toggle quick mode
    pub fn with_quick_mode(mut self, quick: bool) -> Self {
        self.quick_mode = quick;
        self
    }

    pub fn preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig::new().with_categorical_threshold(self.categorical_threshold)
    }

    /// Estimator parameters before any grid overrides
    pub fn boosting_params(&self) -> Result<BoostingParams> {
        let base = BoostingParams {
            n_estimators: self.n_estimators,
            learning_rate: self.learning_rate,
            num_leaves: self.num_leaves,
            scale_pos_weight: self.scale_pos_weight,
            reg_alpha: self.reg_alpha,
            random_state: self.random_state,
            ..BoostingParams::default()
        };
        BoostingParams::from_candidate(&base, &self.model_params)
    }

    /// Adopt a tuned candidate for later training runs.
    ///
    /// The named top-level values are updated so the saved configuration
    /// shows them; every key is also kept in `model_params`.
    pub fn with_best_params(mut self, candidate: &ParamCandidate) -> Result<Self> {
        let mut merged = self.model_params.clone();
        for (name, value) in candidate.iter() {
            merged = merged.with(name.clone(), value.clone());
        }
        self.model_params = merged;
        let params = self.boosting_params()?;
        self.n_estimators = params.n_estimators;
        self.learning_rate = params.learning_rate;
        self.num_leaves = params.num_leaves;
        self.scale_pos_weight = params.scale_pos_weight;
        self.reg_alpha = params.reg_alpha;
        Ok(self)
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig::new()
            .with_cv_folds(self.cv_folds)
            .with_shuffle(true)
            .with_random_state(self.random_state)
            .with_scoring(self.scoring)
    }

    /// The grid a tuning run searches
    pub fn effective_grid(&self) -> ParameterGrid {
        if self.quick_mode {
            Self::quick_grid()
        } else {
            self.param_grid.clone()
        }
    }

    /// Check every parameter; warnings flag values that are legal but costly
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        let errors = &mut report.errors;
        let warnings = &mut report.warnings;

        if self.target_column.trim().is_empty() {
            errors.push("target_column is required".to_string());
        } else if self.exclude_columns.iter().any(|c| c == &self.target_column) {
            errors.push(format!(
                "target column '{}' cannot also appear in exclude_columns",
                self.target_column
            ));
        }

        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            errors.push(format!("test_size must be between 0 and 1, got {}", self.test_size));
        }
        if self.categorical_threshold == 0 {
            errors.push("categorical_threshold must be greater than 0".to_string());
        }

        if self.n_estimators == 0 {
            errors.push("n_estimators must be greater than 0".to_string());
        } else if self.n_estimators > 10_000 {
            warnings.push("n_estimators above 10000 may make training very slow".to_string());
        }
        if !(self.learning_rate > 0.0) {
            errors.push("learning_rate must be greater than 0".to_string());
        } else if self.learning_rate > 1.0 {
            warnings.push("learning_rate above 1 may make training unstable".to_string());
        }
        if self.num_leaves <= 1 {
            errors.push("num_leaves must be greater than 1".to_string());
        } else if self.num_leaves > 1000 {
            warnings.push("num_leaves above 1000 may overfit".to_string());
        }
        if !(self.scale_pos_weight > 0.0) {
            errors.push("scale_pos_weight must be greater than 0".to_string());
        }
        if !(self.reg_alpha >= 0.0) {
            errors.push("reg_alpha must be non-negative".to_string());
        }

        if !self.model_params.is_empty() {
            if let Err(e) = self.boosting_params() {
                errors.push(format!("model_params: {}", e));
            }
        }

        if self.cv_folds <= 1 {
            errors.push("cv_folds must be greater than 1".to_string());
        } else if self.cv_folds > 20 {
            warnings.push("cv_folds above 20 greatly increases tuning time".to_string());
        }
        if self.importance_n_repeats == 0 {
            errors.push("importance_n_repeats must be greater than 0".to_string());
        } else if self.importance_n_repeats > 50 {
            warnings.push("importance_n_repeats above 50 greatly increases computation".to_string());
        }

        let grid = self.effective_grid();
        if let Err(e) = grid.validate() {
            errors.push(e.to_string());
        }
        for name in grid.names() {
            let bare = name.strip_prefix(PARAM_PREFIX).unwrap_or(name);
            if !KNOWN_PARAMS.contains(&bare) {
                errors.push(format!("unknown hyperparameter '{}' in param_grid", name));
            }
        }

        report
    }

    /// Load a configuration from JSON; missing keys take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TabtuneError::ConfigError(e.to_string()))
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainingConfig::default();
        assert_eq!(config.target_column, "is_recommended");
        assert_eq!(config.param_grid.total_count(), 72);
        assert_eq!(config.scoring, ScoringMetric::F1Macro);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TrainingConfig::new()
            .with_target("label")
            .with_exclude(vec!["rating".into()])
            .with_cv_folds(3)
            .with_quick_mode(true);
        assert_eq!(config.target_column, "label");
        assert_eq!(config.search_config().cv_folds, 3);
        assert_eq!(config.effective_grid(), TrainingConfig::quick_grid());
    }

    #[test]
    fn test_validation_errors_and_warnings() {
        let config = TrainingConfig::new()
            .with_target("rating")
            .with_exclude(vec!["rating".into()])
            .with_test_size(1.0)
            .with_n_estimators(20_000)
            .with_cv_folds(1)
            .with_param_grid(ParameterGrid::new().with_param("model__gamma", [1.0]));
        let report = config.validate();
        assert_eq!(report.errors.len(), 4);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(report.into_result(), Err(TabtuneError::ConfigError(_))));
    }

    #[test]
    fn test_json_defaults_and_unknown_keys() {
        let config = TrainingConfig::from_json(r#"{"target_column": "label", "cv_folds": 3}"#).unwrap();
        assert_eq!(config.target_column, "label");
        assert_eq!(config.cv_folds, 3);
        assert_eq!(config.learning_rate, 0.01);

        assert!(TrainingConfig::from_json(r#"{"targte_column": "label"}"#).is_err());
    }

    #[test]
    fn test_best_params_update_config() {
        let best = ParamCandidate::new()
            .with("model__num_leaves", 40i64)
            .with("model__learning_rate", 0.005)
            .with("model__min_child_samples", 10i64);
        let config = TrainingConfig::new().with_best_params(&best).unwrap();

        assert_eq!(config.num_leaves, 40);
        assert_eq!(config.learning_rate, 0.005);
        assert_eq!(config.model_params, best);
        assert_eq!(config.boosting_params().unwrap().min_child_samples, 10);

        let json = config.to_json().unwrap();
        assert_eq!(TrainingConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_best_params_are_rejected() {
        let bad = ParamCandidate::new().with("model__num_leaves", 1i64);
        assert!(TrainingConfig::new().with_best_params(&bad).is_err());

        let mut config = TrainingConfig::new();
        config.model_params = ParamCandidate::new().with("depth", 3i64);
        assert_eq!(config.validate().errors.len(), 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainingConfig::new().with_features(vec!["a".into(), "b".into()]);
        config.save(&path).unwrap();
        assert_eq!(TrainingConfig::load(&path).unwrap(), config);
    }
}
