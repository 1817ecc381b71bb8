//! Versioned model bundle
//!
//! A bundle holds everything needed to score new rows without the training
//! data: the fitted preprocessor, the classifier, the feature list and the
//! label name. Files written before bundles were versioned carried only a
//! classifier; those still load, with reduced capability.

use crate::error::{Result, TabtuneError};
use crate::preprocessing::{Cell, Preprocessor, Record, Table};
use crate::training::{BoostedTreeClassifier, FittedModel, DEFAULT_TARGET_COLUMN};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

/// Version written into every bundle
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Preprocessor, classifier and column metadata saved together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub preprocessor: Preprocessor,
    pub classifier: BoostedTreeClassifier,
    pub feature_columns: Vec<String>,
    pub target_column: String,
    pub created_at: DateTime<Utc>,
}

/// Pre-versioning layouts: a classifier on its own, or wrapped with its label
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyFile {
    Wrapped {
        classifier: BoostedTreeClassifier,
        #[serde(default)]
        target_column: Option<String>,
    },
    Bare(BoostedTreeClassifier),
}

/// Result of [`load_model`]
#[derive(Debug, Clone)]
pub enum LoadedModel {
    Full(ModelBundle),
    /// No preprocessing metadata; the feature list is unknown
    Legacy {
        classifier: BoostedTreeClassifier,
        target_column: String,
    },
}

impl ModelBundle {
    pub fn new(model: FittedModel, feature_columns: Vec<String>, target_column: impl Into<String>) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            preprocessor: model.preprocessor,
            classifier: model.classifier,
            feature_columns,
            target_column: target_column.into(),
            created_at: Utc::now(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| TabtuneError::SerializationError(format!("Failed to write bundle: {}", e)))?;
        info!(path = %path.display(), "model bundle saved");
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Positive-class probability for each row of `df`
    pub fn predict_positive(&self, df: &DataFrame) -> Result<Array1<f64>> {
        let x = self.preprocessor.transform_matrix(df)?;
        self.classifier.predict_positive(&x)
    }

    /// Class probabilities, columns `[P(0), P(1)]`
    pub fn predict_proba(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let x = self.preprocessor.transform_matrix(df)?;
        self.classifier.predict_proba(&x)
    }

    /// Positive-class probability for one record
    pub fn predict_record(&self, record: &Record) -> Result<f64> {
        let x = self.preprocessor.transform_table(&Table::from_record(record))?;
        let scores = self.classifier.predict_positive(&x)?;
        scores
            .first()
            .copied()
            .ok_or_else(|| TabtuneError::DataError("empty prediction".into()))
    }
}

impl LoadedModel {
    pub fn is_legacy(&self) -> bool {
        matches!(self, LoadedModel::Legacy { .. })
    }

    pub fn classifier(&self) -> &BoostedTreeClassifier {
        match self {
            LoadedModel::Full(bundle) => &bundle.classifier,
            LoadedModel::Legacy { classifier, .. } => classifier,
        }
    }

    pub fn target_column(&self) -> &str {
        match self {
            LoadedModel::Full(bundle) => &bundle.target_column,
            LoadedModel::Legacy { target_column, .. } => target_column,
        }
    }

    /// `None` for legacy models
    pub fn feature_columns(&self) -> Option<&[String]> {
        match self {
            LoadedModel::Full(bundle) => Some(&bundle.feature_columns),
            LoadedModel::Legacy { .. } => None,
        }
    }

    /// Positive-class probability per row.
    ///
    /// Legacy models have no preprocessor, so every column of `df` except the
    /// label is read as an already-encoded number, in frame order.
    pub fn predict_positive(&self, df: &DataFrame) -> Result<Array1<f64>> {
        match self {
            LoadedModel::Full(bundle) => bundle.predict_positive(df),
            LoadedModel::Legacy {
                classifier,
                target_column,
            } => classifier.predict_positive(&numeric_matrix(df, target_column)?),
        }
    }
}

/// Read a model file, degrading to [`LoadedModel::Legacy`] for unversioned files
pub fn load_model(path: impl AsRef<Path>) -> Result<LoadedModel> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| TabtuneError::Persistence(format!("cannot open {}: {}", path.display(), e)))?;
    let value: serde_json::Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| TabtuneError::Persistence(format!("{} is not a model file: {}", path.display(), e)))?;
    parse_model(value)
}

/// Interpret an already-parsed model document
pub fn parse_model(value: serde_json::Value) -> Result<LoadedModel> {
    match value.get("format_version").map(|v| v.as_u64()) {
        Some(Some(v)) if v == BUNDLE_FORMAT_VERSION as u64 => {
            let bundle: ModelBundle = serde_json::from_value(value)
                .map_err(|e| TabtuneError::Persistence(format!("corrupt model bundle: {}", e)))?;
            Ok(LoadedModel::Full(bundle))
        }
        Some(other) => Err(TabtuneError::Persistence(format!(
            "unsupported bundle format version {:?} (expected {})",
            other, BUNDLE_FORMAT_VERSION
        ))),
        None => {
            let legacy: LegacyFile = serde_json::from_value(value).map_err(|_| {
                TabtuneError::Persistence("unrecognized model file layout".to_string())
            })?;
            let (classifier, target_column) = match legacy {
                LegacyFile::Wrapped {
                    classifier,
                    target_column,
                } => (classifier, target_column),
                LegacyFile::Bare(classifier) => (classifier, None),
            };
            let target_column = target_column.unwrap_or_else(|| DEFAULT_TARGET_COLUMN.to_string());
            warn!(target = %target_column, "legacy model without preprocessing metadata");
            Ok(LoadedModel::Legacy {
                classifier,
                target_column,
            })
        }
    }
}

fn numeric_matrix(df: &DataFrame, skip: &str) -> Result<Array2<f64>> {
    let table = Table::from_frame(df)?;
    let names: Vec<String> = table
        .column_names()
        .filter(|name| *name != skip)
        .map(String::from)
        .collect();
    let mut matrix = Array2::zeros((table.n_rows(), names.len()));
    for (j, name) in names.iter().enumerate() {
        let column = table
            .column(name)
            .ok_or_else(|| TabtuneError::FeatureNotFound(name.clone()))?;
        for (i, value) in column.iter().enumerate() {
            matrix[[i, j]] = match value {
                Some(Cell::Number(v)) => *v,
                Some(Cell::Bool(b)) => f64::from(u8::from(*b)),
                Some(other) => {
                    return Err(TabtuneError::IncompatibleValue {
                        field: name.clone(),
                        expected: "number".to_string(),
                        found: other.type_name().to_string(),
                    })
                }
                None => {
                    return Err(TabtuneError::DataError(format!(
                        "missing value in '{}' at row {}; legacy models cannot impute",
                        name, i
                    )))
                }
            };
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::PreprocessingConfig;
    use crate::training::BoostingParams;
    use polars::prelude::*;

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 10,
            learning_rate: 0.3,
            num_leaves: 4,
            min_child_samples: 2,
            scale_pos_weight: 1.0,
            ..Default::default()
        }
    }

    fn fitted_bundle() -> ModelBundle {
        let x: Vec<Option<Cell>> = (0..20).map(|i| Some(Cell::Number(i as f64))).collect();
        let table = Table::from_columns(vec![("x".to_string(), x)]).unwrap();
        let labels = Array1::from_vec((0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect());
        let features = vec!["x".to_string()];
        let model = FittedModel::fit(&table, &labels, &features, &PreprocessingConfig::default(), small_params()).unwrap();
        ModelBundle::new(model, features, "label")
    }

    #[test]
    fn test_bundle_round_trip() {
        let bundle = fitted_bundle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");
        bundle.save(&path).unwrap();

        match load_model(&path).unwrap() {
            LoadedModel::Full(loaded) => assert_eq!(loaded, bundle),
            other => panic!("expected full bundle, got {:?}", other),
        }
    }

    #[test]
    fn test_predict_record_matches_frame() {
        let bundle = fitted_bundle();
        let df = df!("x" => [3.0, 17.0]).unwrap();
        let batch = bundle.predict_positive(&df).unwrap();
        assert!(batch[0] < 0.5 && batch[1] > 0.5);

        let mut record = Record::new();
        record.insert("x".to_string(), Some(Cell::Number(17.0)));
        assert_eq!(bundle.predict_record(&record).unwrap(), batch[1]);

        let proba = bundle.predict_proba(&df).unwrap();
        assert!((proba[[0, 0]] + proba[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bare_classifier_loads_as_legacy() {
        let bundle = fitted_bundle();
        let value = serde_json::to_value(&bundle.classifier).unwrap();
        let loaded = parse_model(value).unwrap();
        assert!(loaded.is_legacy());
        assert_eq!(loaded.target_column(), DEFAULT_TARGET_COLUMN);
        assert_eq!(loaded.feature_columns(), None);

        // legacy input must already be encoded
        let raw = df!("x" => [3.0, 17.0]).unwrap();
        let mut encoded = bundle.preprocessor.transform(&raw).unwrap();
        encoded.with_column(Column::new("is_recommended".into(), [0i32, 1])).unwrap();
        let scores = loaded.predict_positive(&encoded).unwrap();
        assert_eq!(scores, bundle.predict_positive(&raw).unwrap());
    }

    #[test]
    fn test_legacy_rejects_text_columns() {
        let bundle = fitted_bundle();
        let value = serde_json::json!({ "classifier": bundle.classifier, "target_column": "label" });
        let loaded = parse_model(value).unwrap();
        assert_eq!(loaded.target_column(), "label");

        let df = df!("x" => ["a", "b"]).unwrap();
        assert!(matches!(
            loaded.predict_positive(&df),
            Err(TabtuneError::IncompatibleValue { .. })
        ));
    }

    #[test]
    fn test_unknown_layouts_fail() {
        assert!(matches!(
            parse_model(serde_json::json!({ "format_version": 99 })),
            Err(TabtuneError::Persistence(_))
        ));
        assert!(matches!(
            parse_model(serde_json::json!({ "weights": [1, 2] })),
            Err(TabtuneError::Persistence(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_model(&path), Err(TabtuneError::Persistence(_))));
    }
}
