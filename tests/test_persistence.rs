//! Integration tests for model bundles, legacy model files and config files

use polars::prelude::*;
use tabtune::error::TabtuneError;
use tabtune::export::{load_model, parse_model, LoadedModel, ModelBundle, BUNDLE_FORMAT_VERSION};
use tabtune::preprocessing::{Cell, PreprocessingConfig, Record, Table};
use tabtune::training::{
    binary_labels, BoostingParams, FittedModel, TrainingConfig, DEFAULT_TARGET_COLUMN,
};

fn listings() -> DataFrame {
    let n = 40;
    let price: Vec<Option<f64>> = (0..n)
        .map(|i| if i == 7 { None } else { Some(20.0 + i as f64) })
        .collect();
    let seller: Vec<&str> = (0..n).map(|i| if i % 4 == 0 { "shop" } else { "private" }).collect();
    let verified: Vec<bool> = (0..n).map(|i| i % 3 != 0).collect();
    let label: Vec<i64> = (0..n).map(|i| i64::from(i >= 20)).collect();
    df!(
        "price" => price,
        "seller" => seller,
        "verified" => verified,
        "is_recommended" => label
    )
    .unwrap()
}

fn features() -> Vec<String> {
    vec!["price".into(), "seller".into(), "verified".into()]
}

fn bundle() -> ModelBundle {
    let df = listings();
    let table = Table::from_frame(&df).unwrap();
    let labels = binary_labels(&table, DEFAULT_TARGET_COLUMN).unwrap();
    let params = BoostingParams {
        n_estimators: 8,
        learning_rate: 0.3,
        num_leaves: 4,
        min_child_samples: 5,
        scale_pos_weight: 1.0,
        ..Default::default()
    };
    let model = FittedModel::fit(&table, &labels, &features(), &PreprocessingConfig::default(), params).unwrap();
    ModelBundle::new(model, features(), DEFAULT_TARGET_COLUMN)
}

// ============================================================================
// Bundles
// ============================================================================

#[test]
fn test_bundle_reload_predicts_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("model.json");
    let original = bundle();
    original.save(&path).unwrap();

    let loaded = load_model(&path).unwrap();
    assert!(!loaded.is_legacy());
    assert_eq!(loaded.target_column(), DEFAULT_TARGET_COLUMN);
    assert_eq!(loaded.feature_columns(), Some(features().as_slice()));

    let df = listings();
    assert_eq!(loaded.predict_positive(&df).unwrap(), original.predict_positive(&df).unwrap());

    match loaded {
        LoadedModel::Full(reloaded) => {
            assert_eq!(reloaded, original);
            assert_eq!(reloaded.format_version, BUNDLE_FORMAT_VERSION);
        }
        LoadedModel::Legacy { .. } => panic!("expected a full bundle"),
    }
}

#[test]
fn test_bundle_scores_records_like_rows() {
    let model = bundle();
    let batch = model.predict_positive(&listings()).unwrap();
    let proba = model.predict_proba(&listings()).unwrap();
    assert!((proba[[4, 0]] + proba[[4, 1]] - 1.0).abs() < 1e-12);

    // row 7 has a missing price; leaving it out of the record is equivalent
    let mut record = Record::new();
    record.insert("seller".to_string(), Some(Cell::from("private")));
    record.insert("verified".to_string(), Some(Cell::Bool(true)));
    assert_eq!(model.predict_record(&record).unwrap(), batch[7]);
}

#[test]
fn test_unsupported_bundle_version() {
    let mut value: serde_json::Value = serde_json::from_str(&bundle().to_json().unwrap()).unwrap();
    value["format_version"] = serde_json::json!(BUNDLE_FORMAT_VERSION + 1);
    assert!(matches!(parse_model(value), Err(TabtuneError::Persistence(_))));
}

#[test]
fn test_unreadable_model_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(matches!(load_model(&path), Err(TabtuneError::Persistence(_))));
    assert!(matches!(
        load_model(dir.path().join("missing.json")),
        Err(TabtuneError::Persistence(_))
    ));
}

// ============================================================================
// Legacy files
// ============================================================================

#[test]
fn test_wrapped_legacy_file() {
    let full = bundle();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.json");
    let legacy = serde_json::json!({
        "classifier": serde_json::to_value(&full.classifier).unwrap(),
        "target_column": "label",
    });
    std::fs::write(&path, serde_json::to_string(&legacy).unwrap()).unwrap();

    let loaded = load_model(&path).unwrap();
    assert!(loaded.is_legacy());
    assert_eq!(loaded.target_column(), "label");
    assert_eq!(loaded.feature_columns(), None);

    // legacy scoring expects features already encoded
    let mut encoded = full.preprocessor.transform(&listings()).unwrap();
    encoded
        .with_column(Column::new("label".into(), vec![0i64; encoded.height()]))
        .unwrap();
    assert_eq!(
        loaded.predict_positive(&encoded).unwrap(),
        full.predict_positive(&listings()).unwrap()
    );
}

#[test]
fn test_bare_legacy_classifier_defaults_target() {
    let value = serde_json::to_value(&bundle().classifier).unwrap();
    let loaded = parse_model(value).unwrap();
    assert!(loaded.is_legacy());
    assert_eq!(loaded.target_column(), DEFAULT_TARGET_COLUMN);
}

// ============================================================================
// Config files
// ============================================================================

#[test]
fn test_config_export_then_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tabtune.json");
    let config = TrainingConfig::new()
        .with_target("label")
        .with_exclude(vec!["id".into()])
        .with_quick_mode(true)
        .with_cv_folds(3);
    config.save(&path).unwrap();

    let loaded = TrainingConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.effective_grid().total_count(), 4);
}

#[test]
fn test_config_with_unknown_field_is_rejected() {
    assert!(matches!(
        TrainingConfig::from_json(r#"{"target": "label"}"#),
        Err(TabtuneError::ConfigError(_))
    ));
}
