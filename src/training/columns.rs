//! Feature and label column resolution

use crate::error::{Result, TabtuneError};
use crate::preprocessing::{Cell, Table};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Minimum normalized similarity for a "did you mean" suggestion
pub const SIMILARITY_CUTOFF: f64 = 0.6;

/// Feature and target columns chosen for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumns {
    pub features: Vec<String>,
    pub target: String,
}

/// Pick feature and target columns.
///
/// Without an explicit feature list every column except the target and the
/// exclusions is a feature, in dataset order. Exclusions only apply to the
/// implicit list.
pub fn resolve_columns(
    table: &Table,
    features: Option<&[String]>,
    target: &str,
    exclude: &[String],
) -> Result<ResolvedColumns> {
    if exclude.iter().any(|c| c == target) {
        return Err(TabtuneError::ValidationError(format!(
            "target column '{}' cannot also be excluded",
            target
        )));
    }
    if !table.contains(target) {
        return Err(TabtuneError::FeatureNotFound(with_suggestions(table, &[target])));
    }

    let features: Vec<String> = match features {
        Some(list) => {
            if list.iter().any(|c| c == target) {
                return Err(TabtuneError::ValidationError(format!(
                    "target column '{}' cannot be used as a feature",
                    target
                )));
            }
            list.to_vec()
        }
        None => table
            .column_names()
            .filter(|c| *c != target && !exclude.iter().any(|e| e == c))
            .map(String::from)
            .collect(),
    };

    let missing: Vec<&str> = features
        .iter()
        .filter(|c| !table.contains(c))
        .map(|c| c.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(TabtuneError::FeatureNotFound(with_suggestions(table, &missing)));
    }
    if features.is_empty() {
        return Err(TabtuneError::ValidationError(
            "no feature columns left after exclusions".to_string(),
        ));
    }

    debug!(features = ?features, target, "resolved columns");
    Ok(ResolvedColumns {
        features,
        target: target.to_string(),
    })
}

/// Closest available column name, if any is similar enough
pub fn suggest_column<'a>(missing: &str, available: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    available
        .into_iter()
        .map(|name| (name, strsim::normalized_levenshtein(missing, name)))
        .filter(|(_, score)| *score >= SIMILARITY_CUTOFF)
        .fold(None, |best: Option<(&str, f64)>, (name, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((name, score)),
        })
        .map(|(name, _)| name)
}

fn with_suggestions(table: &Table, missing: &[&str]) -> String {
    missing
        .iter()
        .map(|name| match suggest_column(name, table.column_names()) {
            Some(close) => format!("{} (did you mean '{}'?)", name, close),
            None => name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read the target column as 0/1 labels.
///
/// Accepts booleans and the numbers 0 and 1; anything else, including a
/// missing label, is rejected.
pub fn binary_labels(table: &Table, target: &str) -> Result<Array1<f64>> {
    let column = table
        .column(target)
        .ok_or_else(|| TabtuneError::FeatureNotFound(target.to_string()))?;

    let labels = column
        .iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(Cell::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
            Some(Cell::Number(v)) if *v == 0.0 || *v == 1.0 => Ok(*v),
            Some(other) => Err(TabtuneError::ValidationError(format!(
                "target '{}' is not binary: row {} holds '{}' (expected 0/1 or true/false)",
                target, row, other
            ))),
            None => Err(TabtuneError::ValidationError(format!(
                "target '{}' is missing at row {}",
                target, row
            ))),
        })
        .collect::<Result<Array1<f64>>>()?;

    let (negatives, positives) = class_counts(&labels);
    info!(target, negatives, positives, "target distribution");
    Ok(labels)
}

/// `(negatives, positives)`
pub fn class_counts(labels: &Array1<f64>) -> (usize, usize) {
    let positives = labels.iter().filter(|&&v| v > 0.5).count();
    (labels.len() - positives, positives)
}
