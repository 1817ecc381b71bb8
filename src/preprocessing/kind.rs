//! Column kind inference

use super::table::Cell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Statistical kind of a column, inferred from its observed values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnKind {
    StringCategorical,
    Boolean,
    /// Numeric values drawn only from {0, 1}
    BinaryNumeric,
    /// Integer values with few distinct levels
    SmallIntegerCategorical,
    ContinuousNumeric,
}

impl ColumnKind {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnKind::BinaryNumeric
                | ColumnKind::SmallIntegerCategorical
                | ColumnKind::ContinuousNumeric
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::StringCategorical => "string-categorical",
            ColumnKind::Boolean => "boolean",
            ColumnKind::BinaryNumeric => "binary-numeric",
            ColumnKind::SmallIntegerCategorical => "small-integer-categorical",
            ColumnKind::ContinuousNumeric => "continuous-numeric",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a column from its observed (non-missing) values.
///
/// Returns `None` when there is nothing to classify. Any text value, or a mix
/// of booleans and numbers, makes the column string-categorical.
pub fn infer_column_kind(values: &[Cell], categorical_threshold: usize) -> Option<ColumnKind> {
    if values.is_empty() {
        return None;
    }

    let all_bool = values.iter().all(|v| matches!(v, Cell::Bool(_)));
    if all_bool {
        return Some(ColumnKind::Boolean);
    }

    let numbers: Option<Vec<f64>> = values.iter().map(Cell::as_number).collect();
    let numbers = match numbers {
        Some(n) => n,
        None => return Some(ColumnKind::StringCategorical),
    };

    if numbers.iter().all(|&v| v == 0.0 || v == 1.0) {
        return Some(ColumnKind::BinaryNumeric);
    }

    if numbers.iter().all(|v| v.fract() == 0.0) {
        let distinct: HashSet<i64> = numbers.iter().map(|&v| v as i64).collect();
        if distinct.len() <= categorical_threshold {
            return Some(ColumnKind::SmallIntegerCategorical);
        }
    }

    Some(ColumnKind::ContinuousNumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> Vec<Cell> {
        values.iter().map(|&v| Cell::Number(v)).collect()
    }

    #[test]
    fn test_text_is_string_categorical() {
        let values = vec![Cell::from("a"), Cell::from("b")];
        assert_eq!(infer_column_kind(&values, 10), Some(ColumnKind::StringCategorical));
    }

    #[test]
    fn test_bool_is_boolean() {
        let values = vec![Cell::Bool(true), Cell::Bool(false)];
        assert_eq!(infer_column_kind(&values, 10), Some(ColumnKind::Boolean));
    }

    #[test]
    fn test_zero_one_is_binary() {
        assert_eq!(
            infer_column_kind(&numbers(&[0.0, 1.0, 1.0]), 10),
            Some(ColumnKind::BinaryNumeric)
        );
        // a constant 1 column is still binary
        assert_eq!(infer_column_kind(&numbers(&[1.0, 1.0]), 10), Some(ColumnKind::BinaryNumeric));
    }

    #[test]
    fn test_small_integer_threshold() {
        let few = numbers(&[1.0, 2.0, 3.0, 2.0]);
        assert_eq!(infer_column_kind(&few, 3), Some(ColumnKind::SmallIntegerCategorical));
        assert_eq!(infer_column_kind(&few, 2), Some(ColumnKind::ContinuousNumeric));
    }

    #[test]
    fn test_fractional_is_continuous() {
        assert_eq!(
            infer_column_kind(&numbers(&[1.5, 2.0]), 10),
            Some(ColumnKind::ContinuousNumeric)
        );
    }

    #[test]
    fn test_mixed_types_fall_back_to_categorical() {
        let values = vec![Cell::Bool(true), Cell::Number(3.0)];
        assert_eq!(infer_column_kind(&values, 10), Some(ColumnKind::StringCategorical));
    }

    #[test]
    fn test_empty_column_has_no_kind() {
        assert_eq!(infer_column_kind(&[], 10), None);
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ColumnKind::SmallIntegerCategorical).unwrap();
        assert_eq!(json, "\"small-integer-categorical\"");
    }
}
