//! Per-field fill, scaling and encoding strategies learned at fit time

use super::config::PreprocessingConfig;
use super::kind::{infer_column_kind, ColumnKind};
use super::scaler::{median, FittedScaler, ScalerType};
use super::table::Cell;
use crate::error::{Result, TabtuneError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a field is expanded into output columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// One indicator column per catalog entry, catalog ordered by descending frequency
    OneHot { catalog: Vec<String> },
    /// Booleans cast to {0, 1}
    Boolean,
    /// Numbers pass through, after scaling when a scaler was learned
    Passthrough,
}

/// Everything the preprocessor learned about one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStrategy {
    pub field: String,
    pub kind: ColumnKind,
    pub fill_value: Cell,
    pub scaler: Option<FittedScaler>,
    pub encoding: Encoding,
    pub output_fields: Vec<String>,
}

impl FieldStrategy {
    /// Category catalog for categorical fields, empty otherwise
    pub fn category_catalog(&self) -> &[String] {
        match &self.encoding {
            Encoding::OneHot { catalog } => catalog,
            _ => &[],
        }
    }

    /// Transform one input column into this field's output columns.
    ///
    /// `column` is `None` when the field is absent from the input; every row
    /// then takes the fill value. Returns one vector per output field.
    pub fn transform_column(
        &self,
        column: Option<&[Option<Cell>]>,
        n_rows: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let value_at = |row: usize| -> &Cell {
            column
                .and_then(|c| c.get(row))
                .and_then(|v| v.as_ref())
                .filter(|v| v.is_observed())
                .unwrap_or(&self.fill_value)
        };

        match &self.encoding {
            Encoding::OneHot { catalog } => {
                let index: HashMap<&str, usize> = catalog
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_str(), i))
                    .collect();
                let mut outputs = vec![vec![0.0; n_rows]; catalog.len()];
                for row in 0..n_rows {
                    // unseen categories leave the whole segment at zero
                    if let Some(&pos) = index.get(value_at(row).render().as_str()) {
                        outputs[pos][row] = 1.0;
                    }
                }
                Ok(outputs)
            }
            Encoding::Boolean => {
                let values = (0..n_rows)
                    .map(|row| match value_at(row) {
                        Cell::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
                        Cell::Number(v) if *v == 0.0 || *v == 1.0 => Ok(*v),
                        other => Err(self.incompatible("boolean", other)),
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(vec![values])
            }
            Encoding::Passthrough => {
                let values = (0..n_rows)
                    .map(|row| {
                        let raw = match value_at(row) {
                            Cell::Number(v) => *v,
                            Cell::Bool(b) => {
                                if *b {
                                    1.0
                                } else {
                                    0.0
                                }
                            }
                            other => return Err(self.incompatible("number", other)),
                        };
                        Ok(match &self.scaler {
                            Some(scaler) => scaler.apply(raw),
                            None => raw,
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(vec![values])
            }
        }
    }

    fn incompatible(&self, expected: &str, found: &Cell) -> TabtuneError {
        TabtuneError::IncompatibleValue {
            field: self.field.clone(),
            expected: expected.to_string(),
            found: format!("{} '{}'", found.type_name(), found),
        }
    }
}

/// Learn a strategy for `field` from its raw column.
///
/// Fails with `SchemaInference` when the column has no observed values; the
/// caller decides whether to abort or drop the field.
pub fn build_field_strategy(
    field: &str,
    values: &[Option<Cell>],
    config: &PreprocessingConfig,
) -> Result<FieldStrategy> {
    let observed: Vec<Cell> = values.iter().flatten().filter(|v| v.is_observed()).cloned().collect();
    let kind = infer_column_kind(&observed, config.categorical_threshold)
        .ok_or_else(|| TabtuneError::schema(field, "column has no observed values"))?;

    let strategy = match kind {
        ColumnKind::StringCategorical => {
            let counts = frequency_order(observed.iter().map(Cell::render));
            let mode = mode_of(&counts).ok_or_else(|| TabtuneError::schema(field, "no categories observed"))?;
            let catalog: Vec<String> = counts.into_iter().map(|(value, _)| value).collect();
            let output_fields = catalog
                .iter()
                .map(|category| format!("{}{}{}", field, config.name_separator, category))
                .collect();
            FieldStrategy {
                field: field.to_string(),
                kind,
                fill_value: Cell::Text(mode),
                scaler: None,
                encoding: Encoding::OneHot { catalog },
                output_fields,
            }
        }
        ColumnKind::Boolean => {
            // "false" sorts first, so a tie fills with false
            let counts = frequency_order(observed.iter().map(Cell::render));
            let mode = mode_of(&counts).is_some_and(|s| s == "true");
            FieldStrategy {
                field: field.to_string(),
                kind,
                fill_value: Cell::Bool(mode),
                scaler: None,
                encoding: Encoding::Boolean,
                output_fields: vec![field.to_string()],
            }
        }
        ColumnKind::BinaryNumeric
        | ColumnKind::SmallIntegerCategorical
        | ColumnKind::ContinuousNumeric => {
            let numbers: Vec<f64> = observed.iter().filter_map(Cell::as_number).collect();
            let fill = median(&numbers)
                .ok_or_else(|| TabtuneError::schema(field, "cannot compute a median"))?;
            let scaler = match kind {
                ColumnKind::SmallIntegerCategorical => {
                    Some(FittedScaler::fit(ScalerType::MinMax, &numbers)?)
                }
                ColumnKind::ContinuousNumeric => Some(FittedScaler::fit(ScalerType::Robust, &numbers)?),
                _ => None,
            };
            FieldStrategy {
                field: field.to_string(),
                kind,
                fill_value: Cell::Number(fill),
                scaler,
                encoding: Encoding::Passthrough,
                output_fields: vec![field.to_string()],
            }
        }
    };

    Ok(strategy)
}

/// Distinct values with their counts, by descending count; ties keep first-seen order
fn frequency_order(values: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    for value in values {
        match position.get(&value) {
            Some(&idx) => counts[idx].1 += 1,
            None => {
                position.insert(value.clone(), counts.len());
                counts.push((value, 1));
            }
        }
    }
    // stable sort keeps first-seen order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Most frequent value; the smallest one wins a tie
fn mode_of(counts: &[(String, usize)]) -> Option<String> {
    let top = counts.first()?.1;
    counts
        .iter()
        .take_while(|(_, count)| *count == top)
        .map(|(value, _)| value)
        .min()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[Option<&str>]) -> Vec<Option<Cell>> {
        values.iter().map(|v| v.map(Cell::from)).collect()
    }

    fn nums(values: &[Option<f64>]) -> Vec<Option<Cell>> {
        values.iter().map(|v| v.map(Cell::Number)).collect()
    }

    #[test]
    fn test_categorical_catalog_and_mode() {
        let column = text(&[Some("LA"), Some("NYC"), Some("NYC"), None, Some("SF"), Some("LA"), Some("NYC")]);
        let strategy = build_field_strategy("city", &column, &PreprocessingConfig::default()).unwrap();

        assert_eq!(strategy.kind, ColumnKind::StringCategorical);
        assert_eq!(strategy.category_catalog(), &["NYC", "LA", "SF"]);
        assert_eq!(strategy.fill_value, Cell::from("NYC"));
        assert_eq!(strategy.output_fields, vec!["city_NYC", "city_LA", "city_SF"]);
        assert!(strategy.scaler.is_none());
    }

    #[test]
    fn test_frequency_ties_keep_first_seen() {
        let counts = frequency_order(["b", "a", "a", "b", "c"].iter().map(|s| s.to_string()));
        let order: Vec<&str> = counts.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_tied_mode_takes_smallest_value() {
        let column = text(&[Some("b"), Some("a"), Some("a"), Some("b"), None]);
        let strategy = build_field_strategy("grade", &column, &PreprocessingConfig::default()).unwrap();
        assert_eq!(strategy.category_catalog(), &["b", "a"]);
        assert_eq!(strategy.fill_value, Cell::from("a"));

        let flags = vec![Some(Cell::Bool(true)), Some(Cell::Bool(false)), None];
        let strategy = build_field_strategy("vip", &flags, &PreprocessingConfig::default()).unwrap();
        assert_eq!(strategy.fill_value, Cell::Bool(false));
    }

    #[test]
    fn test_numeric_strategies() {
        let config = PreprocessingConfig::default();

        let binary = build_field_strategy("flag", &nums(&[Some(0.0), Some(1.0), Some(1.0)]), &config).unwrap();
        assert_eq!(binary.kind, ColumnKind::BinaryNumeric);
        assert!(binary.scaler.is_none());
        assert_eq!(binary.fill_value, Cell::Number(1.0));

        let small = build_field_strategy("rating", &nums(&[Some(1.0), Some(3.0), Some(5.0), None]), &config).unwrap();
        assert_eq!(small.kind, ColumnKind::SmallIntegerCategorical);
        assert_eq!(small.scaler.map(|s| s.scaler_type()), Some(ScalerType::MinMax));
        assert_eq!(small.fill_value, Cell::Number(3.0));

        let price = build_field_strategy("price", &nums(&[Some(1.5), Some(2.5), Some(10.0)]), &config).unwrap();
        assert_eq!(price.kind, ColumnKind::ContinuousNumeric);
        assert_eq!(price.scaler.map(|s| s.scaler_type()), Some(ScalerType::Robust));
        assert_eq!(price.output_fields, vec!["price"]);
    }

    #[test]
    fn test_boolean_mode() {
        let column = vec![Some(Cell::Bool(false)), Some(Cell::Bool(true)), Some(Cell::Bool(true)), None];
        let strategy = build_field_strategy("vip", &column, &PreprocessingConfig::default()).unwrap();
        assert_eq!(strategy.kind, ColumnKind::Boolean);
        assert_eq!(strategy.fill_value, Cell::Bool(true));
    }

    #[test]
    fn test_infinite_values_count_as_missing() {
        let column = nums(&[Some(1.0), Some(f64::INFINITY), Some(f64::NEG_INFINITY), Some(2.5)]);
        let strategy = build_field_strategy("x", &column, &PreprocessingConfig::default()).unwrap();
        assert_eq!(strategy.fill_value, Cell::Number(1.75));

        let out = strategy.transform_column(Some(&nums(&[Some(f64::INFINITY)])), 1).unwrap();
        assert!(out[0][0].is_finite());

        let json = serde_json::to_string(&strategy).unwrap();
        assert_eq!(serde_json::from_str::<FieldStrategy>(&json).unwrap(), strategy);

        let all_infinite = nums(&[Some(f64::INFINITY), Some(f64::NAN)]);
        assert!(matches!(
            build_field_strategy("y", &all_infinite, &PreprocessingConfig::default()),
            Err(TabtuneError::SchemaInference { .. })
        ));
    }

    #[test]
    fn test_entirely_missing_column_fails() {
        let result = build_field_strategy("empty", &[None, None], &PreprocessingConfig::default());
        assert!(matches!(result, Err(TabtuneError::SchemaInference { .. })));
    }

    #[test]
    fn test_unseen_category_is_all_zero() {
        let column = text(&[Some("a"), Some("b")]);
        let strategy = build_field_strategy("x", &column, &PreprocessingConfig::default()).unwrap();
        let input = text(&[Some("zzz")]);
        let out = strategy.transform_column(Some(&input), 1).unwrap();
        assert_eq!(out, vec![vec![0.0], vec![0.0]]);
    }

    #[test]
    fn test_text_in_numeric_field_is_an_error() {
        let strategy = build_field_strategy("price", &nums(&[Some(1.5), Some(2.5)]), &PreprocessingConfig::default()).unwrap();
        let input = text(&[Some("cheap")]);
        let result = strategy.transform_column(Some(&input), 1);
        assert!(matches!(result, Err(TabtuneError::IncompatibleValue { .. })));
    }
}
