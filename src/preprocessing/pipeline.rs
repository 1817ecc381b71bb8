//! Schema-inferring preprocessor
//!
//! `fit` learns one [`FieldStrategy`] per field and fixes the output shape;
//! `transform` replays those strategies without touching the fitted state.

use super::config::PreprocessingConfig;
use super::strategy::{build_field_strategy, FieldStrategy};
use super::table::{Record, Table};
use crate::error::{Result, TabtuneError};
use indexmap::IndexMap;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Version written into every saved preprocessor record
pub const PREPROCESSOR_FORMAT_VERSION: u32 = 1;

/// Learns per-field strategies and applies them deterministically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    config: PreprocessingConfig,
    fit_order: Vec<String>,
    strategies: IndexMap<String, FieldStrategy>,
    final_output_fields: Vec<String>,
    is_fitted: bool,
}

#[derive(Serialize)]
struct VersionedRef<'a> {
    format_version: u32,
    preprocessor: &'a Preprocessor,
}

#[derive(Deserialize)]
struct Versioned {
    format_version: u32,
    preprocessor: Preprocessor,
}

impl Preprocessor {
    /// Create a new preprocessor with default configuration
    pub fn new() -> Self {
        Self::with_config(PreprocessingConfig::default())
    }

    /// Create a new preprocessor with custom configuration
    pub fn with_config(config: PreprocessingConfig) -> Self {
        Self {
            config,
            fit_order: Vec::new(),
            strategies: IndexMap::new(),
            final_output_fields: Vec::new(),
            is_fitted: false,
        }
    }

    /// Fit on a polars frame. `fields` defaults to every column, in frame order.
    pub fn fit(&mut self, df: &DataFrame, fields: Option<&[String]>) -> Result<&mut Self> {
        let table = Table::from_frame(df)?;
        self.fit_table(&table, fields)
    }

    /// Fit on a cell table.
    ///
    /// Any previous state is discarded first, so a failed fit leaves the
    /// preprocessor unfitted rather than half-updated.
    pub fn fit_table(&mut self, table: &Table, fields: Option<&[String]>) -> Result<&mut Self> {
        let start = Instant::now();
        self.reset();

        let fields: Vec<String> = match fields {
            Some(fields) => fields.to_vec(),
            None => table.column_names().map(String::from).collect(),
        };

        let missing: Vec<&str> = fields
            .iter()
            .filter(|f| !table.contains(f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(TabtuneError::FeatureNotFound(missing.join(", ")));
        }

        let mut strategies = IndexMap::with_capacity(fields.len());
        let mut output_fields = Vec::new();
        let mut seen = HashSet::new();

        for field in &fields {
            if strategies.contains_key(field) {
                return Err(TabtuneError::ValidationError(format!(
                    "field '{}' listed more than once",
                    field
                )));
            }
            let values = table
                .column(field)
                .ok_or_else(|| TabtuneError::FeatureNotFound(field.clone()))?;
            let strategy = build_field_strategy(field, values, &self.config)?;
            debug!(
                field = %field,
                kind = %strategy.kind,
                outputs = strategy.output_fields.len(),
                "learned field strategy"
            );

            for name in &strategy.output_fields {
                if !seen.insert(name.clone()) {
                    return Err(TabtuneError::schema(
                        field.as_str(),
                        format!("output field '{}' collides with an earlier output", name),
                    ));
                }
                output_fields.push(name.clone());
            }
            strategies.insert(field.clone(), strategy);
        }

        self.fit_order = fields;
        self.strategies = strategies;
        self.final_output_fields = output_fields;
        self.is_fitted = true;

        debug!(
            fields = self.fit_order.len(),
            outputs = self.final_output_fields.len(),
            rows = table.n_rows(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "preprocessor fitted"
        );
        Ok(self)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, df: &DataFrame, fields: Option<&[String]>) -> Result<DataFrame> {
        self.fit(df, fields)?;
        self.transform(df)
    }

    /// Transform a batch into a frame whose columns are exactly `final_output_fields`
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let table = Table::from_frame(df)?;
        self.matrix_to_frame(&self.transform_table(&table)?)
    }

    /// Transform a single record as a one-row batch
    pub fn transform_record(&self, record: &Record) -> Result<DataFrame> {
        let table = Table::from_record(record);
        self.matrix_to_frame(&self.transform_table(&table)?)
    }

    /// Transform a polars frame straight into a feature matrix
    pub fn transform_matrix(&self, df: &DataFrame) -> Result<Array2<f64>> {
        self.transform_table(&Table::from_frame(df)?)
    }

    /// Core transform: rows x `final_output_fields`.
    ///
    /// Columns the preprocessor never saw are ignored; fit-known fields that
    /// are absent take their fill value.
    pub fn transform_table(&self, table: &Table) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(TabtuneError::ModelNotFitted);
        }

        let n_rows = table.n_rows();
        let n_outputs = self.final_output_fields.len();
        let mut matrix = Array2::<f64>::zeros((n_rows, n_outputs));
        let mut offset = 0;

        for field in &self.fit_order {
            let strategy = self
                .strategies
                .get(field)
                .ok_or_else(|| TabtuneError::FeatureNotFound(field.clone()))?;
            let outputs = strategy.transform_column(table.column(field), n_rows)?;
            for (j, values) in outputs.into_iter().enumerate() {
                for (i, v) in values.into_iter().enumerate() {
                    matrix[[i, offset + j]] = v;
                }
            }
            offset += strategy.output_fields.len();
        }

        Ok(matrix)
    }

    fn matrix_to_frame(&self, matrix: &Array2<f64>) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .final_output_fields
            .iter()
            .enumerate()
            .map(|(j, name)| Column::new(name.as_str().into(), matrix.column(j).to_vec()))
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    fn reset(&mut self) {
        self.fit_order.clear();
        self.strategies.clear();
        self.final_output_fields.clear();
        self.is_fitted = false;
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Input fields in the order they were fitted
    pub fn fit_order(&self) -> &[String] {
        &self.fit_order
    }

    pub fn strategy(&self, field: &str) -> Option<&FieldStrategy> {
        self.strategies.get(field)
    }

    pub fn strategies(&self) -> impl Iterator<Item = &FieldStrategy> {
        self.strategies.values()
    }

    /// The only valid output shape, fixed at fit time
    pub fn final_output_fields(&self) -> &[String] {
        &self.final_output_fields
    }

    /// Serialize the fit state as a versioned JSON record
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&VersionedRef {
            format_version: PREPROCESSOR_FORMAT_VERSION,
            preprocessor: self,
        })?)
    }

    /// Restore a preprocessor from a versioned JSON record
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Versioned = serde_json::from_str(json)
            .map_err(|e| TabtuneError::Persistence(format!("unreadable preprocessor record: {}", e)))?;
        if record.format_version != PREPROCESSOR_FORMAT_VERSION {
            return Err(TabtuneError::Persistence(format!(
                "unsupported preprocessor format version {} (expected {})",
                record.format_version, PREPROCESSOR_FORMAT_VERSION
            )));
        }
        Ok(record.preprocessor)
    }

    /// Save the preprocessor to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a preprocessor from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
