//! Value-level view of tabular input
//!
//! Column kinds are inferred from observed values, so the preprocessor works on
//! cells rather than on a declared schema. A polars `DataFrame` and a single
//! [`Record`] both lower into the same [`Table`].

use crate::error::{Result, TabtuneError};
use indexmap::IndexMap;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observed, non-missing value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Short name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Bool(_) => "boolean",
            Cell::Number(_) => "number",
            Cell::Text(_) => "text",
        }
    }

    /// False for NaN and infinite numbers, which count as missing
    pub fn is_observed(&self) -> bool {
        !matches!(self, Cell::Number(v) if !v.is_finite())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Text form used when matching against a category catalog
    pub fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Bool(b) => b.to_string(),
            Cell::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
            Cell::Number(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Number(v as f64)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

/// A single input row keyed by field name. `None` marks an explicit missing value.
pub type Record = IndexMap<String, Option<Cell>>;

/// Column-major table of optional cells, columns kept in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    n_rows: usize,
    columns: IndexMap<String, Vec<Option<Cell>>>,
}

impl Table {
    /// Build a table from named columns; all columns must have the same length
    pub fn from_columns<I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<Option<Cell>>)>,
    {
        let mut table = Table::default();
        let mut first = true;
        for (name, values) in columns {
            if first {
                table.n_rows = values.len();
                first = false;
            } else if values.len() != table.n_rows {
                return Err(TabtuneError::DataError(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    table.n_rows
                )));
            }
            table.columns.insert(name, values);
        }
        Ok(table)
    }

    /// Lower a polars frame into cells
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let columns = df
            .get_columns()
            .iter()
            .map(|column| {
                let values = read_series(column.as_materialized_series())?;
                Ok((column.name().to_string(), values))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut table = Self::from_columns(columns)?;
        table.n_rows = df.height();
        Ok(table)
    }

    /// Promote a single record to a one-row table
    pub fn from_record(record: &Record) -> Self {
        Self {
            n_rows: 1,
            columns: record
                .iter()
                .map(|(name, value)| (name.clone(), vec![value.clone()]))
                .collect(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<Cell>]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Rows at `indices`, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            n_rows: indices.len(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| {
                    let picked = indices.iter().map(|&i| values[i].clone()).collect();
                    (name.clone(), picked)
                })
                .collect(),
        }
    }

    /// Keep only `names`, in that order
    pub fn select_columns(&self, names: &[String]) -> Result<Table> {
        let mut columns = IndexMap::with_capacity(names.len());
        for name in names {
            let values = self
                .columns
                .get(name)
                .ok_or_else(|| TabtuneError::FeatureNotFound(name.clone()))?;
            columns.insert(name.clone(), values.clone());
        }
        Ok(Table {
            n_rows: self.n_rows,
            columns,
        })
    }
}

/// Read a series as optional cells. NaN and infinite floats count as missing.
fn read_series(series: &Series) -> Result<Vec<Option<Cell>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.map(|s| Cell::Text(s.to_string())))
            .collect()),
        DataType::Boolean => Ok(series.bool()?.into_iter().map(|v| v.map(Cell::Bool)).collect()),
        DataType::Null => Ok(vec![None; series.len()]),
        _ => match series.cast(&DataType::Float64) {
            Ok(casted) => Ok(casted
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()).map(Cell::Number))
                .collect()),
            Err(_) => {
                let casted = series.cast(&DataType::String)?;
                Ok(casted
                    .str()?
                    .into_iter()
                    .map(|v| v.map(|s| Cell::Text(s.to_string())))
                    .collect())
            }
        },
    }
}
