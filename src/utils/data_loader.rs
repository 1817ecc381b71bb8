//! Data loading utilities

use crate::error::{Result, TabtuneError};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// CSV loader backed by polars
#[derive(Debug, Clone)]
pub struct DataLoader {
    separator: u8,
    infer_schema_length: Option<usize>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader that scans every row to infer dtypes
    pub fn new() -> Self {
        Self {
            separator: b',',
            infer_schema_length: None,
        }
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Rows scanned to infer column dtypes; `None` scans the whole file
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load a CSV file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let start = Instant::now();
        let file = File::open(path)
            .map_err(|e| TabtuneError::DataError(format!("cannot open {}: {}", path.display(), e)))?;

        let parse_opts = CsvParseOptions::default().with_separator(self.separator);
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| TabtuneError::DataError(format!("cannot parse {}: {}", path.display(), e)))?;

        debug!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "csv loaded"
        );
        Ok(df)
    }

    /// Pick the separator from the extension; anything other than `.tsv` is read as CSV
    pub fn load_auto(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        if let Some(message) = data_path_warning(path) {
            warn!("{}", message);
        }
        if has_extension(path, &["tsv"]) {
            self.clone().with_separator(b'\t').load_csv(path)
        } else {
            self.load_csv(path)
        }
    }
}

/// Write a frame as CSV with a header row
pub fn save_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let mut file = File::create(path.as_ref())?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Warning for data files that are not CSV
pub fn data_path_warning(path: &Path) -> Option<String> {
    if has_extension(path, &["csv", "tsv"]) {
        None
    } else {
        Some(format!("{} does not look like a CSV file", path.display()))
    }
}

/// Warning for model files without a `.json` extension
pub fn model_path_warning(path: &Path) -> Option<String> {
    if has_extension(path, &["json"]) {
        None
    } else {
        Some(format!("model file {} should use the .json extension", path.display()))
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}
