//! Preprocessing configuration

use serde::{Deserialize, Serialize};

/// Configuration for schema inference and encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Integer columns with at most this many distinct values are treated as
    /// small-integer categorical and min-max scaled
    pub categorical_threshold: usize,

    /// Separator between field name and category in one-hot output names
    pub name_separator: String,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            categorical_threshold: 10,
            name_separator: "_".to_string(),
        }
    }
}

impl PreprocessingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the categorical threshold
    pub fn with_categorical_threshold(mut self, threshold: usize) -> Self {
        self.categorical_threshold = threshold;
        self
    }

    /// Builder method to set the one-hot name separator
    pub fn with_name_separator(mut self, separator: impl Into<String>) -> Self {
        self.name_separator = separator.into();
        self
    }
}
