//! Schema-inferring feature preprocessing
//!
//! Column kinds are inferred from observed values only:
//! - string/boolean columns are one-hot encoded or cast to {0, 1}
//! - small-integer columns are min-max scaled, continuous columns robust-scaled
//! - missing values take the mode (categorical) or median (numeric) learned at fit time

mod config;
mod kind;
mod pipeline;
mod scaler;
mod strategy;
mod table;

pub use config::PreprocessingConfig;
pub use kind::{infer_column_kind, ColumnKind};
pub use pipeline::{Preprocessor, PREPROCESSOR_FORMAT_VERSION};
pub use scaler::{FittedScaler, ScalerType};
pub use strategy::{build_field_strategy, Encoding, FieldStrategy};
pub use table::{Cell, Record, Table};
