//! Utility functions and types

pub mod data_loader;

pub use data_loader::{data_path_warning, model_path_warning, save_csv, DataLoader};
