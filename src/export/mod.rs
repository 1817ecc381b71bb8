//! Model persistence
//!
//! Bundles are versioned JSON documents; unversioned files load as legacy
//! models without preprocessing metadata.

mod bundle;

pub use bundle::{load_model, parse_model, LoadedModel, ModelBundle, BUNDLE_FORMAT_VERSION};
