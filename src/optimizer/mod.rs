//! Hyperparameter search
//!
//! - [`ParameterGrid`] enumerates candidates as a Cartesian product, last key fastest
//! - [`GridSearch`] evaluates them one at a time and honors a [`CancellationToken`]
//! - failed candidates are logged and skipped, never fatal

mod cancel;
mod config;
mod grid;
mod search;

pub use cancel::CancellationToken;
pub use config::SearchConfig;
pub use grid::{CandidateIter, ParamCandidate, ParamValue, ParameterGrid};
pub use search::{
    CandidateEvaluator, CandidateRecord, CandidateStatus, Evaluation, GridSearch, NoResult,
    NoResultReason, SearchOutcome, SearchResult, SearchState, SearchStatus,
};
