//! Cancellable grid search scheduler
//!
//! Candidates run one at a time in enumeration order. The cancellation token
//! is polled before each candidate starts and after each successful one, so
//! a stop request never interrupts a candidate that is already running.

use super::cancel::CancellationToken;
use super::grid::{ParamCandidate, ParameterGrid};
use crate::error::{Result, TabtuneError};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What an evaluator returns for one candidate
#[derive(Debug, Clone)]
pub struct Evaluation<E> {
    /// One score per fold, higher is better
    pub fold_scores: Vec<f64>,
    /// The estimator fitted for this candidate
    pub estimator: E,
}

/// Scores a single candidate, typically by k-fold cross-validation.
///
/// Any error or panic is treated as a failure of that candidate only.
pub trait CandidateEvaluator {
    type Estimator;

    fn evaluate(&self, candidate: &ParamCandidate) -> Result<Evaluation<Self::Estimator>>;
}

impl<E, F> CandidateEvaluator for F
where
    F: Fn(&ParamCandidate) -> Result<Evaluation<E>>,
{
    type Estimator = E;

    fn evaluate(&self, candidate: &ParamCandidate) -> Result<Evaluation<E>> {
        self(candidate)
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Init,
    Running,
    Completed,
    CancelledEmpty,
    CancelledPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Ok,
    Failed,
}

/// One entry of the results log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Position in enumeration order
    pub index: usize,
    pub candidate: ParamCandidate,
    pub mean_score: Option<f64>,
    pub std_score: Option<f64>,
    pub fold_scores: Vec<f64>,
    pub status: CandidateStatus,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl CandidateRecord {
    pub fn is_ok(&self) -> bool {
        self.status == CandidateStatus::Ok
    }
}

/// Mutable state owned by a single run
#[derive(Debug)]
pub struct SearchState<E> {
    pub status: SearchStatus,
    pub total_count: usize,
    /// Candidates that finished successfully
    pub completed_count: usize,
    pub best_score: f64,
    pub best_index: Option<usize>,
    pub best_candidate: Option<ParamCandidate>,
    pub best_estimator: Option<E>,
    pub results_log: Vec<CandidateRecord>,
}

impl<E> SearchState<E> {
    fn new(total_count: usize) -> Self {
        Self {
            status: SearchStatus::Init,
            total_count,
            completed_count: 0,
            best_score: f64::NEG_INFINITY,
            best_index: None,
            best_candidate: None,
            best_estimator: None,
            results_log: Vec::new(),
        }
    }
}

/// Best candidate plus the full log of a completed or partially completed run
#[derive(Debug, Clone)]
pub struct SearchResult<E> {
    pub best_index: usize,
    pub best_candidate: ParamCandidate,
    pub best_score: f64,
    pub best_estimator: E,
    pub results_log: Vec<CandidateRecord>,
    pub completed_count: usize,
    pub total_count: usize,
    pub elapsed_secs: f64,
}

impl<E> SearchResult<E> {
    /// Successful log entries ranked by mean score; ties keep enumeration order
    pub fn ranked(&self) -> Vec<&CandidateRecord> {
        let mut ok: Vec<&CandidateRecord> = self.results_log.iter().filter(|r| r.is_ok()).collect();
        ok.sort_by(|a, b| {
            let a = a.mean_score.unwrap_or(f64::NEG_INFINITY);
            let b = b.mean_score.unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });
        ok
    }

    pub fn failed_count(&self) -> usize {
        self.results_log.iter().filter(|r| !r.is_ok()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResultReason {
    /// Stopped before any candidate finished successfully
    CancelledBeforeFirst,
    /// Every candidate was evaluated and every one failed
    AllCandidatesFailed,
}

/// Explicit "no result" marker, distinct from a low-scoring run
#[derive(Debug, Clone)]
pub struct NoResult {
    pub reason: NoResultReason,
    pub results_log: Vec<CandidateRecord>,
    pub total_count: usize,
}

/// How a search ended
#[derive(Debug, Clone)]
pub enum SearchOutcome<E> {
    Completed(SearchResult<E>),
    Partial(SearchResult<E>),
    NoResult(NoResult),
}

impl<E> SearchOutcome<E> {
    pub fn status(&self) -> SearchStatus {
        match self {
            SearchOutcome::Completed(_) => SearchStatus::Completed,
            SearchOutcome::Partial(_) => SearchStatus::CancelledPartial,
            SearchOutcome::NoResult(NoResult {
                reason: NoResultReason::CancelledBeforeFirst,
                ..
            }) => SearchStatus::CancelledEmpty,
            SearchOutcome::NoResult(_) => SearchStatus::Completed,
        }
    }

    pub fn result(&self) -> Option<&SearchResult<E>> {
        match self {
            SearchOutcome::Completed(r) | SearchOutcome::Partial(r) => Some(r),
            SearchOutcome::NoResult(_) => None,
        }
    }

    pub fn into_result(self) -> Option<SearchResult<E>> {
        match self {
            SearchOutcome::Completed(r) | SearchOutcome::Partial(r) => Some(r),
            SearchOutcome::NoResult(_) => None,
        }
    }

    pub fn results_log(&self) -> &[CandidateRecord] {
        match self {
            SearchOutcome::Completed(r) | SearchOutcome::Partial(r) => &r.results_log,
            SearchOutcome::NoResult(n) => &n.results_log,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.status(),
            SearchStatus::CancelledEmpty | SearchStatus::CancelledPartial
        )
    }
}

/// Exhaustive, cooperatively cancellable search over a [`ParameterGrid`]
#[derive(Debug, Clone)]
pub struct GridSearch {
    grid: ParameterGrid,
}

impl GridSearch {
    /// Create a scheduler; an empty grid or an empty value list is rejected here,
    /// before any candidate can run
    pub fn new(grid: ParameterGrid) -> Result<Self> {
        grid.validate()?;
        Ok(Self { grid })
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn total_count(&self) -> usize {
        self.grid.total_count()
    }

    /// Run every candidate in order until done or cancelled.
    ///
    /// The token is only read. Callers reset it before a fresh run.
    pub fn run<V>(&self, evaluator: &V, token: &CancellationToken) -> SearchOutcome<V::Estimator>
    where
        V: CandidateEvaluator + ?Sized,
    {
        let start = Instant::now();
        let candidates = self.grid.iter();
        let mut state = SearchState::new(candidates.total_count());
        state.status = SearchStatus::Running;

        info!(total = state.total_count, "Starting grid search");

        for (index, candidate) in candidates.enumerate() {
            if token.is_cancelled() {
                state.status = if state.completed_count == 0 {
                    SearchStatus::CancelledEmpty
                } else {
                    SearchStatus::CancelledPartial
                };
                info!(
                    index,
                    completed = state.completed_count,
                    "Search cancelled before starting candidate"
                );
                break;
            }

            debug!(
                index,
                total = state.total_count,
                candidate = %candidate,
                "Evaluating candidate"
            );
            let candidate_start = Instant::now();
            let evaluated = evaluate_isolated(evaluator, &candidate).and_then(|evaluation| {
                let (mean, std) = summarize(&evaluation.fold_scores).ok_or_else(|| {
                    TabtuneError::CandidateEvaluation {
                        candidate: candidate.to_string(),
                        reason: "no finite fold scores".to_string(),
                    }
                })?;
                Ok((evaluation, mean, std))
            });
            let duration_secs = candidate_start.elapsed().as_secs_f64();

            let (evaluation, mean, std) = match evaluated {
                Ok(ok) => ok,
                Err(err) => {
                    warn!(index, candidate = %candidate, error = %err, "Candidate failed");
                    state.results_log.push(CandidateRecord {
                        index,
                        candidate,
                        mean_score: None,
                        std_score: None,
                        fold_scores: Vec::new(),
                        status: CandidateStatus::Failed,
                        error: Some(err.to_string()),
                        duration_secs,
                    });
                    continue;
                }
            };

            info!(index, mean_score = mean, std_score = std, "Candidate scored");
            state.results_log.push(CandidateRecord {
                index,
                candidate: candidate.clone(),
                mean_score: Some(mean),
                std_score: Some(std),
                fold_scores: evaluation.fold_scores,
                status: CandidateStatus::Ok,
                error: None,
                duration_secs,
            });

            // strict comparison: ties keep the earliest candidate
            if mean > state.best_score {
                state.best_score = mean;
                state.best_index = Some(index);
                state.best_estimator = Some(evaluation.estimator);
                info!(index, best_score = mean, candidate = %candidate, "New best score");
                state.best_candidate = Some(candidate);
            }

            state.completed_count += 1;

            if token.is_cancelled() {
                state.status = SearchStatus::CancelledPartial;
                info!(
                    completed = state.completed_count,
                    total = state.total_count,
                    "Search cancelled after candidate"
                );
                break;
            }
        }

        if state.status == SearchStatus::Running {
            state.status = SearchStatus::Completed;
        }

        finish(state, start.elapsed().as_secs_f64())
    }
}

fn finish<E>(state: SearchState<E>, elapsed_secs: f64) -> SearchOutcome<E> {
    let SearchState {
        status,
        total_count,
        completed_count,
        best_score,
        best_index,
        best_candidate,
        best_estimator,
        results_log,
    } = state;

    let best = match (best_index, best_candidate, best_estimator) {
        (Some(index), Some(candidate), Some(estimator)) => Some((index, candidate, estimator)),
        _ => None,
    };

    match (status, best) {
        (SearchStatus::CancelledEmpty, _) | (_, None) => {
            let reason = if status == SearchStatus::Completed {
                NoResultReason::AllCandidatesFailed
            } else {
                NoResultReason::CancelledBeforeFirst
            };
            info!(?reason, logged = results_log.len(), "Grid search produced no result");
            SearchOutcome::NoResult(NoResult {
                reason,
                results_log,
                total_count,
            })
        }
        (status, Some((best_index, best_candidate, best_estimator))) => {
            let result = SearchResult {
                best_index,
                best_candidate,
                best_score,
                best_estimator,
                results_log,
                completed_count,
                total_count,
                elapsed_secs,
            };
            info!(
                best_score,
                completed = completed_count,
                total = total_count,
                elapsed_secs,
                "Grid search finished"
            );
            if status == SearchStatus::Completed {
                SearchOutcome::Completed(result)
            } else {
                SearchOutcome::Partial(result)
            }
        }
    }
}

/// Evaluate one candidate, turning panics into candidate errors
fn evaluate_isolated<V>(evaluator: &V, candidate: &ParamCandidate) -> Result<Evaluation<V::Estimator>>
where
    V: CandidateEvaluator + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(candidate))) {
        Ok(Ok(evaluation)) => Ok(evaluation),
        Ok(Err(TabtuneError::CandidateEvaluation { candidate, reason })) => {
            Err(TabtuneError::CandidateEvaluation { candidate, reason })
        }
        Ok(Err(err)) => Err(TabtuneError::CandidateEvaluation {
            candidate: candidate.to_string(),
            reason: err.to_string(),
        }),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "evaluation panicked".to_string());
            Err(TabtuneError::CandidateEvaluation {
                candidate: candidate.to_string(),
                reason,
            })
        }
    }
}

/// Mean and population standard deviation; `None` when empty or non-finite
fn summarize(scores: &[f64]) -> Option<(f64, f64)> {
    if scores.is_empty() || scores.iter().any(|s| !s.is_finite()) {
        return None;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn grid_of(n: i64) -> ParameterGrid {
        ParameterGrid::new().with_param("i", 0..n)
    }

    fn index_of(candidate: &ParamCandidate) -> usize {
        candidate.get("i").and_then(|v| v.as_i64()).unwrap_or(-1) as usize
    }

    #[test]
    fn test_completed_run_picks_first_max() {
        let scores = [0.5, 0.7, 0.6, 0.7];
        let search = GridSearch::new(grid_of(4)).unwrap();
        let evaluator = |c: &ParamCandidate| -> Result<Evaluation<usize>> {
            let i = index_of(c);
            Ok(Evaluation { fold_scores: vec![scores[i]; 3], estimator: i })
        };

        let outcome = search.run(&evaluator, &CancellationToken::new());
        assert_eq!(outcome.status(), SearchStatus::Completed);
        let result = outcome.into_result().unwrap();
        assert_eq!(result.best_index, 1);
        assert_eq!(result.best_estimator, 1);
        assert_eq!(result.completed_count, 4);
        assert_eq!(result.results_log.len(), 4);
    }

    #[test]
    fn test_cancel_before_start_is_no_result() {
        let token = CancellationToken::new();
        token.request_stop();
        let calls = Cell::new(0);
        let evaluator = |_: &ParamCandidate| -> Result<Evaluation<()>> {
            calls.set(calls.get() + 1);
            Ok(Evaluation { fold_scores: vec![1.0], estimator: () })
        };

        let outcome = GridSearch::new(grid_of(3)).unwrap().run(&evaluator, &token);
        assert_eq!(outcome.status(), SearchStatus::CancelledEmpty);
        assert!(outcome.results_log().is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_cancel_during_first_candidate_keeps_it() {
        let token = CancellationToken::new();
        let evaluator = |c: &ParamCandidate| -> Result<Evaluation<usize>> {
            token.request_stop();
            Ok(Evaluation { fold_scores: vec![0.1], estimator: index_of(c) })
        };

        let outcome = GridSearch::new(grid_of(5)).unwrap().run(&evaluator, &token);
        assert_eq!(outcome.status(), SearchStatus::CancelledPartial);
        let result = outcome.into_result().unwrap();
        assert_eq!(result.best_index, 0);
        assert_eq!(result.completed_count, 1);
        assert_eq!(result.total_count, 5);
    }

    #[test]
    fn test_failed_and_panicking_candidates_are_isolated() {
        let evaluator = |c: &ParamCandidate| -> Result<Evaluation<usize>> {
            match index_of(c) {
                1 => panic!("bad candidate"),
                2 => Err(TabtuneError::TrainingError("diverged".into())),
                i => Ok(Evaluation { fold_scores: vec![i as f64], estimator: i }),
            }
        };

        let outcome = GridSearch::new(grid_of(4)).unwrap().run(&evaluator, &CancellationToken::new());
        let result = outcome.into_result().unwrap();
        assert_eq!(result.best_index, 3);
        assert_eq!(result.completed_count, 2);
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.results_log[1].error.as_deref().map(|e| e.contains("bad candidate")), Some(true));
        assert_eq!(result.results_log[2].status, CandidateStatus::Failed);
    }

    #[test]
    fn test_all_failed_is_no_result() {
        let evaluator = |_: &ParamCandidate| -> Result<Evaluation<()>> {
            Ok(Evaluation { fold_scores: vec![f64::NAN], estimator: () })
        };
        let outcome = GridSearch::new(grid_of(2)).unwrap().run(&evaluator, &CancellationToken::new());
        match outcome {
            SearchOutcome::NoResult(n) => {
                assert_eq!(n.reason, NoResultReason::AllCandidatesFailed);
                assert_eq!(n.results_log.len(), 2);
            }
            other => panic!("unexpected outcome {:?}", other.status()),
        }
    }

    #[test]
    fn test_summarize_population_std() {
        let (mean, std) = summarize(&[1.0, 3.0]).unwrap();
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_ranked_orders_by_score() {
        let evaluator = |c: &ParamCandidate| -> Result<Evaluation<()>> {
            let i = index_of(c) as f64;
            Ok(Evaluation { fold_scores: vec![(i - 1.0).abs()], estimator: () })
        };
        let result = GridSearch::new(grid_of(3))
            .unwrap()
            .run(&evaluator, &CancellationToken::new())
            .into_result()
            .unwrap();
        // scores 1, 0, 1: the first 1 stays ahead of the second
        let order: Vec<usize> = result.ranked().iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }
}
