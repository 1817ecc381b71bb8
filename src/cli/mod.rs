//! tabtune CLI Module
//!
//! Command-line interface for training, tuning, prediction and configuration.

use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::export::{load_model, LoadedModel, ModelBundle};
use crate::optimizer::{CancellationToken, CandidateStatus, NoResultReason};
use crate::training::{
    ClassificationReport, FeatureImportance, TrainEngine, TrainOutcome, TrainingConfig, TuneOutcome,
};
use crate::utils::{data_path_warning, model_path_warning, save_csv, DataLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn step_warn(msg: &str) {
    println!("  {} {}", "!".yellow(), msg.yellow());
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tabtune")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Schema-inferring preprocessing and grid search for binary classifiers")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Column and config options shared by `train` and `tune`
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Input data file (CSV)
    #[arg(short, long)]
    pub data: PathBuf,

    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target column name
    #[arg(short, long)]
    pub target: Option<String>,

    /// Comma-separated feature columns; all other columns when omitted
    #[arg(long, value_delimiter = ',')]
    pub features: Option<Vec<String>>,

    /// Comma-separated columns to leave out of the implicit feature list
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model with fixed parameters and save it
    Train {
        #[command(flatten)]
        run: RunArgs,

        /// Output model file
        #[arg(short, long, default_value = "model.json")]
        output: PathBuf,
    },

    /// Grid-search hyperparameters with cross-validation
    Tune {
        #[command(flatten)]
        run: RunArgs,

        /// Search the small built-in grid
        #[arg(long)]
        quick: bool,

        /// Number of cross-validation folds
        #[arg(long)]
        cv_folds: Option<usize>,

        /// Save the best model to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Retrain on every row with the best parameters and save that model
        #[arg(long)]
        train_best: bool,

        /// Write the per-candidate results log as JSON
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Make predictions using a trained model
    Predict {
        /// Trained model file
        #[arg(short, long)]
        model: PathBuf,

        /// Input data file
        #[arg(short, long)]
        data: PathBuf,

        /// Output predictions file (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect, validate or export a configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check a configuration and the paths it will be used with
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        data: Option<PathBuf>,

        #[arg(short, long)]
        model: Option<PathBuf>,
    },
    /// Write the configuration to a JSON file
    Export {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ─── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> anyhow::Result<TrainingConfig> {
    Ok(match path {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    })
}

/// Apply command-line column overrides on top of the loaded config
pub fn build_config(run: &RunArgs) -> anyhow::Result<TrainingConfig> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(target) = &run.target {
        config.target_column = target.clone();
    }
    if let Some(features) = &run.features {
        config.feature_columns = Some(features.clone());
    }
    if !run.exclude.is_empty() {
        config.exclude_columns = run.exclude.clone();
    }
    Ok(config)
}

/// First Ctrl-C asks the running search or training to stop at its next check
fn stop_on_ctrl_c(engine: &TrainEngine) {
    let token = engine.token().clone();
    let installed = ctrlc::set_handler(move || {
        if interrupt(&token) {
            eprintln!("\n  {} stopping after the current step...", "!".yellow());
        }
    });
    if let Err(e) = installed {
        step_warn(&format!("Ctrl-C will not stop the run gracefully: {}", e));
    }
}

/// Request a stop; true only for the first request on this token
fn interrupt(token: &CancellationToken) -> bool {
    let first = !token.is_cancelled();
    token.request_stop();
    first
}

fn load_data(path: &Path) -> anyhow::Result<DataFrame> {
    step_run("Loading data");
    let start = Instant::now();
    let df = DataLoader::new().load_auto(path)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));
    Ok(df)
}

fn print_report(title: &str, report: &ClassificationReport) {
    section(title);
    for line in report.to_string().lines() {
        println!("  {}", line);
    }
}

fn print_importances(importances: &[FeatureImportance], limit: usize) {
    section("Feature importance");
    for item in importances.iter().take(limit) {
        println!("  {:<32} {:>8.4} {}", item.name, item.mean, dim(&format!("± {:.4}", item.std)));
    }
    if importances.len() > limit {
        println!("  {}", dim(&format!("… {} more", importances.len() - limit)));
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(run: &RunArgs, output: &Path) -> anyhow::Result<()> {
    section("Train");
    let config = build_config(run)?;
    if let Some(message) = model_path_warning(output) {
        step_warn(&message);
    }
    let engine = TrainEngine::new(config)?;
    stop_on_ctrl_c(&engine);
    let df = load_data(&run.data)?;

    step_run("Training");
    let outcome = engine.train_model(&df, Some(output))?;
    let report = match outcome {
        TrainOutcome::Completed(report) => report,
        TrainOutcome::Stopped { stage } => {
            println!("{}", format!("stopped {}", stage).yellow());
            return Ok(());
        }
    };
    step_done(&format!("{:.2}s", report.elapsed_secs));

    kv("Target", &report.columns.target);
    kv("Features", &report.columns.features.join(", "));
    kv("Rows", &format!("{} train / {} valid", report.n_train, report.n_valid));
    print_report("Training split", &report.train_metrics);
    print_report("Validation split", &report.valid_metrics);
    print_importances(&report.importances, 15);

    println!();
    println!("  {} {}", ok("saved"), output.display());
    println!();
    Ok(())
}

pub fn cmd_tune(
    run: &RunArgs,
    quick: bool,
    cv_folds: Option<usize>,
    output: Option<&Path>,
    log: Option<&Path>,
    train_best: bool,
) -> anyhow::Result<()> {
    section("Tune");
    let mut config = build_config(run)?.with_quick_mode(quick);
    if let Some(folds) = cv_folds {
        config.cv_folds = folds;
    }
    let total = config.effective_grid().total_count();
    let engine = TrainEngine::new(config)?;
    stop_on_ctrl_c(&engine);
    let df = load_data(&run.data)?;

    step_run(&format!("Searching {} candidates", total));
    let start = Instant::now();
    let outcome = engine.tune_hyperparameters(&df)?;
    step_done(&format!("{:?}", start.elapsed()));

    let (result, validation, partial, columns) = match outcome {
        TuneOutcome::NoResult(no_result) => {
            let reason = match no_result.reason {
                NoResultReason::CancelledBeforeFirst => "stopped before any candidate finished",
                NoResultReason::AllCandidatesFailed => "every candidate failed",
            };
            for record in &no_result.results_log {
                if let Some(error) = &record.error {
                    step_warn(&format!("#{} {}: {}", record.index, record.candidate, error));
                }
            }
            anyhow::bail!("no result: {}", reason);
        }
        TuneOutcome::Tuned {
            result,
            validation,
            partial,
            columns,
        } => (result, validation, partial, columns),
    };

    section("Candidates");
    for record in result.ranked().into_iter().take(10) {
        let score = record.mean_score.unwrap_or(f64::NAN);
        let std = record.std_score.unwrap_or(0.0);
        println!("  {:>4}  {:.4} {}  {}", record.index, score, dim(&format!("± {:.4}", std)), record.candidate);
    }
    for record in result.results_log.iter().filter(|r| r.status == CandidateStatus::Failed) {
        step_warn(&format!("#{} failed: {}", record.index, record.error.as_deref().unwrap_or("unknown error")));
    }

    section("Best");
    kv("Candidate", &result.best_candidate.to_string());
    kv("CV score", &format!("{:.4}", result.best_score));
    kv("Completed", &format!("{}/{}", result.completed_count, result.total_count));
    if partial {
        step_warn("search was stopped early; results are partial");
    }

    match &validation {
        Some(report) => print_report("Validation split", report),
        None => step_warn("validation skipped"),
    }

    if let Some(path) = log {
        std::fs::write(path, serde_json::to_string_pretty(&result.results_log)?)?;
        println!("  {} {}", ok("log"), path.display());
    }
    if train_best {
        if partial {
            step_warn("search was stopped; not retraining with the best parameters");
        } else {
            let path = output.unwrap_or_else(|| Path::new("model.json"));
            if let Some(message) = model_path_warning(path) {
                step_warn(&message);
            }
            step_run("Retraining on all rows with the best parameters");
            match engine.with_best_params(&result.best_candidate)?.train_model(&df, Some(path))? {
                TrainOutcome::Completed(report) => {
                    step_done(&format!("{:.2}s", report.elapsed_secs));
                    print_report("Validation split (retrained)", &report.valid_metrics);
                    print_importances(&report.importances, 15);
                    println!("  {} {}", ok("saved"), path.display());
                }
                TrainOutcome::Stopped { stage } => {
                    println!("{}", format!("stopped {}", stage).yellow());
                }
            }
        }
    } else if let Some(path) = output {
        if let Some(message) = model_path_warning(path) {
            step_warn(&message);
        }
        ModelBundle::new(result.best_estimator, columns.features, columns.target).save(path)?;
        println!("  {} {}", ok("saved"), path.display());
    }
    println!();
    Ok(())
}

pub fn cmd_predict(model_path: &Path, data_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading model");
    let model = load_model(model_path)?;
    match &model {
        LoadedModel::Full(bundle) => step_done(&format!("{} features", bundle.feature_columns.len())),
        LoadedModel::Legacy { .. } => {
            step_done("legacy");
            step_warn("model has no preprocessing metadata; input must already be encoded");
        }
    }

    let df = load_data(data_path)?;
    step_run("Scoring");
    let positive = model.predict_positive(&df)?;
    step_done(&format!("{} rows", positive.len()));

    let labels: Vec<i32> = positive.iter().map(|&p| i32::from(p >= 0.5)).collect();
    let mut predictions = DataFrame::new(vec![
        Column::new("probability".into(), positive.to_vec()),
        Column::new("prediction".into(), labels),
    ])?;

    match output {
        Some(path) => {
            save_csv(&mut predictions, path)?;
            println!("  {} {}", ok("saved"), path.display());
        }
        None => println!("{}", predictions),
    }
    println!();
    Ok(())
}

pub fn cmd_config(action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_json()?);
        }
        ConfigAction::Validate { config, data, model } => {
            section("Validate");
            let config = load_config(config.as_deref())?;
            let mut report = config.validate();
            if let Some(message) = data.as_deref().and_then(data_path_warning) {
                report.warnings.push(message);
            }
            if let Some(message) = model.as_deref().and_then(model_path_warning) {
                report.warnings.push(message);
            }
            for warning in &report.warnings {
                step_warn(warning);
            }
            for error in &report.errors {
                println!("  {} {}", "✗".red(), error.red());
            }
            if !report.is_ok() {
                anyhow::bail!("{} configuration error(s)", report.errors.len());
            }
            println!("  {} configuration is valid", ok("✓"));
        }
        ConfigAction::Export { output, config } => {
            load_config(config.as_deref())?.save(output)?;
            println!("  {} {}", ok("saved"), output.display());
        }
    }
    Ok(())
}
