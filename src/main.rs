//! tabtune - Main Entry Point

use clap::Parser;
use tabtune::cli::{cmd_config, cmd_predict, cmd_train, cmd_tune, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabtune=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { run, output } => {
            cmd_train(&run, &output)?;
        }
        Commands::Tune { run, quick, cv_folds, output, log, train_best } => {
            cmd_tune(&run, quick, cv_folds, output.as_deref(), log.as_deref(), train_best)?;
        }
        Commands::Predict { model, data, output } => {
            cmd_predict(&model, &data, output.as_deref())?;
        }
        Commands::Config { action } => {
            cmd_config(&action)?;
        }
    }

    Ok(())
}
