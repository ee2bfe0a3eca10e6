mod cli;
mod commands;
mod error;
mod output;
mod telemetry;

use clap::Parser;
use std::process::ExitCode;

use reelhouse_core::PipelineConfig;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match &cli.home {
        Some(home) => PipelineConfig::with_home(home),
        None => PipelineConfig::from_env(),
    };
    let _guard = telemetry::init(&config.log_dir, cli.verbose, cli.quiet);

    match run(&cli, config).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(%error, "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run(cli: &Cli, config: PipelineConfig) -> Result<ExitCode, CliError> {
    let outcome = commands::run(cli, config).await?;
    output::render(&outcome.envelope, cli.format, cli.pretty)?;

    match outcome.failure {
        Some(error) => {
            eprintln!("error: {error}");
            Ok(ExitCode::from(error.exit_code()))
        }
        None => Ok(ExitCode::SUCCESS),
    }
}
