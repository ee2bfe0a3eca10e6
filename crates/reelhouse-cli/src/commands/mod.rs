mod run;
mod sql;
mod stage;
mod status;

use std::time::Instant;

use reelhouse_core::{
    Envelope, EnvelopeError, EnvelopeMeta, PipelineConfig, PipelineContext, PipelineError,
    RunFailure, Stage,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub const SCHEMA_VERSION: &str = "v1.0.0";

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub stages: Vec<Stage>,
    pub run_id: Option<String>,
    /// Set when the command ran but failed; the envelope is still printed.
    pub failure: Option<CliError>,
}

impl CommandResult {
    pub fn ok(data: Value, stages: Vec<Stage>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            stages,
            run_id: None,
            failure: None,
        }
    }

    /// Describe a failed pipeline run: completed stages as data, one error
    /// entry per problem, and the failure kept for the exit code.
    pub fn from_failure(failure: RunFailure) -> Result<Self, CliError> {
        let RunFailure {
            run_id,
            stage,
            completed,
            source,
        } = failure;

        let mut stages: Vec<Stage> = completed.iter().map(|outcome| outcome.stage).collect();
        stages.extend(stage);

        let mut data = json!({ "completed": completed });
        let mut errors = Vec::new();
        match &source {
            PipelineError::Validation { failures, .. } => {
                data["failures"] = serde_json::to_value(failures)?;
                for check in failures {
                    errors.push(tag_stage(
                        EnvelopeError::new(check.check_name(), check.to_string())?,
                        stage,
                    ));
                }
            }
            PipelineError::Download(error) => errors.push(tag_stage(
                EnvelopeError::new(source.code(), source.to_string())?
                    .with_retryable(error.is_retryable()),
                stage,
            )),
            _ => errors.push(tag_stage(
                EnvelopeError::new(source.code(), source.to_string())?,
                stage,
            )),
        }

        Ok(Self {
            data,
            warnings: Vec::new(),
            errors,
            stages,
            run_id: Some(run_id),
            failure: Some(CliError::Pipeline(source)),
        })
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

fn tag_stage(error: EnvelopeError, stage: Option<Stage>) -> EnvelopeError {
    match stage {
        Some(stage) => error.with_stage(stage),
        None => error,
    }
}

/// A rendered envelope plus the error that decides the exit code, if any.
pub struct CommandOutcome {
    pub envelope: Envelope<Value>,
    pub failure: Option<CliError>,
}

pub async fn run(cli: &Cli, config: PipelineConfig) -> Result<CommandOutcome, CliError> {
    let started = Instant::now();
    let context = PipelineContext::open(config)?;

    let command_result = match &cli.command {
        Command::Download(args) => {
            let context = context.force_download(args.force);
            stage::run(&context, Stage::Download).await?
        }
        Command::Load => stage::run(&context, Stage::Load).await?,
        Command::Clean => stage::run(&context, Stage::Clean).await?,
        Command::Check => stage::run(&context, Stage::QualityCheck).await?,
        Command::Build => stage::run(&context, Stage::BuildWarehouse).await?,
        Command::Report => stage::run(&context, Stage::Analytics).await?,
        Command::Run(args) => {
            let context = context.force_download(args.force);
            run::run(&context, args.from, args.to).await?
        }
        Command::Status(args) => status::run(&context.warehouse, args)?,
        Command::Sql(args) => sql::run(&context.warehouse, args)?,
    };

    let CommandResult {
        data,
        warnings,
        errors,
        stages,
        run_id,
        failure,
    } = command_result;

    let latency_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
    let mut meta = EnvelopeMeta::new(Uuid::new_v4().to_string(), SCHEMA_VERSION, stages, latency_ms)?;
    if let Some(run_id) = run_id {
        meta = meta.with_run_id(run_id);
    }
    for warning in warnings {
        meta.push_warning(warning);
    }

    let envelope = if errors.is_empty() {
        Envelope::success(meta, data)
    } else {
        Envelope::with_errors(meta, data, errors)?
    };
    Ok(CommandOutcome { envelope, failure })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid arguments")
    }

    fn write_dataset(config: &PipelineConfig, ratings: &str) {
        fs::create_dir_all(&config.raw_dir).expect("raw dir");
        fs::write(
            config.raw_dir.join("movies.csv"),
            "movieId,title,genres\n1,Toy Story (1995),Adventure|Animation\n2,Heat (1995),Action|Crime\n",
        )
        .expect("movies");
        fs::write(config.raw_dir.join("ratings.csv"), ratings).expect("ratings");
    }

    #[tokio::test]
    async fn run_command_builds_reports_from_local_csvs() {
        let temp = tempdir().expect("tempdir");
        let home = temp.path().to_string_lossy().to_string();
        let config = PipelineConfig::with_home(temp.path());
        write_dataset(&config, "userId,movieId,rating,timestamp\n1,1,4.0,10\n2,2,5.0,11\n");

        let cli = parse(&["reelhouse", "run", "--from", "load", "--home", home.as_str()]);
        let outcome = run(&cli, config.clone()).await.expect("command");

        assert!(outcome.failure.is_none());
        assert!(outcome.envelope.errors.is_empty());
        assert_eq!(outcome.envelope.meta.stages.len(), 5);
        assert!(outcome.envelope.meta.run_id.is_some());
        assert!(config.results_dir.join("least_5_genres.csv").is_file());
    }

    #[tokio::test]
    async fn failed_gate_reports_every_check_and_exits_with_three() {
        let temp = tempdir().expect("tempdir");
        let config = PipelineConfig::with_home(temp.path());
        write_dataset(&config, "userId,movieId,rating,timestamp\n1,1,4.0,10\n1,77,3.0,11\n");

        let load = parse(&["reelhouse", "run", "--from", "load", "--to", "clean"]);
        run(&load, config.clone()).await.expect("load and clean");

        let check = parse(&["reelhouse", "check"]);
        let outcome = run(&check, config).await.expect("command");

        let failure = outcome.failure.expect("gate fails");
        assert_eq!(failure.exit_code(), 3);
        assert_eq!(outcome.envelope.errors.len(), 1);
        assert_eq!(outcome.envelope.errors[0].code, "orphan_reference_found");
        assert_eq!(outcome.envelope.errors[0].stage, Some(Stage::QualityCheck));
        assert_eq!(outcome.envelope.data["failures"][0]["count"], 1);
    }

    #[tokio::test]
    async fn status_lists_runs_for_the_warehouse_file() {
        let temp = tempdir().expect("tempdir");
        let config = PipelineConfig::with_home(temp.path());
        write_dataset(&config, "userId,movieId,rating,timestamp\n1,1,4.0,10\n");

        run(&parse(&["reelhouse", "load"]), config.clone()).await.expect("load");
        let outcome = run(&parse(&["reelhouse", "status"]), config.clone())
            .await
            .expect("status");

        let data = &outcome.envelope.data;
        assert_eq!(
            data["warehouse"],
            config.warehouse.db_path.to_string_lossy().as_ref()
        );
        assert_eq!(data["runs"][0]["stage"], "load");
        assert_eq!(data["runs"][0]["status"], "ok");
    }

    #[tokio::test]
    async fn sql_rejects_writes_with_usage_exit_code() {
        let temp = tempdir().expect("tempdir");
        let cli = parse(&["reelhouse", "sql", "DROP TABLE etl_run_log"]);

        let error = run(&cli, PipelineConfig::with_home(temp.path()))
            .await
            .err()
            .expect("write rejected");
        assert_eq!(error.exit_code(), 2);
    }
}
