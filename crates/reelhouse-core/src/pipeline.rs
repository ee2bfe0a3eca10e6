//! In-process pipeline runner.
//!
//! Stages run strictly in order on the calling task. The first failing stage
//! ends the run; every executed stage, passed or failed, is appended to the
//! run log under the run's id.

use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use reelhouse_warehouse::clean::{clean_staging, CleanReport};
use reelhouse_warehouse::quality::run_quality_gate;
use reelhouse_warehouse::reports::{export_reports, ReportExport};
use reelhouse_warehouse::staging::{load_raw_csvs, LoadReport, RawSources};
use reelhouse_warehouse::star::{build_star_schema, BuildReport};
use reelhouse_warehouse::{QualityReport, StageRunRecord, Warehouse};

use crate::config::PipelineConfig;
use crate::download::{DatasetFetcher, FetchReport};
use crate::{PipelineError, Stage};

/// Configuration and store handle shared by every stage of a run.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub warehouse: Warehouse,
    fetcher: DatasetFetcher,
    force_download: bool,
}

impl PipelineContext {
    /// Create the data directories and open the warehouse described by `config`.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        config
            .ensure_dirs()
            .map_err(|error| PipelineError::Store(error.into()))?;
        let warehouse = Warehouse::open(config.warehouse.clone()).map_err(PipelineError::Store)?;
        Ok(Self::with_warehouse(config, warehouse))
    }

    pub fn with_warehouse(config: PipelineConfig, warehouse: Warehouse) -> Self {
        Self {
            config,
            warehouse,
            fetcher: DatasetFetcher::new(),
            force_download: false,
        }
    }

    pub fn with_fetcher(mut self, fetcher: DatasetFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Re-download the archive and overwrite extracted files.
    pub fn force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }
}

/// The result payload of one stage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Download(FetchReport),
    Load(LoadReport),
    Clean(CleanReport),
    QualityCheck(QualityReport),
    BuildWarehouse(BuildReport),
    Analytics { reports: Vec<ReportExport> },
}

/// A stage that completed successfully.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub latency_ms: u64,
    pub output: StageOutput,
}

/// All stages of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub stages: Vec<StageOutcome>,
}

/// A run that stopped early.
#[derive(Debug, Error)]
#[error("pipeline run {run_id} failed: {source}")]
pub struct RunFailure {
    pub run_id: String,
    /// `None` when the run was rejected before any stage started.
    pub stage: Option<Stage>,
    /// Stages that completed before the failure.
    pub completed: Vec<StageOutcome>,
    #[source]
    pub source: PipelineError,
}

/// Executes stages against a [`PipelineContext`] under one run id.
pub struct Pipeline<'a> {
    context: &'a PipelineContext,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(context: &'a PipelineContext) -> Self {
        Self {
            context,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        self.run_id.as_str()
    }

    /// Run exactly one stage.
    pub async fn run_stage(&self, stage: Stage) -> Result<StageOutcome, RunFailure> {
        self.execute_logged(stage).await.map_err(|source| RunFailure {
            run_id: self.run_id.clone(),
            stage: Some(stage),
            completed: Vec::new(),
            source,
        })
    }

    /// Run `from..=to` in order, stopping at the first failure.
    pub async fn run(&self, from: Stage, to: Stage) -> Result<PipelineReport, RunFailure> {
        let stages = Stage::range(from, to).map_err(|error| RunFailure {
            run_id: self.run_id.clone(),
            stage: None,
            completed: Vec::new(),
            source: error.into(),
        })?;

        tracing::info!(run_id = %self.run_id, %from, %to, "pipeline run started");
        let mut completed = Vec::with_capacity(stages.len());
        for stage in stages {
            match self.execute_logged(stage).await {
                Ok(outcome) => completed.push(outcome),
                Err(source) => {
                    return Err(RunFailure {
                        run_id: self.run_id.clone(),
                        stage: Some(stage),
                        completed,
                        source,
                    });
                }
            }
        }

        tracing::info!(run_id = %self.run_id, stages = completed.len(), "pipeline run finished");
        Ok(PipelineReport {
            run_id: self.run_id.clone(),
            stages: completed,
        })
    }

    async fn execute_logged(&self, stage: Stage) -> Result<StageOutcome, PipelineError> {
        let span = tracing::info_span!("stage", stage = %stage, run_id = %self.run_id);
        async {
            tracing::info!("stage started");
            let started = Instant::now();
            let result = self.execute(stage).await;
            let latency_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;

            let (status, detail) = match &result {
                Ok(output) => {
                    tracing::info!(latency_ms, "stage finished");
                    ("ok", serde_json::to_string(output).ok())
                }
                Err(error) => {
                    tracing::error!(latency_ms, code = error.code(), %error, "stage failed");
                    ("failed", Some(failure_detail(error).to_string()))
                }
            };
            self.record(stage, status, detail, latency_ms);

            result.map(|output| StageOutcome {
                stage,
                latency_ms,
                output,
            })
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, stage: Stage) -> Result<StageOutput, PipelineError> {
        let context = self.context;
        let warehouse = &context.warehouse;
        match stage {
            Stage::Download => {
                let report = context
                    .fetcher
                    .fetch(
                        &context.config.dataset,
                        &context.config.raw_dir,
                        context.force_download,
                    )
                    .await?;
                Ok(StageOutput::Download(report))
            }
            Stage::Load => {
                let sources = RawSources::in_dir(&context.config.raw_dir);
                load_raw_csvs(warehouse, &sources)
                    .map(StageOutput::Load)
                    .map_err(PipelineError::Ingest)
            }
            Stage::Clean => clean_staging(warehouse)
                .map(StageOutput::Clean)
                .map_err(PipelineError::Transform),
            Stage::QualityCheck => {
                let report = run_quality_gate(warehouse).map_err(PipelineError::Store)?;
                if let Err(first) = report.ensure_passed() {
                    return Err(PipelineError::Validation {
                        first,
                        failures: report.failures,
                    });
                }
                Ok(StageOutput::QualityCheck(report))
            }
            Stage::BuildWarehouse => build_star_schema(warehouse)
                .map(StageOutput::BuildWarehouse)
                .map_err(PipelineError::Build),
            Stage::Analytics => export_reports(warehouse, &context.config.results_dir)
                .map(|reports| StageOutput::Analytics { reports })
                .map_err(PipelineError::Report),
        }
    }

    fn record(&self, stage: Stage, status: &str, detail: Option<String>, latency_ms: u64) {
        let record = StageRunRecord::new(
            self.run_id.as_str(),
            stage.as_str(),
            status,
            detail,
            i64::try_from(latency_ms).unwrap_or(i64::MAX),
        );
        if let Err(error) = self.context.warehouse.record_stage(&record) {
            tracing::warn!(%error, "failed to write run log entry");
        }
    }
}

fn failure_detail(error: &PipelineError) -> serde_json::Value {
    let mut detail = json!({
        "code": error.code(),
        "message": error.to_string(),
    });
    if let PipelineError::Validation { failures, .. } = error {
        detail["failures"] = json!(failures);
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhouse_warehouse::{RawMovie, RawRating, ValidationError};
    use tempfile::tempdir;

    fn seeded_context(home: &std::path::Path, ratings: &[RawRating]) -> PipelineContext {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        warehouse.ensure_raw_tables().expect("raw tables");
        warehouse
            .ingest_raw_movies(&[RawMovie::new(1, "A", "Comedy|Drama"), RawMovie::new(2, "B", "Drama")])
            .expect("movies");
        warehouse.ingest_raw_ratings(ratings).expect("ratings");
        PipelineContext::with_warehouse(PipelineConfig::with_home(home), warehouse)
    }

    #[tokio::test]
    async fn runs_sql_stages_in_order() {
        let temp = tempdir().expect("tempdir");
        let context = seeded_context(
            temp.path(),
            &[RawRating::new(1, 1, 4.0, 10), RawRating::new(2, 2, 3.0, 11)],
        );
        let pipeline = Pipeline::new(&context);

        let report = pipeline
            .run(Stage::Clean, Stage::Analytics)
            .await
            .expect("run");
        let stages: Vec<Stage> = report.stages.iter().map(|outcome| outcome.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Clean, Stage::QualityCheck, Stage::BuildWarehouse, Stage::Analytics]
        );
        assert!(context.config.results_dir.join("top_10_movies.csv").is_file());

        let runs = context.warehouse.recent_stage_runs(10).expect("runs");
        assert_eq!(runs.len(), 4);
        assert!(runs.iter().all(|run| run.run_id == pipeline.run_id() && run.status == "ok"));
    }

    #[tokio::test]
    async fn orphaned_rating_halts_before_build() {
        let temp = tempdir().expect("tempdir");
        let context = seeded_context(temp.path(), &[RawRating::new(1, 99, 4.0, 10)]);
        let pipeline = Pipeline::new(&context);

        let failure = pipeline
            .run(Stage::Clean, Stage::Analytics)
            .await
            .expect_err("gate must fail");
        assert_eq!(failure.stage, Some(Stage::QualityCheck));
        assert_eq!(failure.completed.len(), 1);
        assert!(matches!(
            failure.source,
            PipelineError::Validation {
                first: ValidationError::OrphanReferenceFound { count: 1 },
                ..
            }
        ));
        assert!(!context.warehouse.relation_exists("fact_ratings").expect("exists"));

        let runs = context.warehouse.recent_stage_runs(10).expect("runs");
        let logged: Vec<(&str, &str)> = runs
            .iter()
            .map(|run| (run.stage.as_str(), run.status.as_str()))
            .collect();
        assert_eq!(logged, vec![("quality_check", "failed"), ("clean", "ok")]);
        let detail: serde_json::Value =
            serde_json::from_str(runs[0].detail.as_deref().expect("detail")).expect("json");
        assert_eq!(detail["code"], "validation_error");
        assert_eq!(detail["failures"][0]["check"], "orphan_reference_found");
    }

    #[tokio::test]
    async fn single_stage_requires_its_inputs() {
        let temp = tempdir().expect("tempdir");
        let context = PipelineContext::with_warehouse(
            PipelineConfig::with_home(temp.path()),
            Warehouse::open_in_memory().expect("warehouse"),
        );

        let failure = Pipeline::new(&context)
            .run_stage(Stage::BuildWarehouse)
            .await
            .expect_err("nothing to build from");
        assert!(matches!(failure.source, PipelineError::Build(_)));
    }

    #[tokio::test]
    async fn reversed_range_runs_nothing() {
        let temp = tempdir().expect("tempdir");
        let context = seeded_context(temp.path(), &[]);

        let failure = Pipeline::new(&context)
            .run(Stage::Analytics, Stage::Clean)
            .await
            .expect_err("reversed");
        assert_eq!(failure.stage, None);
        assert!(matches!(failure.source, PipelineError::Contract(_)));
        assert!(context.warehouse.recent_stage_runs(10).expect("runs").is_empty());
    }

    #[tokio::test]
    async fn load_reports_missing_csv_as_ingest_failure() {
        let temp = tempdir().expect("tempdir");
        let context = seeded_context(temp.path(), &[]);

        let failure = Pipeline::new(&context)
            .run_stage(Stage::Load)
            .await
            .expect_err("no csv files");
        assert!(matches!(failure.source, PipelineError::Ingest(_)));
    }
}
