use reelhouse_core::{Pipeline, PipelineContext, Stage};

use crate::error::CliError;

use super::CommandResult;

pub async fn run(context: &PipelineContext, from: Stage, to: Stage) -> Result<CommandResult, CliError> {
    let pipeline = Pipeline::new(context);
    match pipeline.run(from, to).await {
        Ok(report) => {
            let stages = report.stages.iter().map(|outcome| outcome.stage).collect();
            Ok(CommandResult::ok(serde_json::to_value(&report)?, stages).with_run_id(report.run_id))
        }
        Err(failure) => CommandResult::from_failure(failure),
    }
}
