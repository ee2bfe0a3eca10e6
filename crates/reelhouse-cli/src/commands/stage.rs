use reelhouse_core::{Pipeline, PipelineContext, Stage};

use crate::error::CliError;

use super::CommandResult;

/// Run a single stage under a fresh run id.
pub async fn run(context: &PipelineContext, stage: Stage) -> Result<CommandResult, CliError> {
    let pipeline = Pipeline::new(context);
    match pipeline.run_stage(stage).await {
        Ok(outcome) => Ok(CommandResult::ok(serde_json::to_value(&outcome)?, vec![stage])
            .with_run_id(pipeline.run_id())),
        Err(failure) => CommandResult::from_failure(failure),
    }
}
