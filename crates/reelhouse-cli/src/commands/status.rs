use reelhouse_core::Warehouse;
use serde_json::json;

use crate::cli::StatusArgs;
use crate::error::CliError;

use super::CommandResult;

/// Recent run log entries, newest first, with the stage detail decoded.
pub fn run(warehouse: &Warehouse, args: &StatusArgs) -> Result<CommandResult, CliError> {
    let records = warehouse.recent_stage_runs(args.limit)?;
    let runs: Vec<_> = records
        .into_iter()
        .map(|record| {
            let detail = record
                .detail
                .as_deref()
                .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok());
            json!({
                "run_id": record.run_id,
                "stage": record.stage,
                "status": record.status,
                "latency_ms": record.latency_ms,
                "recorded_at": record.recorded_at,
                "detail": detail,
            })
        })
        .collect();

    let result = CommandResult::ok(
        json!({ "warehouse": warehouse.db_path(), "runs": runs }),
        Vec::new(),
    );
    if runs.is_empty() {
        return Ok(result.with_warning("run log is empty; no stage has run against this warehouse"));
    }
    Ok(result)
}
