use reelhouse_core::{QueryGuardrails, Warehouse};

use crate::cli::SqlArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(warehouse: &Warehouse, args: &SqlArgs) -> Result<CommandResult, CliError> {
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };

    let result = warehouse.execute_query(args.query.as_str(), guardrails)?;
    let truncated = result.truncated;
    let row_count = result.row_count;

    let mut command_result = CommandResult::ok(serde_json::to_value(&result)?, Vec::new());
    if truncated {
        command_result = command_result.with_warning(format!(
            "result truncated at {row_count} rows (use --max-rows to increase limit)"
        ));
    }

    Ok(command_result)
}
