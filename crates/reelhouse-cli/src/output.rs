use reelhouse_core::Envelope;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render(
    envelope: &Envelope<Value>,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => print!("{}", render_table(envelope)?),
    }

    Ok(())
}

fn render_table(envelope: &Envelope<Value>) -> Result<String, CliError> {
    let mut out = String::new();
    let meta = &envelope.meta;
    out.push_str(&format!("request_id  : {}\n", meta.request_id));
    if let Some(run_id) = &meta.run_id {
        out.push_str(&format!("run_id      : {run_id}\n"));
    }
    out.push_str(&format!("schema      : {}\n", meta.schema_version));
    out.push_str(&format!("generated_at: {}\n", meta.generated_at));
    if !meta.stages.is_empty() {
        let stages: Vec<&str> = meta.stages.iter().map(|stage| stage.as_str()).collect();
        out.push_str(&format!("stages      : {}\n", stages.join(" -> ")));
    }
    out.push_str(&format!("latency_ms  : {}\n", meta.latency_ms));

    if !meta.warnings.is_empty() {
        out.push_str("warnings:\n");
        for warning in &meta.warnings {
            out.push_str(&format!("  - {warning}\n"));
        }
    }

    out.push_str("data:\n");
    match rows_table(&envelope.data) {
        Some(table) => out.push_str(&table),
        None => {
            let pretty_data = serde_json::to_string_pretty(&envelope.data)?;
            for line in pretty_data.lines() {
                out.push_str(&format!("  {line}\n"));
            }
        }
    }

    if !envelope.errors.is_empty() {
        out.push_str("errors:\n");
        for error in &envelope.errors {
            match error.stage {
                Some(stage) => out.push_str(&format!("  - [{stage}] {}: {}\n", error.code, error.message)),
                None => out.push_str(&format!("  - {}: {}\n", error.code, error.message)),
            }
        }
    }

    Ok(out)
}

/// Column-aligned rendering for query results (`columns` + `rows`).
fn rows_table(data: &Value) -> Option<String> {
    let columns: Vec<&str> = data
        .get("columns")?
        .as_array()?
        .iter()
        .filter_map(|column| column.get("name").and_then(Value::as_str))
        .collect();
    let rows: Vec<Vec<String>> = data
        .get("rows")?
        .as_array()?
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(format_cell).collect())
                .unwrap_or_default()
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|name| name.len()).collect();
    for row in &rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        format!("  {}\n", padded.join(" | ").trim_end())
    };

    let mut out = line(columns.clone());
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    out.push_str(&format!("  {}\n", rule.join("-+-")));
    for row in &rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    Some(out)
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::from("null"),
        Value::String(text) => text.clone(),
        _ => value.to_string(),
    }
}
