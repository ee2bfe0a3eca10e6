//! CLI argument definitions for reelhouse.
//!
//! Every pipeline stage is its own subcommand so an external scheduler can run
//! stages as separate processes and react to their exit status.
//!
//! # Commands
//!
//! | Command | Stage | Description |
//! |---------|-------|-------------|
//! | `download` | `download` | Fetch and extract the MovieLens archive |
//! | `load` | `load` | Load the raw CSVs into staging tables |
//! | `clean` | `clean` | Filter and deduplicate staging tables |
//! | `check` | `quality_check` | Run the data quality gate |
//! | `build` | `build_warehouse` | Build the star schema |
//! | `report` | `analytics` | Export the analytics CSV reports |
//! | `run` | any range | Run several stages in order |
//! | `status` | | Show recent run log entries |
//! | `sql` | | Read-only query against the warehouse |
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0` | Success |
//! | `2` | Invalid arguments or contract violation |
//! | `3` | Quality gate failed |
//! | `4` | Output serialization failed |
//! | `6` | Load, clean, build or report stage failed |
//! | `7` | Download failed |
//! | `10` | Store or I/O failure |

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reelhouse_core::Stage;

/// Batch ETL for the MovieLens ratings dataset.
#[derive(Debug, Parser)]
#[command(
    name = "reelhouse",
    author,
    version,
    about = "MovieLens ratings ETL into a DuckDB star schema",
    long_about = "reelhouse downloads the MovieLens dataset, loads and cleans it, \
validates it through a quality gate, builds a star-schema warehouse in DuckDB \
and exports fixed analytics reports as CSV.\n\
\n\
Use 'reelhouse <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Data directory. Defaults to REELHOUSE_HOME or ~/.reelhouse.
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors to stderr.
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Table,
    /// Single JSON envelope.
    Json,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download the dataset archive and extract movies.csv and ratings.csv.
    ///
    /// An existing archive or extracted file is reused unless --force is given.
    Download(DownloadArgs),

    /// Load the raw CSV files into stg_movies and stg_ratings.
    Load,

    /// Build stg_movies_clean and stg_ratings_clean from the raw tables.
    Clean,

    /// Run the quality gate over the raw and cleaned tables.
    ///
    /// Exits with code 3 when any check fails.
    Check,

    /// Build the dimension, bridge and fact tables.
    Build,

    /// Export the four analytics reports to <home>/data/results.
    Report,

    /// Run a range of stages in order, stopping at the first failure.
    ///
    /// # Examples
    ///
    ///   reelhouse run
    ///   reelhouse run --from clean --to build_warehouse
    Run(RunArgs),

    /// Show the most recent run log entries.
    Status(StatusArgs),

    /// Run a read-only SQL query against the warehouse.
    ///
    /// # Security
    ///
    /// Only single SELECT-like statements are accepted. All queries run with
    /// row and time limits.
    ///
    /// # Examples
    ///
    ///   reelhouse sql "SELECT * FROM vw_genre_ratings ORDER BY rating_count DESC"
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Download and extract again even if files already exist.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// First stage to run.
    #[arg(long, default_value = "download", value_parser = parse_stage)]
    pub from: Stage,

    /// Last stage to run.
    #[arg(long, default_value = "analytics", value_parser = parse_stage)]
    pub to: Stage,

    /// Download and extract again even if files already exist.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Number of entries to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute.
    pub query: String,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

fn parse_stage(value: &str) -> Result<Stage, String> {
    value.parse::<Stage>().map_err(|error| error.to_string())
}
