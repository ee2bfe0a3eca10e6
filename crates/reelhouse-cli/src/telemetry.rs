use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "reelhouse.log";

/// Human-readable logs on stderr plus JSON logs in `<log_dir>/reelhouse.log`.
///
/// `RUST_LOG` overrides the stderr level unless `-v` or `--quiet` is given.
/// The returned guard flushes the file writer when dropped. Without a usable
/// log directory only the stderr layer is installed.
pub fn init(log_dir: &Path, verbose: u8, quiet: bool) -> Option<WorkerGuard> {
    let stderr_filter = match (verbose, quiet) {
        (0, true) => EnvFilter::new("error"),
        (0, false) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        (1, _) => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    if fs::create_dir_all(log_dir).is_err() {
        let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        return None;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();
    Some(guard)
}
