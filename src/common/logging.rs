//! Logging and tracing configuration
//!
//! The adapter's stdout carries the DAP stream, so nothing may ever be
//! logged there. Logs go to a file under the data directory, or to stderr.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Keeps the non-blocking log writer alive; flushes on drop
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
    /// Log file in use, if any
    pub path: Option<PathBuf>,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pdb_dap=debug,info"))
}

/// Initialize tracing for the adapter process
///
/// Logs to `<data_dir>/logs/adapter.log` through a non-blocking writer.
/// Falls back to stderr when `to_stderr` is set or no log directory exists.
pub fn init(to_stderr: bool) -> LogGuard {
    if !to_stderr {
        if let Some(log_dir) = paths::log_dir() {
            if std::fs::create_dir_all(&log_dir).is_ok() {
                let appender = tracing_appender::rolling::never(&log_dir, "adapter.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(filter())
                    .with(
                        fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false)
                            .with_target(true)
                            .with_file(true)
                            .with_line_number(true),
                    )
                    .init();

                return LogGuard {
                    _guard: Some(guard),
                    path: Some(log_dir.join("adapter.log")),
                };
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true)
                .compact(),
        )
        .init();

    LogGuard {
        _guard: None,
        path: None,
    }
}
