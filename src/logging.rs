//! Log output for the `nemawashi` process.
//!
//! The daemon writes JSON lines to a daily-rotated file beside a compact
//! stderr stream; one-shot subcommands (`watchdog`, `migrate`) get stderr
//! only. Filter directives come from `NEMAWASHI_LOG`, falling back to
//! `RUST_LOG`, and default to `info` with sqlx statement noise capped at
//! `warn` so audit-relevant coordinator lines stay readable.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name stem for the rotated daemon log (`nemawashi.log.YYYY-MM-DD`).
const LOG_FILE_STEM: &str = "nemawashi.log";

/// Directives used when neither `NEMAWASHI_LOG` nor `RUST_LOG` is set.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// How much output the invoking subcommand wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Long-running `serve` daemon: rotated JSON file plus stderr.
    Daemon,
    /// One-shot subcommand: stderr only, no file.
    OneShot,
}

/// Keeps the non-blocking file writer alive for the daemon.
///
/// Dropping the guard flushes pending entries and closes the current log
/// file; one-shot modes carry no file writer.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    let directives = std::env::var("NEMAWASHI_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_owned());
    // A broken override falls back to the defaults rather than silencing
    // the process.
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialise logging for the given mode.
///
/// `logs_dir` is only touched in [`LogMode::Daemon`].
///
/// # Errors
///
/// Returns an error when the daemon logs directory cannot be created.
pub fn init(mode: LogMode, logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    match mode {
        LogMode::OneShot => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .init();
            Ok(LoggingGuard { _file: None })
        }
        LogMode::Daemon => {
            std::fs::create_dir_all(logs_dir).map_err(|e| {
                anyhow::anyhow!(
                    "failed to create logs directory {}: {e}",
                    logs_dir.display()
                )
            })?;
            let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_STEM);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer().json().with_writer(writer);
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(file_layer)
                .with(console_layer)
                .init();
            Ok(LoggingGuard { _file: Some(guard) })
        }
    }
}
