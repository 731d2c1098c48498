//! Log setup
//!
//! Logs go to one file per day under `$XDG_STATE_HOME/healthlog/`
//! (`healthlog.2024-06-01.log`), pruned past `logging.max_files`. Nothing is
//! written to the terminal; stdout and stderr belong to command output and
//! spinners.
//!
//! `RUST_LOG` replaces the configured filter entirely. Otherwise the HTTP
//! stack is held at `warn` so connection chatter does not bury sync and AI
//! events at `debug`.

use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

const FILE_PREFIX: &str = "healthlog";
const FILE_SUFFIX: &str = "log";

/// Targets that only matter when something is already wrong.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// Keeps the background writer alive. Pending lines are flushed on drop, so
/// hold it until the command has finished.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Install the file subscriber for this process.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(&config.level)?)
            .map_err(|e| Error::Config(format!("invalid log filter: {}", e)))?,
    };

    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix(FILE_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to open log file in {}: {}", log_dir.display(), e)))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _worker: worker })
}

/// Filter directives for a configured level name.
pub fn directives(level: &str) -> Result<String> {
    let level = Level::from_str(level.trim()).map_err(|_| {
        Error::Config(format!(
            "unknown log level {:?} (expected trace, debug, info, warn or error)",
            level
        ))
    })?;

    let mut filter = level.to_string().to_ascii_lowercase();
    if level > Level::WARN {
        for target in QUIET_TARGETS {
            filter.push_str(&format!(",{}=warn", target));
        }
    }
    Ok(filter)
}

/// Log to the test harness's captured output. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
