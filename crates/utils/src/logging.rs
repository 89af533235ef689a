//! provides logging helpers

use std::env;
use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable holding an optional log file path.
pub const LOG_PATH_ENV_VAR: &str = "QE_LOG_PATH";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Splits a log file path into the directory and the file name prefix used by
/// the rolling appender.
fn split_log_path(log_path: &Path) -> Option<(PathBuf, String)> {
    let file = log_path.file_name()?.to_str()?.to_string();
    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, file))
}

fn file_appender(log_path: &Path) -> Option<RollingFileAppender> {
    let (dir, prefix) = split_log_path(log_path)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
        .ok()
}

/// initiate the global tracing subscriber
///
/// Always logs to stderr. When [`LOG_PATH_ENV_VAR`] is set, events are also
/// written to a daily-rotated file; keep the returned guard alive until exit
/// so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let log_path = env::var(LOG_PATH_ENV_VAR).ok().map(PathBuf::from);
    let appender = log_path.as_deref().and_then(file_appender);

    match appender {
        Some(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            registry().with(stderr_layer).init();
            if let Some(path) = log_path {
                tracing::warn!("cannot open log file {}, logging to stderr only", path.display());
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn split_path_with_directory() {
        let (dir, prefix) = split_log_path(Path::new("/var/log/qe/runner.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/qe"));
        assert_eq!(prefix, "runner.log");
    }

    #[test]
    fn split_bare_file_name_uses_current_dir() {
        let (dir, prefix) = split_log_path(Path::new("runner.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(prefix, "runner.log");
    }

    #[test]
    fn appender_is_created_in_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(file_appender(&dir.path().join("runner.log")).is_some());
    }
}
