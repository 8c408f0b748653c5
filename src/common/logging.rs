//! Logging and tracing configuration
//!
//! Every component logs through `tracing`; the subscriber installed here is
//! the only sink, so tests can run components without any global setup.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;
use crate::settings::SettingsScope;

/// File name used when tracing is enabled without a `TraceFilePath`
pub const TRACE_FILE_NAME: &str = "jsharness.trace.log";

/// Trace file requested by a settings scope through `EnableTracing`
///
/// `TraceFilePath` wins when set; otherwise the trace goes to the user log
/// directory.
pub fn trace_file_for(scope: &SettingsScope) -> Option<PathBuf> {
    if scope.enable_tracing != Some(true) {
        return None;
    }
    scope
        .trace_file_path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| paths::log_dir().map(|dir| dir.join(TRACE_FILE_NAME)))
}

/// Non-blocking writer appending to `path`, creating its directory
pub fn trace_writer(path: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    let (writer, guard) = match trace_writer(path) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Warning: Could not open trace file '{}': {}", path.display(), e);
            tracing_subscriber::registry().with(stderr_layer).init();
            return None;
        }
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(EnvFilter::new("jsharness=trace,info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_trace_file_for_scope() {
        let disabled = SettingsScope {
            trace_file_path: Some("/tmp/t.log".into()),
            ..Default::default()
        };
        assert_eq!(trace_file_for(&disabled), None);

        let explicit = SettingsScope {
            enable_tracing: Some(true),
            trace_file_path: Some("/tmp/t.log".into()),
            ..Default::default()
        };
        assert_eq!(trace_file_for(&explicit), Some(PathBuf::from("/tmp/t.log")));

        let fallback = SettingsScope {
            enable_tracing: Some(true),
            ..Default::default()
        };
        assert_eq!(
            trace_file_for(&fallback),
            paths::log_dir().map(|dir| dir.join(TRACE_FILE_NAME))
        );
    }

    #[test]
    fn test_trace_writer_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs/nested/trace.log");

        let (writer, guard) = trace_writer(&path).unwrap();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(unit = 3, "harness written");
        });
        drop(guard);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("harness written"));
        assert!(text.contains("unit=3"));
    }
}
