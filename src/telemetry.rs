use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Where the full-screen dashboard logs when no `--log-file` is given.
pub const DEFAULT_TUI_LOG_FILE: &str = "bookwatch.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    /// An explicit file always wins. A full-screen front end never gets stderr,
    /// since anything written there lands on top of the drawn frame.
    pub fn choose(log_file: Option<&Path>, fullscreen: bool) -> Self {
        match (log_file, fullscreen) {
            (Some(path), _) => LogTarget::File(path.to_path_buf()),
            (None, true) => LogTarget::File(PathBuf::from(DEFAULT_TUI_LOG_FILE)),
            (None, false) => LogTarget::Stderr,
        }
    }
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Compact logs on stderr. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Logs appended to a file, for the TUI where stderr would tear the screen.
pub fn init_tracing_to_file(default_filter: &str, path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .compact()
        .init();
    Ok(())
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!(port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("bookwatch_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_never_logs_to_stderr() {
        assert_eq!(LogTarget::choose(None, true), LogTarget::File(PathBuf::from(DEFAULT_TUI_LOG_FILE)));
        assert_eq!(LogTarget::choose(None, false), LogTarget::Stderr);
    }

    #[test]
    fn test_explicit_log_file_wins() {
        let path = Path::new("/tmp/bw.log");
        assert_eq!(LogTarget::choose(Some(path), true), LogTarget::File(path.to_path_buf()));
        assert_eq!(LogTarget::choose(Some(path), false), LogTarget::File(path.to_path_buf()));
    }
}
