//! ---
//! vsl_section: "03-logging-metrics"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Shared primitives and utilities for Vessel services."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Tracing setup for the long-running processes (`vesseld`, `vessel-updater`).
//!
//! Events go to stdout in the configured format and, always as JSON, to a
//! daily file under the configured log directory.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const FILTER_ENV: &str = "VESSEL_LOG";
const FALLBACK_FILTER_ENV: &str = "RUST_LOG";
const DEFAULT_FILTER: &str = "info";

/// Writer guards; dropping them would lose buffered lines.
struct Sinks {
    _console: WorkerGuard,
    _file: WorkerGuard,
}

static SINKS: OnceCell<Sinks> = OnceCell::new();

/// Stdout format. The log file is JSON regardless.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human readable lines with targets.
    Text,
}

/// Install the global subscriber for `service_name`.
///
/// The filter is read from `VESSEL_LOG`, then `RUST_LOG`, then defaults to
/// `info`. The log file is `<directory>/<file_prefix or service_name>.log`
/// with a date suffix. A second call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("create log directory {}", config.directory.display())
    })?;
    let file_name = format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    );
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(rolling::daily(&config.directory, &file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = event_filter(
        std::env::var(FILTER_ENV).ok().as_deref(),
        std::env::var(FALLBACK_FILTER_ENV).ok().as_deref(),
    );
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(config.format, console_writer))
        .with(
            fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file_writer),
        )
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = SINKS.set(Sinks {
        _console: console_guard,
        _file: file_guard,
    });

    info!(
        service = service_name,
        directory = %config.directory.display(),
        file = %file_name,
        format = ?config.format,
        "logging ready"
    );
    Ok(())
}

fn console_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
    }
}

/// `vessel_log` wins over `rust_log`. A malformed `vessel_log` is reported
/// and replaced by the default rather than falling through to `rust_log`.
fn event_filter(vessel_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    match (vessel_log, rust_log) {
        (Some(directive), _) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("ignoring {FILTER_ENV}={directive:?} ({err}); logging at {DEFAULT_FILTER}");
            EnvFilter::new(DEFAULT_FILTER)
        }),
        (None, Some(directive)) => {
            EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        (None, None) => EnvFilter::new(DEFAULT_FILTER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Text,
            file_prefix: Some("vesseld-test".into()),
        };
        init_tracing("vesseld", &config).unwrap();
        init_tracing("vesseld", &config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn vessel_log_takes_precedence() {
        let filter = event_filter(Some("debug,vessel_build=trace"), Some("warn"));
        let rendered = filter.to_string();
        assert!(rendered.contains("vessel_build=trace"), "{rendered}");
        assert!(!rendered.contains("warn"), "{rendered}");

        let rendered = event_filter(None, Some("warn")).to_string();
        assert!(rendered.contains("warn"), "{rendered}");

        let rendered = event_filter(None, None).to_string();
        assert!(rendered.contains(DEFAULT_FILTER), "{rendered}");
    }

    #[test]
    fn format_names_are_lowercase() {
        let format: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(format, LogFormat::Text);
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
    }
}
