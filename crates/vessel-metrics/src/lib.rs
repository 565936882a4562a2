//! ---
//! vsl_section: "03-logging-metrics"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Metrics collection and export utilities."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the server process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "vesseld_starts_total",
            "Total number of times the release server has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "vesseld_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "vesseld_build_info",
                "Build metadata for the running server binary",
            ),
            &["version", "target", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, target: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, target, profile])
            .set(1.0);
    }
}

/// Counters for the build pipeline.
#[derive(Clone, Debug)]
pub struct BuildMetrics {
    started: IntCounter,
    succeeded: IntCounter,
    failures: IntCounterVec,
    duration_seconds: Histogram,
}

impl BuildMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let started = IntCounter::with_opts(Opts::new(
            "vessel_builds_started_total",
            "Build pipeline runs started",
        ))?;
        registry.register(Box::new(started.clone()))?;

        let succeeded = IntCounter::with_opts(Opts::new(
            "vessel_builds_succeeded_total",
            "Build pipeline runs that registered a release",
        ))?;
        registry.register(Box::new(succeeded.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "vessel_build_failures_total",
                "Build pipeline runs aborted, by failing stage",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.5, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "vessel_build_duration_seconds",
                "Wall-clock duration of successful build pipeline runs",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            started,
            succeeded,
            failures,
            duration_seconds,
        })
    }

    pub fn record_start(&self) {
        self.started.inc();
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.succeeded.inc();
        self.duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(&self, stage: &str) {
        self.failures.with_label_values(&[stage]).inc();
    }

    pub fn failures(&self, stage: &str) -> u64 {
        self.failures.with_label_values(&[stage]).get()
    }
}

/// Counters for the client-facing distribution endpoints.
#[derive(Clone, Debug)]
pub struct DistributionMetrics {
    version_checks: IntCounterVec,
    archive_downloads: IntCounterVec,
}

impl DistributionMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let version_checks = IntCounterVec::new(
            Opts::new(
                "vessel_version_checks_total",
                "Latest-version lookups served, by product and outcome",
            ),
            &["product", "outcome"],
        )?;
        registry.register(Box::new(version_checks.clone()))?;

        let archive_downloads = IntCounterVec::new(
            Opts::new(
                "vessel_archive_downloads_total",
                "Distribution archives served, by product and platform",
            ),
            &["product", "os"],
        )?;
        registry.register(Box::new(archive_downloads.clone()))?;

        Ok(Self {
            version_checks,
            archive_downloads,
        })
    }

    pub fn record_version_check(&self, product: &str, outcome: &str) {
        self.version_checks
            .with_label_values(&[product, outcome])
            .inc();
    }

    pub fn record_download(&self, product: &str, os: &str) {
        self.archive_downloads
            .with_label_values(&[product, os])
            .inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_metrics_count_failures_per_stage() {
        let registry = new_registry();
        let metrics = BuildMetrics::new(&registry).unwrap();
        metrics.record_start();
        metrics.record_failure("bundle");
        metrics.record_failure("bundle");
        assert_eq!(metrics.failures("bundle"), 2);
        assert_eq!(metrics.failures("archive"), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        BuildMetrics::new(&registry).unwrap();
        assert!(BuildMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registered_families() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("vesseld_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
