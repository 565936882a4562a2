//! ---
//! vsl_section: "01-core-functionality"
//! vsl_subsection: "binary"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Binary entrypoint for the Vessel release server."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tracing::info;
use vessel_api::{spawn_api_server, ApiState};
use vessel_build::{BuildPipeline, ExternalToolchain};
use vessel_catalog::Catalog;
use vessel_common::{init_tracing, ServerConfig, ServerEndpoints};
use vessel_metrics::{
    new_registry, spawn_http_server, BuildMetrics, DaemonMetrics, DistributionMetrics,
    SharedRegistry,
};
use vessel_versioning::VersionInfo;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Vessel release server",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the catalog, build pipeline and API")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/vesseld.toml"));
    candidates.push(PathBuf::from("configs/vesseld.example.toml"));

    let load_started = Instant::now();
    let loaded = ServerConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("configuration {} is valid", loaded.source.display());
            Ok(())
        }
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(&version.semver, &version.target_os, &version.profile);

            init_tracing("vesseld", &loaded.config.logging)?;
            info!(
                config = %loaded.source.display(),
                version = %version.cli_string(),
                "configuration loaded"
            );
            run_server(loaded.config, registry).await
        }
    }
}

async fn run_server(config: ServerConfig, registry: SharedRegistry) -> Result<()> {
    config.storage.ensure_dirs()?;
    let catalog = Arc::new(
        Catalog::open(&config.storage.database, config.storage.busy_timeout).with_context(
            || {
                format!(
                    "failed to open catalog {}",
                    config.storage.database.display()
                )
            },
        )?,
    );

    let toolchain = Arc::new(ExternalToolchain::from_config(&config.build));
    let pipeline = BuildPipeline::new(
        catalog,
        toolchain,
        config.build.clone(),
        (&config.storage).into(),
    )
    .context("failed to prepare build pipeline")?
    .with_metrics(BuildMetrics::new(&registry)?);

    let public_url = config
        .api
        .public_url
        .clone()
        .map(ServerEndpoints::new)
        .transpose()?;
    let state = ApiState::new(Arc::new(pipeline), &config.storage, config.updater.clone())
        .with_public_url(public_url)
        .with_metrics(DistributionMetrics::new(&registry)?)
        .with_upload_limit(config.api.max_upload_bytes);

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let api_server = spawn_api_server(Arc::new(state), config.api.listen)?;
    info!(address = %api_server.addr(), "release server running; waiting for termination signal");

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    api_server.shutdown().await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
