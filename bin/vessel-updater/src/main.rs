//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "binary"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Binary entrypoint for the standalone updater."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use vessel_common::{init_tracing, LogFormat, LoggingConfig, ServerEndpoints};
use vessel_update::{
    host_platform, HttpFetcher, UpdateReport, UpdateRequest, Updater, UpdaterError, WaitPolicy,
};
use vessel_versioning::VersionInfo;

#[derive(Debug, Parser)]
#[command(
    author,
    version = env!("CARGO_PKG_VERSION"),
    about = "Replace an installed application with its latest release",
    long_about = None
)]
struct Cli {
    /// Release server base URL.
    #[arg(short = 's', long, value_name = "URL", value_parser = parse_server)]
    server: ServerEndpoints,

    /// Product identifier to download.
    #[arg(short = 'p', long, value_name = "ID")]
    product: String,

    /// Process that must exit before the installation is touched.
    #[arg(short = 'P', long, value_name = "PID")]
    pid: u32,

    /// Installation directory to replace.
    #[arg(short = 'd', long, value_name = "DIR")]
    directory: PathBuf,

    /// Entry point relative to the installation, started after the update.
    #[arg(long, value_name = "PATH")]
    launch: Option<String>,

    /// Seconds to wait for the parent process before giving up.
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    wait_timeout: u64,

    /// Log directory. Defaults to the updater's own directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Download directory. Defaults to the working directory.
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,
}

fn parse_server(raw: &str) -> Result<ServerEndpoints, String> {
    ServerEndpoints::parse(raw).map_err(|err| err.to_string())
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        directory: cli
            .log_dir
            .clone()
            .or_else(executable_dir)
            .unwrap_or_else(|| PathBuf::from(".")),
        format: LogFormat::Json,
        file_prefix: Some("vessel-updater".to_owned()),
    };
    if let Err(err) = init_tracing("vessel-updater", &logging) {
        eprintln!("failed to initialise logging: {err:#}");
    }
    info!(
        version = %VersionInfo::current().cli_string(),
        product = %cli.product,
        pid = cli.pid,
        directory = %cli.directory.display(),
        "updater started"
    );

    match run(cli).await {
        Ok(report) => {
            info!(
                probes = report.probes,
                entries = report.replaced.entries,
                relaunched = ?report.relaunched,
                "update finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = err.exit_code();
            error!(error = %err, exit_code = code, "update failed");
            eprintln!("vessel-updater: {err}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<UpdateReport, UpdaterError> {
    let platform = host_platform()?;
    let scratch_dir = cli
        .scratch_dir
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let request = UpdateRequest {
        product: cli.product,
        pid: cli.pid,
        directory: cli.directory,
        launch: cli.launch,
        platform,
        scratch_dir,
        wait: WaitPolicy::default().with_timeout(Duration::from_secs(cli.wait_timeout)),
    };
    let fetcher = HttpFetcher::new(cli.server)?;
    Updater::new(request, Arc::new(fetcher)).run().await
}
