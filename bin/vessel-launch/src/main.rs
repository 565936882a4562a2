//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "binary"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Binary entrypoint for the capsule launcher."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;
use vessel_capsule::{
    CapsuleConfig, Result as CapsuleResult, StartupCheck, StartupOutcome, CAPSULE_FILE,
};
use vessel_common::ServerEndpoints;
use vessel_logging as logging;

/// Exit status telling the preamble that an updater took over.
const UPDATE_STARTED: u8 = 75;

#[derive(Debug, Parser)]
#[command(
    author,
    version = env!("CARGO_PKG_VERSION"),
    about = "Check for a newer release before the application starts",
    long_about = None
)]
struct Cli {
    /// Capsule record. Defaults to the one next to this binary.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Application process the updater waits for.
    #[arg(long, value_name = "PID")]
    pid: Option<u32>,

    /// Overrides the record's server URL.
    #[arg(long, env = "VESSEL_SERVER", value_name = "URL", hide_env_values = true)]
    server: Option<String>,

    /// Overrides the record's product identifier.
    #[arg(long, env = "VESSEL_PRODUCT", value_name = "ID")]
    product: Option<String>,

    /// Overrides the record's version.
    #[arg(long = "app-version", env = "VESSEL_VERSION", value_name = "VERSION")]
    app_version: Option<String>,
}

impl Cli {
    fn record_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(CAPSULE_FILE)))
                .unwrap_or_else(|| PathBuf::from(CAPSULE_FILE))
        })
    }

    fn apply_overrides(&self, config: &mut CapsuleConfig) {
        if let Some(server) = self.server.as_deref().filter(|s| !s.is_empty()) {
            match ServerEndpoints::parse(server) {
                Ok(endpoints) => config.server = endpoints,
                Err(err) => warn!(error = %err, "ignoring VESSEL_SERVER override"),
            }
        }
        if let Some(product) = self.product.as_deref().filter(|s| !s.is_empty()) {
            config.product = product.to_owned();
        }
        if let Some(version) = self.app_version.as_deref().filter(|s| !s.is_empty()) {
            config.version = version.to_owned();
        }
    }
}

fn parent_pid() -> u32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        std::process::id()
    }
}

fn prepare(cli: &Cli, record: &Path) -> CapsuleResult<StartupCheck> {
    let mut config = CapsuleConfig::load(record)?;
    cli.apply_overrides(&mut config);
    let dir = record.parent().unwrap_or_else(|| Path::new("."));
    StartupCheck::new(config, dir)
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_cli();
    let cli = Cli::parse();
    let record = cli.record_path();

    let check = match prepare(&cli, &record) {
        Ok(check) => check,
        Err(err) => {
            warn!(record = %record.display(), error = %err, "capsule record unusable; starting normally");
            return ExitCode::SUCCESS;
        }
    };

    match check.run(cli.pid.unwrap_or_else(parent_pid)).await {
        StartupOutcome::UpdateStarted { .. } => ExitCode::from(UPDATE_STARTED),
        StartupOutcome::Continue(_) => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use vessel_common::OperatingSystem;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_replace_record_values() {
        let cli = Cli::try_parse_from([
            "vessel-launch",
            "--server",
            "http://mirror.test/",
            "--product",
            "demo",
            "--app-version",
            "2.0",
        ])
        .unwrap();
        let mut config = CapsuleConfig::new(
            ServerEndpoints::parse("http://updates.test/").unwrap(),
            "other",
            "1.0",
            OperatingSystem::Darwin,
        );
        cli.apply_overrides(&mut config);
        assert_eq!(config.server.to_string(), "http://mirror.test/");
        assert_eq!(config.product, "demo");
        assert_eq!(config.version, "2.0");
    }
}
