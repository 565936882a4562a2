//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Update capsule shipped inside every built application.
//!
//! At build time [`CapsuleEmbedder`] inserts a shell or Python preamble,
//! matching the entry point's language, and writes a [`CapsuleConfig`]
//! record next to it. At start-up the launcher runs a [`StartupCheck`],
//! which never prevents the application from starting: any failure means
//! "continue normally".

pub mod client;
pub mod config;
pub mod embed;
pub mod error;
pub mod stage;

use std::path::{Path, PathBuf};

use vessel_common::OperatingSystem;
use vessel_logging::{vessel_info, vessel_warn, LogContext};
use vessel_versioning::Version;

pub use client::{CapsuleClient, LaunchedUpdater, UpdateDecision};
pub use config::{CapsuleConfig, CAPSULE_FILE, LAUNCHER_FILE};
pub use embed::{
    insert_preamble, render_template, CapsuleEmbedder, CapsuleValues, EmbeddedCapsule,
    EntryLanguage, PRODUCT_PLACEHOLDER, PYTHON_TEMPLATE, SERVER_PLACEHOLDER, SHELL_TEMPLATE,
    VERSION_PLACEHOLDER,
};
pub use error::{CapsuleError, Result};

/// Why the application continues without updating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinueReason {
    /// The running platform is not the one the capsule targets.
    ForeignPlatform,
    /// No newer release exists.
    UpToDate,
    /// The check or launch failed; the error is logged.
    CheckFailed,
}

/// Result of the start-up check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Start the application normally.
    Continue(ContinueReason),
    /// An updater is running; the application must exit now.
    UpdateStarted { latest: Version, updater_pid: u32 },
}

/// Fail-open start-up check driven by a capsule record.
#[derive(Debug, Clone)]
pub struct StartupCheck {
    client: CapsuleClient,
    record_dir: PathBuf,
    host: Option<OperatingSystem>,
}

impl StartupCheck {
    /// Check for the record stored in `record_dir`.
    pub fn new(config: CapsuleConfig, record_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            client: CapsuleClient::new(config)?,
            record_dir: record_dir.into(),
            host: OperatingSystem::current(),
        })
    }

    /// Load the record at `path`; its directory becomes the record directory.
    pub fn from_record(path: &Path) -> Result<Self> {
        let config = CapsuleConfig::load(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(config, dir)
    }

    /// Override the detected host platform.
    #[must_use]
    pub fn with_host_platform(mut self, host: Option<OperatingSystem>) -> Self {
        self.host = host;
        self
    }

    /// Underlying client.
    #[must_use]
    pub fn client(&self) -> &CapsuleClient {
        &self.client
    }

    /// Run the check for the application process `pid`.
    pub async fn run(&self, pid: u32) -> StartupOutcome {
        let config = self.client.config();
        let ctx = LogContext::new()
            .with_product(&config.product)
            .with_version(&config.version)
            .with_stage("startup");

        if self.host != Some(config.platform) {
            vessel_info!(
                context = ctx,
                "capsule targets {}; skipping update check",
                config.platform
            );
            return StartupOutcome::Continue(ContinueReason::ForeignPlatform);
        }

        match self.try_run(pid).await {
            Ok(outcome) => outcome,
            Err(err) => {
                vessel_warn!(context = ctx, "update check failed, starting normally: {}", err);
                StartupOutcome::Continue(ContinueReason::CheckFailed)
            }
        }
    }

    async fn try_run(&self, pid: u32) -> Result<StartupOutcome> {
        let decision = self.client.check().await?;
        match decision {
            UpdateDecision::UpToDate { .. } => Ok(StartupOutcome::Continue(ContinueReason::UpToDate)),
            UpdateDecision::UpdateAvailable { latest, .. } => {
                let launched = self.client.launch_update(&self.record_dir, pid).await?;
                Ok(StartupOutcome::UpdateStarted {
                    latest,
                    updater_pid: launched.pid,
                })
            }
        }
    }
}
