//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use vessel_common::OperatingSystem;
use vessel_logging::{vessel_debug, vessel_info, LogContext};
use vessel_versioning::Version;

use crate::config::CapsuleConfig;
use crate::error::{CapsuleError, Result};
use crate::stage::{self, UpdaterInvocation};

/// Outcome of comparing the embedded version with the server's latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// The embedded version is equal to or newer than the latest release.
    UpToDate { current: Version, latest: Version },
    /// The server has a strictly newer release.
    UpdateAvailable { current: Version, latest: Version },
}

impl UpdateDecision {
    /// Whether an update should be started.
    #[must_use]
    pub fn update_available(&self) -> bool {
        matches!(self, UpdateDecision::UpdateAvailable { .. })
    }

    /// Latest version reported by the server.
    #[must_use]
    pub fn latest(&self) -> &Version {
        match self {
            UpdateDecision::UpToDate { latest, .. } | UpdateDecision::UpdateAvailable { latest, .. } => {
                latest
            }
        }
    }
}

/// Updater process started by [`CapsuleClient::launch_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedUpdater {
    pub pid: u32,
    pub scratch_dir: PathBuf,
    pub invocation: UpdaterInvocation,
}

/// HTTP client for the capsule's release server queries.
#[derive(Debug, Clone)]
pub struct CapsuleClient {
    config: CapsuleConfig,
    http: reqwest::Client,
}

impl CapsuleClient {
    /// Build a client whose requests are bounded by the record's timeout.
    pub fn new(config: CapsuleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("vessel-capsule/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    /// Capsule record this client acts for.
    #[must_use]
    pub fn config(&self) -> &CapsuleConfig {
        &self.config
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_product(&self.config.product)
            .with_version(&self.config.version)
            .with_platform(self.config.platform.as_str())
    }

    /// Query `GET /product/{id}/latest/version`.
    pub async fn latest_version(&self) -> Result<Version> {
        let url = self.config.server.latest_version(&self.config.product);
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(CapsuleError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().await?;
        Ok(Version::parse(body.trim())?)
    }

    /// Decide whether an update should start. Only a strictly greater
    /// remote version counts as available.
    pub async fn check(&self) -> Result<UpdateDecision> {
        let current = Version::parse(&self.config.version)?;
        let latest = self.latest_version().await?;
        vessel_debug!(
            context = self.log_context().with_stage("check"),
            "server reports latest version {}",
            latest
        );
        Ok(if latest > current {
            UpdateDecision::UpdateAvailable { current, latest }
        } else {
            UpdateDecision::UpToDate { current, latest }
        })
    }

    /// Download the updater program for `os` into `dir`.
    pub async fn download_updater(&self, dir: &Path, os: Option<OperatingSystem>) -> Result<PathBuf> {
        let url = self.config.server.updater(os);
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(CapsuleError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?;
        let target = dir.join(format!("vessel-updater{}", std::env::consts::EXE_SUFFIX));
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|err| CapsuleError::io_at("write updater", &target, err))?;
        stage::make_executable(&target)?;
        Ok(target)
    }

    /// Stage runtime paths, fetch the updater and start it detached.
    ///
    /// `record_dir` is the directory holding the capsule record; `pid` is the
    /// process the updater waits for.
    pub async fn launch_update(&self, record_dir: &Path, pid: u32) -> Result<LaunchedUpdater> {
        let ctx = self.log_context().with_stage("launch");
        let scratch = stage::scratch_dir(&self.config.product);
        stage::reset_dir(&scratch)?;
        let staged = stage::stage_runtime_paths(record_dir, &self.config.runtime_paths, &scratch)?;
        vessel_debug!(context = ctx.clone(), "staged {} runtime path(s)", staged.len());

        let program = self
            .download_updater(&scratch, Some(self.config.platform))
            .await?;

        let invocation = UpdaterInvocation {
            program,
            server: self.config.server.to_string(),
            product: self.config.product.clone(),
            pid,
            directory: self.config.install_dir(record_dir),
            launch: self.config.entry_point.clone(),
        };
        let child = invocation.spawn_detached(&scratch)?;
        vessel_info!(
            context = ctx,
            "updater started as pid {} for {}",
            child,
            invocation.directory.display()
        );
        Ok(LaunchedUpdater {
            pid: child,
            scratch_dir: scratch,
            invocation,
        })
    }
}
