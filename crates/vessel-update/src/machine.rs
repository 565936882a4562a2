//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use strum::{AsRefStr, Display};
use vessel_common::OperatingSystem;
use vessel_logging::{log_stage_event, vessel_debug, vessel_info, LogContext, StageOutcome};

use crate::error::{Result, UpdaterError};
use crate::fetch::{validate_archive, ArchiveFetcher};
use crate::install::{replace_installation, ReplaceSummary};
use crate::probe::{wait_for_exit, ParentProbe, SystemProbe, WaitPolicy};
use crate::relaunch::{Relauncher, SystemRelauncher};

/// Updater states, entered strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum UpdaterState {
    WaitForParentExit,
    Download,
    Replace,
    Relaunch,
    Done,
}

/// Everything the updater needs to know about one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub product: String,
    pub pid: u32,
    /// Installation directory that gets replaced.
    pub directory: PathBuf,
    /// Entry point relative to `directory`, used off macOS.
    pub launch: Option<String>,
    pub platform: OperatingSystem,
    /// Where the downloaded archive is written.
    pub scratch_dir: PathBuf,
    pub wait: WaitPolicy,
}

impl UpdateRequest {
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.scratch_dir
            .join(format!("{}-{}.zip", self.product, self.platform.as_str()))
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub probes: u32,
    pub archive: PathBuf,
    pub replaced: ReplaceSummary,
    pub relaunched: Option<u32>,
    pub states: Vec<UpdaterState>,
}

/// Platform the updater is running on.
pub fn host_platform() -> Result<OperatingSystem> {
    OperatingSystem::current()
        .ok_or_else(|| UpdaterError::UnsupportedPlatform(std::env::consts::OS.to_owned()))
}

/// Wait, download, replace, relaunch.
pub struct Updater {
    request: UpdateRequest,
    probe: Arc<dyn ParentProbe>,
    fetcher: Arc<dyn ArchiveFetcher>,
    relauncher: Arc<dyn Relauncher>,
}

impl Updater {
    pub fn new(request: UpdateRequest, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        let relauncher = Arc::new(SystemRelauncher::new(request.platform));
        Self {
            request,
            probe: Arc::new(SystemProbe),
            fetcher,
            relauncher,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ParentProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_relauncher(mut self, relauncher: Arc<dyn Relauncher>) -> Self {
        self.relauncher = relauncher;
        self
    }

    pub fn request(&self) -> &UpdateRequest {
        &self.request
    }

    pub async fn run(&self) -> Result<UpdateReport> {
        let request = &self.request;
        let ctx = LogContext::new()
            .with_product(&request.product)
            .with_platform(request.platform.as_str());
        let mut states = Vec::with_capacity(5);
        let mut state = UpdaterState::WaitForParentExit;

        let result = self.advance(&ctx, &mut state, &mut states).await;
        let stage_ctx = ctx.clone().with_stage(state.as_ref());
        match &result {
            Ok(_) => log_stage_event(
                Some(&stage_ctx),
                "update.completed",
                "installation updated",
                StageOutcome::Success,
            ),
            Err(err) => log_stage_event(
                Some(&stage_ctx),
                "update.failed",
                &err.to_string(),
                StageOutcome::Failed,
            ),
        }
        result
    }

    async fn advance(
        &self,
        ctx: &LogContext<'_>,
        state: &mut UpdaterState,
        states: &mut Vec<UpdaterState>,
    ) -> Result<UpdateReport> {
        let request = &self.request;

        states.push(*state);
        vessel_info!(
            context = ctx.clone().with_stage(state.as_ref()),
            "waiting for process {} to exit",
            request.pid
        );
        let probes = wait_for_exit(self.probe.as_ref(), request.pid, request.wait).await?;

        *state = UpdaterState::Download;
        states.push(*state);
        let archive = self
            .fetcher
            .fetch(&request.product, request.platform, &request.archive_path())
            .await?;
        let entries = validate_archive(&archive)?;
        vessel_debug!(
            context = ctx.clone().with_stage(state.as_ref()),
            "archive {} holds {} entries",
            archive.display(),
            entries
        );

        *state = UpdaterState::Replace;
        states.push(*state);
        let replaced = {
            let archive = archive.clone();
            let directory = request.directory.clone();
            tokio::task::spawn_blocking(move || replace_installation(&archive, &directory))
                .await
                .map_err(|err| UpdaterError::Replace {
                    context: "extraction task".to_owned(),
                    source: std::io::Error::other(err),
                })??
        };
        vessel_info!(
            context = ctx.clone().with_stage(state.as_ref()),
            "installation replaced at {}",
            replaced.directory.display()
        );

        *state = UpdaterState::Relaunch;
        states.push(*state);
        let relaunched = self
            .relauncher
            .relaunch(&request.directory, request.launch.as_deref())?;
        match relaunched {
            Some(pid) => vessel_info!(
                context = ctx.clone().with_stage(state.as_ref()),
                "application relaunched as pid {}",
                pid
            ),
            None => vessel_info!(
                context = ctx.clone().with_stage(state.as_ref()),
                "no launch entry configured; not relaunching"
            ),
        }

        *state = UpdaterState::Done;
        states.push(*state);
        Ok(UpdateReport {
            probes,
            archive,
            replaced,
            relaunched,
            states: states.clone(),
        })
    }
}
