//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use vessel_common::OperatingSystem;

use crate::error::{Result, UpdaterError};

/// Starts the updated application.
pub trait Relauncher: Send + Sync {
    /// Returns the started process id, or `None` when nothing is configured
    /// to run.
    fn relaunch(&self, directory: &Path, launch: Option<&str>) -> Result<Option<u32>>;
}

/// Program and arguments used to start the application again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl RelaunchCommand {
    /// macOS opens the application bundle; other platforms run the entry
    /// point inside the installation directory.
    pub fn for_platform(
        platform: OperatingSystem,
        directory: &Path,
        launch: Option<&str>,
    ) -> Result<Option<Self>> {
        if platform == OperatingSystem::Darwin {
            return Ok(Some(Self {
                program: PathBuf::from("open"),
                args: vec!["-a".into(), directory.as_os_str().to_owned()],
            }));
        }
        let Some(entry) = launch else {
            return Ok(None);
        };
        let relative = Path::new(entry);
        if entry.is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(UpdaterError::Relaunch(format!(
                "launch entry {entry:?} must be relative to the installation"
            )));
        }
        Ok(Some(Self {
            program: directory.join(relative),
            args: Vec::new(),
        }))
    }

    pub fn spawn(&self, cwd: &Path) -> Result<u32> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().map_err(|err| {
            UpdaterError::Relaunch(format!("{}: {err}", self.program.display()))
        })?;
        Ok(child.id())
    }
}

/// Relauncher that spawns real processes.
#[derive(Debug, Clone, Copy)]
pub struct SystemRelauncher {
    platform: OperatingSystem,
}

impl SystemRelauncher {
    pub fn new(platform: OperatingSystem) -> Self {
        Self { platform }
    }
}

impl Relauncher for SystemRelauncher {
    fn relaunch(&self, directory: &Path, launch: Option<&str>) -> Result<Option<u32>> {
        match RelaunchCommand::for_platform(self.platform, directory, launch)? {
            Some(command) => command.spawn(directory).map(Some),
            None => Ok(None),
        }
    }
}
