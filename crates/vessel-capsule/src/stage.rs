//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Scratch directory staging and detached updater spawning.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use walkdir::WalkDir;

use crate::error::{CapsuleError, Result};

/// Scratch directory used for one product's update run.
#[must_use]
pub fn scratch_dir(product: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vessel-update-{product}"))
}

/// Remove and recreate `dir`.
pub fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|err| CapsuleError::io_at("clear", dir, err))?;
    }
    fs::create_dir_all(dir).map_err(|err| CapsuleError::io_at("create", dir, err))
}

/// Copy each runtime path (relative to `base`) into `scratch`, keeping its
/// final component as the name.
pub fn stage_runtime_paths(base: &Path, paths: &[String], scratch: &Path) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(paths.len());
    for relative in paths {
        let source = base.join(relative);
        let name = source.file_name().ok_or_else(|| {
            CapsuleError::io(
                format!("runtime path '{relative}' has no file name"),
                std::io::ErrorKind::InvalidInput.into(),
            )
        })?;
        let target = scratch.join(name);
        copy_tree(&source, &target)?;
        staged.push(target);
    }
    Ok(staged)
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let metadata =
        fs::metadata(source).map_err(|err| CapsuleError::io_at("stage", source, err))?;
    if metadata.is_file() {
        fs::copy(source, target).map_err(|err| CapsuleError::io_at("stage", source, err))?;
        return Ok(());
    }
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|err| {
            let context = format!("failed to walk {}", source.display());
            CapsuleError::io(context, err.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .map_err(|err| CapsuleError::io_at("create", &destination, err))?;
        } else {
            fs::copy(entry.path(), &destination)
                .map_err(|err| CapsuleError::io_at("stage", entry.path(), err))?;
        }
    }
    Ok(())
}

/// Mark a downloaded program executable.
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|err| CapsuleError::io_at("chmod", path, err))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Command line handed to the updater process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterInvocation {
    pub program: PathBuf,
    pub server: String,
    pub product: String,
    pub pid: u32,
    pub directory: PathBuf,
    pub launch: Option<String>,
}

impl UpdaterInvocation {
    /// Arguments in the order the updater CLI documents them.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--server".into(),
            self.server.clone().into(),
            "--product".into(),
            self.product.clone().into(),
            "--pid".into(),
            self.pid.to_string().into(),
            "--directory".into(),
            self.directory.clone().into_os_string(),
        ];
        if let Some(launch) = &self.launch {
            args.push("--launch".into());
            args.push(launch.into());
        }
        args
    }

    /// Start the updater detached from the current process, with `cwd` as
    /// its working directory. Returns the child pid.
    pub fn spawn_detached(&self, cwd: &Path) -> Result<u32> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }
        let child = command
            .spawn()
            .map_err(|err| CapsuleError::io_at("spawn updater", &self.program, err))?;
        Ok(child.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_files_and_directories() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("lib/runtime")).unwrap();
        fs::write(base.path().join("lib/runtime/site.conf"), "x").unwrap();
        fs::write(base.path().join("runtime"), "bin").unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let staged = stage_runtime_paths(
            base.path(),
            &["lib".to_owned(), "runtime".to_owned()],
            scratch.path(),
        )
        .unwrap();

        assert_eq!(staged.len(), 2);
        assert!(scratch.path().join("lib/runtime/site.conf").is_file());
        assert!(scratch.path().join("runtime").is_file());
    }

    #[test]
    fn missing_runtime_path_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        assert!(stage_runtime_paths(base.path(), &["nope".to_owned()], scratch.path()).is_err());
    }

    #[test]
    fn reset_dir_clears_previous_runs() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("stale"), "old").unwrap();
        reset_dir(&scratch).unwrap();
        assert!(scratch.is_dir());
        assert!(!scratch.join("stale").exists());
    }

    #[test]
    fn invocation_lists_launch_last() {
        let invocation = UpdaterInvocation {
            program: PathBuf::from("/tmp/vessel-updater"),
            server: "http://127.0.0.1:8080/".into(),
            product: "demo".into(),
            pid: 4242,
            directory: PathBuf::from("/Applications/Demo.app"),
            launch: Some("bin/demo".into()),
        };
        let args: Vec<String> = invocation
            .args()
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "--server",
                "http://127.0.0.1:8080/",
                "--product",
                "demo",
                "--pid",
                "4242",
                "--directory",
                "/Applications/Demo.app",
                "--launch",
                "bin/demo"
            ]
        );
    }
}
