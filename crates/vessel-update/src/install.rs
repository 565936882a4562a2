//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Staged extraction and rename swap of the installation directory.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, UpdaterError};

/// What a successful replacement did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub directory: PathBuf,
    pub entries: usize,
    /// Whether an existing installation was swapped out.
    pub replaced_existing: bool,
}

/// Sibling paths used while swapping `directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPaths {
    pub staging: PathBuf,
    pub previous: PathBuf,
}

impl SwapPaths {
    pub fn for_directory(directory: &Path) -> Result<Self> {
        let (parent, name) = match (directory.parent(), directory.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(UpdaterError::replace_at(
                    "locate parent of",
                    directory,
                    io::Error::new(io::ErrorKind::InvalidInput, "installation has no parent"),
                ))
            }
        };
        let sibling = |suffix: &str| {
            let mut file = OsString::from(".");
            file.push(name);
            file.push(suffix);
            parent.join(file)
        };
        Ok(Self {
            staging: sibling(".vessel-staging"),
            previous: sibling(".vessel-previous"),
        })
    }
}

/// Extract `archive` next to `directory`, then swap it into place.
///
/// The installation is untouched unless extraction succeeds. If the final
/// rename fails the previous tree is restored.
pub fn replace_installation(archive: &Path, directory: &Path) -> Result<ReplaceSummary> {
    let paths = SwapPaths::for_directory(directory)?;
    remove_if_present(&paths.staging)?;
    remove_if_present(&paths.previous)?;

    let entries = match extract(archive, &paths.staging) {
        Ok(entries) => entries,
        Err(err) => {
            discard(&paths.staging);
            return Err(err);
        }
    };
    debug!(staging = %paths.staging.display(), entries, "archive extracted");

    let replaced_existing = directory.exists();
    if replaced_existing {
        if let Err(err) = fs::rename(directory, &paths.previous) {
            discard(&paths.staging);
            return Err(UpdaterError::replace_at("move aside", directory, err));
        }
    }
    if let Err(err) = fs::rename(&paths.staging, directory) {
        if replaced_existing {
            if let Err(restore) = fs::rename(&paths.previous, directory) {
                warn!(
                    previous = %paths.previous.display(),
                    error = %restore,
                    "failed to restore previous installation"
                );
            }
        }
        discard(&paths.staging);
        return Err(UpdaterError::replace_at("swap in", directory, err));
    }
    if replaced_existing {
        discard(&paths.previous);
    }

    Ok(ReplaceSummary {
        directory: directory.to_path_buf(),
        entries,
        replaced_existing,
    })
}

fn extract(archive: &Path, staging: &Path) -> Result<usize> {
    let file = File::open(archive)
        .map_err(|err| UpdaterError::ArchiveCorrupt(format!("{}: {err}", archive.display())))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| UpdaterError::ArchiveCorrupt(format!("{}: {err}", archive.display())))?;
    fs::create_dir_all(staging).map_err(|err| UpdaterError::replace_at("create", staging, err))?;
    zip.extract(staging).map_err(|err| match err {
        zip::result::ZipError::Io(source) => UpdaterError::replace_at("extract into", staging, source),
        other => UpdaterError::ArchiveCorrupt(other.to_string()),
    })?;
    Ok(zip.len())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(UpdaterError::replace_at("clear", path, err)),
    }
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove leftover directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bundle_zip(path: &Path) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("Contents/", options).unwrap();
        writer.start_file("Contents/Info.plist", options).unwrap();
        writer.write_all(b"<plist>2.0</plist>").unwrap();
        writer.start_file("Contents/MacOS/run", options).unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn swaps_in_new_tree_and_drops_old_files() {
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("Demo.app");
        fs::create_dir_all(install.join("Contents")).unwrap();
        fs::write(install.join("Contents/Info.plist"), "<plist>1.0</plist>").unwrap();
        fs::write(install.join("Contents/stale"), "old").unwrap();
        let archive = root.path().join("Demo.zip");
        bundle_zip(&archive);

        let summary = replace_installation(&archive, &install).unwrap();

        assert!(summary.replaced_existing);
        assert_eq!(summary.entries, 3);
        assert_eq!(
            fs::read_to_string(install.join("Contents/Info.plist")).unwrap(),
            "<plist>2.0</plist>"
        );
        assert!(!install.join("Contents/stale").exists());
        let paths = SwapPaths::for_directory(&install).unwrap();
        assert!(!paths.staging.exists());
        assert!(!paths.previous.exists());
    }

    #[test]
    fn corrupt_archive_leaves_installation_untouched() {
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("Demo.app");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("marker"), "1.0").unwrap();
        let archive = root.path().join("broken.zip");
        fs::write(&archive, "not a zip").unwrap();

        let err = replace_installation(&archive, &install).unwrap_err();
        assert!(matches!(err, UpdaterError::ArchiveCorrupt(_)));
        assert_eq!(fs::read_to_string(install.join("marker")).unwrap(), "1.0");
        assert!(!SwapPaths::for_directory(&install).unwrap().staging.exists());
    }

    #[test]
    fn installs_into_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("Fresh.app");
        let archive = root.path().join("Fresh.zip");
        bundle_zip(&archive);

        let summary = replace_installation(&archive, &install).unwrap();
        assert!(!summary.replaced_existing);
        assert!(install.join("Contents/MacOS/run").is_file());
    }

    #[test]
    fn swap_paths_are_hidden_siblings() {
        let paths = SwapPaths::for_directory(Path::new("/Applications/Demo.app")).unwrap();
        assert_eq!(paths.staging, Path::new("/Applications/.Demo.app.vessel-staging"));
        assert_eq!(paths.previous, Path::new("/Applications/.Demo.app.vessel-previous"));
        assert!(SwapPaths::for_directory(Path::new("/")).is_err());
    }
}
