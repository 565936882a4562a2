//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Deterministic distribution archives.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{BuildError, Result};

/// Entry counts of a written archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
}

/// Zip the contents of `root` into `output` with entry names relative to
/// `root`.
///
/// Entries are written in sorted order with a fixed timestamp, so the same
/// tree always yields the same bytes. Unix modes and symlinks are kept.
pub fn write_dist_archive(root: &Path, output: &Path) -> Result<ArchiveSummary> {
    if !root.is_dir() {
        return Err(BuildError::io_at(
            "archive",
            root,
            io::Error::new(io::ErrorKind::NotFound, "bundle directory missing"),
        ));
    }
    let file = File::create(output).map_err(|err| BuildError::io_at("create", output, err))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut summary = ArchiveSummary::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| BuildError::io_at("walk", root, io::Error::from(err)))?;
        let name = entry_name(root, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|err| BuildError::io_at("read link", entry.path(), err))?;
            zip.add_symlink(name, target.to_string_lossy().into_owned(), base.clone())?;
            summary.symlinks += 1;
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|err| BuildError::io_at("stat", entry.path(), io::Error::from(err)))?;
        let options = base.clone().unix_permissions(unix_mode(&metadata));
        if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            summary.directories += 1;
        } else {
            zip.start_file(name, options)?;
            let mut source = File::open(entry.path())
                .map_err(|err| BuildError::io_at("open", entry.path(), err))?;
            io::copy(&mut source, &mut zip)
                .map_err(|err| BuildError::io_at("compress", entry.path(), err))?;
            summary.files += 1;
        }
    }
    zip.finish()?;
    Ok(summary)
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        BuildError::io_at(
            "archive",
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "entry outside bundle root"),
        )
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}
