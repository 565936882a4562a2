//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Storage and extraction of uploaded build inputs.

use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::error::{BuildError, Result};

/// Upload saved under a random name and extracted into its own directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: Uuid,
    pub archive: PathBuf,
    pub root: PathBuf,
}

impl StoredUpload {
    /// Remove both the stored archive and the extracted tree.
    pub fn discard(&self) {
        if let Err(err) = fs::remove_file(&self.archive) {
            warn!(path = %self.archive.display(), error = %err, "failed to remove upload");
        }
        if let Err(err) = fs::remove_dir_all(&self.root) {
            warn!(path = %self.root.display(), error = %err, "failed to remove extracted upload");
        }
    }
}

/// Writes uploads to `uploads_dir` and extracts them below `unzipped_dir`.
#[derive(Debug, Clone)]
pub struct UploadIntake {
    uploads_dir: PathBuf,
    unzipped_dir: PathBuf,
}

impl UploadIntake {
    pub fn new(uploads_dir: impl Into<PathBuf>, unzipped_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            unzipped_dir: unzipped_dir.into(),
        }
    }

    /// Validate and store an uploaded zip. Names are UUIDs, never the
    /// client-supplied file name.
    pub fn store(&self, bytes: &[u8]) -> Result<StoredUpload> {
        if bytes.is_empty() {
            return Err(BuildError::InvalidUpload("empty upload".into()));
        }
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| BuildError::InvalidUpload(format!("not a zip archive: {err}")))?;

        let id = Uuid::new_v4();
        fs::create_dir_all(&self.uploads_dir)
            .map_err(|err| BuildError::io_at("create", &self.uploads_dir, err))?;
        let archive_path = self.uploads_dir.join(format!("{id}.zip"));
        fs::write(&archive_path, bytes)
            .map_err(|err| BuildError::io_at("write upload", &archive_path, err))?;

        let root = self.unzipped_dir.join(id.to_string());
        fs::create_dir_all(&root).map_err(|err| BuildError::io_at("create", &root, err))?;
        if let Err(err) = archive.extract(&root) {
            let _ = fs::remove_file(&archive_path);
            let _ = fs::remove_dir_all(&root);
            return Err(BuildError::InvalidUpload(format!("corrupt zip archive: {err}")));
        }
        debug!(upload = %id, entries = archive.len(), "upload extracted");

        Ok(StoredUpload {
            id,
            archive: archive_path,
            root,
        })
    }

    /// Store an upload already on disk.
    pub fn store_file(&self, path: &Path) -> Result<StoredUpload> {
        let bytes = fs::read(path).map_err(|err| BuildError::io_at("read", path, err))?;
        self.store(&bytes)
    }
}

/// Whether `path` opens as a zip archive.
#[must_use]
pub fn is_zip(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|file| ZipArchive::new(file).ok())
        .is_some()
}
