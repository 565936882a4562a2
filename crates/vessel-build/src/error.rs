//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use vessel_capsule::CapsuleError;
use vessel_catalog::CatalogError;
use vessel_versioning::VersionError;

/// Result alias used throughout the build crate.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Error type for the build pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The uploaded build input is not a usable zip archive.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    /// A required request field was absent or blank.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    /// A request field was present but unusable.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    /// The product already has a release with an equal version.
    #[error("there is already a release of {product} with version {version}")]
    DuplicateVersion { product: String, version: String },
    /// An external tool could not be started or exited unsuccessfully.
    #[error("{tool} failed ({status}){}", stderr_suffix(.stderr))]
    ExternalToolFailure {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    /// A tool reported success but its expected output is absent.
    #[error("{tool} did not produce {}", .path.display())]
    MissingArtifact { tool: &'static str, path: PathBuf },
    /// Version metadata failed to parse.
    #[error(transparent)]
    MalformedVersion(#[from] VersionError),
    /// Capsule rendering or embedding failed.
    #[error(transparent)]
    Capsule(#[from] CapsuleError),
    /// Catalog lookup or registration failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Zip reading or writing failed.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Filesystem failure with the operation that caused it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl BuildError {
    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        BuildError::Io {
            context: format!("failed to {action} {}", path.display()),
            source,
        }
    }

    /// Whether the caller supplied bad input, as opposed to a server fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            BuildError::InvalidUpload(_)
            | BuildError::MissingField(_)
            | BuildError::InvalidField { .. }
            | BuildError::DuplicateVersion { .. }
            | BuildError::MalformedVersion(_)
            | BuildError::ExternalToolFailure { .. }
            | BuildError::MissingArtifact { .. } => true,
            BuildError::Capsule(err) => matches!(
                err,
                CapsuleError::UnsafeValue { .. } | CapsuleError::UnsupportedLanguage { .. }
            ),
            BuildError::Catalog(err) => !err.is_storage(),
            BuildError::Zip(_) | BuildError::Io { .. } => false,
        }
    }
}

pub(crate) fn registration_error(err: CatalogError) -> BuildError {
    match err {
        CatalogError::DuplicateVersion { product, version } => {
            BuildError::DuplicateVersion { product, version }
        }
        other => BuildError::Catalog(other),
    }
}
