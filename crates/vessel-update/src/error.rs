//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Failures of the updater process. Each maps to a distinct exit code.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("failed to download {url}: {reason}")]
    NetworkFailure { url: String, reason: String },
    #[error("downloaded archive is corrupt: {0}")]
    ArchiveCorrupt(String),
    #[error("process {pid} still running after {waited:?}")]
    ParentNeverExited { pid: u32, waited: Duration },
    #[error("liveness probe for process {pid} failed: {source}")]
    Probe {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to replace installation: {context}: {source}")]
    Replace {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to relaunch application: {0}")]
    Relaunch(String),
    #[error("updater cannot run on {0}")]
    UnsupportedPlatform(String),
}

impl UpdaterError {
    /// Process exit code reported by the updater binary.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdaterError::NetworkFailure { .. } => 10,
            UpdaterError::ArchiveCorrupt(_) => 11,
            UpdaterError::ParentNeverExited { .. } | UpdaterError::Probe { .. } => 12,
            UpdaterError::Replace { .. } => 13,
            UpdaterError::Relaunch(_) => 14,
            UpdaterError::UnsupportedPlatform(_) => 15,
        }
    }

    pub(crate) fn replace_at(action: &str, path: &Path, source: io::Error) -> Self {
        UpdaterError::Replace {
            context: format!("{action} {}", path.display()),
            source,
        }
    }

    pub(crate) fn network(url: &url::Url, reason: impl ToString) -> Self {
        UpdaterError::NetworkFailure {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
