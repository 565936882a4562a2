//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use vessel_versioning::VersionError;

/// Result alias used throughout the capsule crate.
pub type Result<T> = std::result::Result<T, CapsuleError>;

/// Error type for embedding and running the update capsule.
#[derive(Debug, Error)]
pub enum CapsuleError {
    /// A substituted value would break out of the preamble template.
    #[error("value for {placeholder} cannot be embedded safely: {value:?}")]
    UnsafeValue {
        /// Placeholder being substituted.
        placeholder: &'static str,
        /// Rejected value.
        value: String,
    },
    /// No preamble exists for the language of an entry point or template.
    #[error("no capsule preamble for {path}: expected a shell or Python script")]
    UnsupportedLanguage {
        /// Entry point or template file.
        path: PathBuf,
    },
    /// Filesystem failure with the operation that caused it.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The capsule record could not be read or written.
    #[error("invalid capsule record: {0}")]
    Record(#[from] serde_json::Error),
    /// Transport failure talking to the release server.
    #[error("release server unreachable: {0}")]
    Network(#[from] reqwest::Error),
    /// The release server answered with a non-success status.
    #[error("release server answered {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// Embedded or remote version failed to parse.
    #[error(transparent)]
    MalformedVersion(#[from] VersionError),
}

impl CapsuleError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        CapsuleError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("failed to {action} {}", path.display()), source)
    }
}
