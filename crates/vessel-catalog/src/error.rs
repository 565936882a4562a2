//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use thiserror::Error;
use vessel_common::{OperatingSystem, UnsupportedPlatform};
use vessel_versioning::VersionError;

/// Result alias used throughout the catalog crate.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Error type for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A product with the identifier already exists.
    #[error("there is already a product with the identifier {0}")]
    DuplicateProduct(String),
    /// A release with an equal normalized version already exists.
    #[error("there is already a release of {product} with version {version}")]
    DuplicateVersion {
        /// Product identifier.
        product: String,
        /// Version as supplied by the caller.
        version: String,
    },
    /// No product carries the identifier.
    #[error("no product with the identifier {0}")]
    ProductNotFound(String),
    /// The product exists but has never been released.
    #[error("product {0} has no releases")]
    NoReleases(String),
    /// The release ships no artifacts for the platform.
    #[error("release {version} of {product} has no {os} artifacts")]
    PathNotFound {
        /// Product identifier.
        product: String,
        /// Canonical release version.
        version: String,
        /// Requested platform.
        os: OperatingSystem,
    },
    /// Products are only removable once they have no releases.
    #[error("product {identifier} still has {releases} release(s)")]
    ProductHasReleases {
        /// Product identifier.
        identifier: String,
        /// Number of releases blocking the removal.
        releases: i64,
    },
    /// A registration listed the same platform twice.
    #[error("platform {0} listed more than once")]
    DuplicatePlatform(OperatingSystem),
    /// Identifiers are path components and must be slugs.
    #[error("invalid product identifier '{0}' (use letters, digits, '.', '-' or '_')")]
    InvalidIdentifier(String),
    /// Names are used in artifact file names.
    #[error("invalid product name '{0}'")]
    InvalidName(String),
    /// Platform outside darwin, windows and linux.
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
    /// Version string failed to parse.
    #[error(transparent)]
    MalformedVersion(#[from] VersionError),
    /// Underlying SQLite failure.
    #[error("catalog storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CatalogError {
    /// Whether the error denotes a missing entity rather than bad input.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::ProductNotFound(_)
                | CatalogError::NoReleases(_)
                | CatalogError::PathNotFound { .. }
        )
    }

    /// Whether the error originates from the storage engine.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, CatalogError::Sqlite(_))
    }
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
