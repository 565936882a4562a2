//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vessel_common::OperatingSystem;
use vessel_versioning::Version;

/// An application distributed through the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    /// Surrogate key.
    pub id: i64,
    /// Unique slug used in URLs and on-disk paths.
    pub identifier: String,
    /// Display name; the only mutable attribute.
    pub name: String,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
}

/// An immutable published version of a product.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    /// Surrogate key; higher ids were registered later.
    pub id: i64,
    /// Owning product key.
    pub product_id: i64,
    /// Owning product identifier.
    pub product: String,
    /// Version as registered.
    pub version: Version,
    /// Registration time (UTC).
    pub created_at: DateTime<Utc>,
}

/// Per-platform artifacts of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasePath {
    /// Surrogate key.
    pub id: i64,
    /// Owning release key.
    pub release_id: i64,
    /// Platform the artifacts target.
    pub operating_system: OperatingSystem,
    /// Human-facing installer (e.g. a disk image).
    pub installer_path: PathBuf,
    /// Distribution archive consumed by the updater.
    pub dist_path: PathBuf,
}

/// Artifacts supplied when registering a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReleasePath {
    /// Target platform.
    pub operating_system: OperatingSystem,
    /// Installer location.
    pub installer_path: PathBuf,
    /// Distribution archive location.
    pub dist_path: PathBuf,
}

impl NewReleasePath {
    /// Convenience constructor.
    pub fn new(
        operating_system: OperatingSystem,
        installer_path: impl Into<PathBuf>,
        dist_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            operating_system,
            installer_path: installer_path.into(),
            dist_path: dist_path.into(),
        }
    }
}

/// A release together with every platform path written for it.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseRecord {
    /// The release row.
    pub release: Release,
    /// Its per-platform artifacts.
    pub paths: Vec<ReleasePath>,
}

impl ReleaseRecord {
    /// Artifacts for a platform, if the release ships any.
    #[must_use]
    pub fn path_for(&self, os: OperatingSystem) -> Option<&ReleasePath> {
        self.paths.iter().find(|path| path.operating_system == os)
    }
}
