//! ---
//! vsl_section: "01-versioning"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Version ordering and build metadata helpers."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Version comparison for release catalogs and build metadata for the
//! workspace binaries.
//!
//! The comparator in [`compare`] is the only ordering used to decide which
//! release is "latest"; string order and creation time are never consulted.

pub mod build_info;
pub mod compare;

pub use build_info::VersionInfo;
pub use compare::{compare, is_newer, Version, VersionError};
