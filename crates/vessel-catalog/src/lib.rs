//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Release catalog backed by SQLite.
//!
//! The catalog owns every write to products, releases and release paths.
//! "Latest" is always resolved with the dotted-version comparator from
//! `vessel-versioning`; insertion order only breaks exact ties.

pub mod error;
pub mod model;
mod schema;
pub mod store;

pub use error::{CatalogError, Result};
pub use model::{NewReleasePath, Product, Release, ReleasePath, ReleaseRecord};
pub use store::{validate_identifier, validate_name, Catalog};
