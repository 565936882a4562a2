//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Release build pipeline.
//!
//! Stages run strictly in order (pack, embed, bundle, installer, archive,
//! register) and any failure aborts before the catalog is written.

pub mod archive;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod request;
pub mod toolchain;

pub use archive::{write_dist_archive, ArchiveSummary};
pub use error::{BuildError, Result};
pub use intake::{StoredUpload, UploadIntake};
pub use pipeline::{
    bundle_name, pack_key, BuildLayout, BuildOutcome, BuildPipeline, Stage, PACKED_RESOURCE,
};
pub use request::{BuildForm, BuildRequest, DEFAULT_VERSION};
pub use toolchain::{
    BundleJob, BundleManifest, ExternalToolchain, InstallerJob, PackJob, TemplateVars, Toolchain,
    PACK_KEY_ENV,
};
