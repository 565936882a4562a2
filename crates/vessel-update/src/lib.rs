//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Out-of-process updater.
//!
//! Runs after the application has asked for an update: waits for the
//! application to exit, downloads the newest distribution archive, swaps it
//! into the installation directory and starts the application again. The
//! installation is never modified before the parent has exited and the
//! archive has been validated.

pub mod error;
pub mod fetch;
pub mod install;
pub mod machine;
pub mod probe;
pub mod relaunch;

pub use error::{Result, UpdaterError};
pub use fetch::{validate_archive, ArchiveFetcher, HttpFetcher};
pub use install::{replace_installation, ReplaceSummary, SwapPaths};
pub use machine::{host_platform, UpdateReport, UpdateRequest, Updater, UpdaterState};
pub use probe::{wait_for_exit, ParentProbe, SystemProbe, WaitPolicy};
pub use relaunch::{RelaunchCommand, Relauncher, SystemRelauncher};
