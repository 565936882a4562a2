//! ---
//! vsl_section: "04-configuration"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Shared primitives and utilities for Vessel services."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Shared primitives for the Vessel workspace.
//! This crate exposes configuration loading, the supported platform set,
//! tracing initialisation and version metadata consumed across the workspace.

pub mod config;
pub mod endpoints;
pub mod logging;
pub mod platform;

pub use vessel_versioning::build_info as version;

pub use config::{
    ApiConfig, BuildConfig, InstallerConfig, LoadedServerConfig, LoggingConfig, MetricsConfig,
    ServerConfig, StorageConfig, ToolCommand, UpdaterConfig,
};
pub use endpoints::{InvalidServerUrl, ServerEndpoints};
pub use logging::{init_tracing, LogFormat};
pub use platform::{OperatingSystem, UnsupportedPlatform};
