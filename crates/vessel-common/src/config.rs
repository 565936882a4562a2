//! ---
//! vsl_section: "04-configuration"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Shared primitives and utilities for Vessel services."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;
use crate::platform::OperatingSystem;

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_upload_bytes() -> usize {
    1 << 30
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_database() -> PathBuf {
    PathBuf::from("server.db")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_releases_dir() -> PathBuf {
    PathBuf::from("releases")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_platform() -> OperatingSystem {
    OperatingSystem::Darwin
}

fn default_version_key() -> String {
    "CFBundleShortVersionString".to_owned()
}

fn default_icon_name() -> String {
    "pakkicon.icns".to_owned()
}

fn default_install_root() -> String {
    "../..".to_owned()
}

fn default_bundler() -> ToolCommand {
    ToolCommand::new(
        "vessel-bundle",
        &["--manifest", "{manifest}", "--dist-dir", "{dist_dir}"],
    )
}

fn default_installer() -> InstallerConfig {
    InstallerConfig {
        command: ToolCommand::new("create-dmg", &["{bundle}", "{output_dir}", "--overwrite"]),
        produces: "{name} {version}.dmg".to_owned(),
        file_name: "{name}.dmg".to_owned(),
    }
}

fn default_packer() -> ToolCommand {
    ToolCommand::new("vessel-pack", &["--output", "{output}", "{inputs}"])
}

fn default_updater_binary() -> PathBuf {
    PathBuf::from("bin/vessel-updater")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Primary configuration object for the release server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`ServerConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedServerConfig {
    pub config: ServerConfig,
    pub source: PathBuf,
}

impl ServerConfig {
    pub const ENV_CONFIG_PATH: &'static str = "VESSEL_CONFIG";

    /// Load configuration from disk, respecting the `VESSEL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedServerConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedServerConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedServerConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ServerConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.build.validate()?;
        if self.metrics.enabled && self.metrics.listen == self.api.listen {
            return Err(anyhow!(
                "metrics listener {} collides with the api listener",
                self.metrics.listen
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for ServerConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: ServerConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// Base URL embedded into shipped capsules. Derived from the request
    /// `Host` header when unset.
    #[serde(default)]
    pub public_url: Option<Url>,
    /// Largest accepted `POST /pakkage` body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
            public_url: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// On-disk layout of the server: catalog database and working directories.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
    #[serde(default = "default_releases_dir")]
    pub releases_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_busy_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub busy_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            build_dir: default_build_dir(),
            dist_dir: default_dist_dir(),
            releases_dir: default_releases_dir(),
            temp_dir: default_temp_dir(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

impl StorageConfig {
    /// Directory uploaded build inputs are written to.
    pub fn uploads_dir(&self) -> PathBuf {
        self.temp_dir.join("uploads")
    }

    /// Directory uploaded build inputs are extracted into.
    pub fn unzipped_dir(&self) -> PathBuf {
        self.temp_dir.join("unzipped")
    }

    /// Create every working directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.build_dir,
            &self.dist_dir,
            &self.releases_dir,
            &self.uploads_dir(),
            &self.unzipped_dir(),
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("unable to create directory {}", dir.display()))?;
        }
        if let Some(parent) = self.database.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("unable to create database directory {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}

/// External program invocation with `{placeholder}` argument templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            env: IndexMap::new(),
        }
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(anyhow!("build.{role}.program must not be empty"));
        }
        Ok(())
    }
}

/// Installer creation tool plus the file it is expected to produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallerConfig {
    pub command: ToolCommand,
    /// File name the tool writes into `{output_dir}`.
    pub produces: String,
    /// File name the installer is renamed to inside the release directory.
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_platform")]
    pub platform: OperatingSystem,
    /// Metadata key holding the release version.
    #[serde(default = "default_version_key")]
    pub version_key: String,
    /// Optional icon looked up at the root of an upload.
    #[serde(default = "default_icon_name")]
    pub icon_name: String,
    /// Preamble template replacing the built-in one for the language named
    /// by its file name (`capsule.py.tmpl`, `capsule.sh.tmpl`).
    #[serde(default)]
    pub capsule_template: Option<PathBuf>,
    /// Launcher binary shipped next to the capsule record.
    #[serde(default)]
    pub launcher_binary: Option<PathBuf>,
    /// Path from the capsule record's directory to the installation root.
    #[serde(default = "default_install_root")]
    pub install_root: String,
    /// Paths (relative to the capsule record's directory) staged before updating.
    #[serde(default)]
    pub runtime_paths: Vec<String>,
    #[serde(default = "default_bundler")]
    pub bundler: ToolCommand,
    #[serde(default = "default_installer")]
    pub installer: InstallerConfig,
    #[serde(default = "default_packer")]
    pub packer: ToolCommand,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            version_key: default_version_key(),
            icon_name: default_icon_name(),
            capsule_template: None,
            launcher_binary: None,
            install_root: default_install_root(),
            runtime_paths: Vec::new(),
            bundler: default_bundler(),
            installer: default_installer(),
            packer: default_packer(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version_key.trim().is_empty() {
            return Err(anyhow!("build.version_key must not be empty"));
        }
        self.bundler.validate("bundler")?;
        self.installer.command.validate("installer.command")?;
        self.packer.validate("packer")?;
        for (field, value) in [
            ("installer.produces", &self.installer.produces),
            ("installer.file_name", &self.installer.file_name),
        ] {
            if value.trim().is_empty() || value.contains('/') || value.contains('\\') {
                return Err(anyhow!(
                    "build.{field} must be a bare file name, got '{value}'"
                ));
            }
        }
        if let Some(template) = &self.capsule_template {
            if !template.is_file() {
                return Err(anyhow!(
                    "build.capsule_template {} does not exist",
                    template.display()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Updater program served at `GET /updater`.
    #[serde(default = "default_updater_binary")]
    pub binary: PathBuf,
    /// Per-platform overrides selected with `GET /updater?os=<platform>`.
    #[serde(default)]
    pub platform_binaries: IndexMap<OperatingSystem, PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            binary: default_updater_binary(),
            platform_binaries: IndexMap::new(),
        }
    }
}

impl UpdaterConfig {
    /// Resolve the updater program for a platform, falling back to the default.
    pub fn binary_for(&self, os: Option<OperatingSystem>) -> &Path {
        os.and_then(|os| self.platform_binaries.get(&os))
            .unwrap_or(&self.binary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
