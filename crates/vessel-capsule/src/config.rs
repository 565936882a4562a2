//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use vessel_common::{OperatingSystem, ServerEndpoints};

use crate::error::{CapsuleError, Result};

/// File name of the capsule record shipped next to the entry point.
pub const CAPSULE_FILE: &str = "capsule.json";

/// File name the launcher binary is shipped under.
pub const LAUNCHER_FILE: &str = "vessel-launch";

fn default_install_root() -> String {
    "../..".to_owned()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Structured record read by the launcher at application start.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleConfig {
    /// Release server the application was built by.
    pub server: ServerEndpoints,
    /// Product identifier.
    pub product: String,
    /// Version the application was built as.
    pub version: String,
    /// The only platform the capsule acts on.
    pub platform: OperatingSystem,
    /// Path from the record's directory to the installation root.
    #[serde(default = "default_install_root")]
    pub install_root: String,
    /// Program to start after an update, relative to the installation root.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Paths, relative to the record's directory, copied to the scratch
    /// directory before the updater starts.
    #[serde(default)]
    pub runtime_paths: Vec<String>,
    /// Bound on every HTTP request made by the capsule.
    #[serde(default = "default_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl CapsuleConfig {
    /// Minimal record for a product release.
    pub fn new(
        server: ServerEndpoints,
        product: impl Into<String>,
        version: impl Into<String>,
        platform: OperatingSystem,
    ) -> Self {
        Self {
            server,
            product: product.into(),
            version: version.into(),
            platform,
            install_root: default_install_root(),
            entry_point: None,
            runtime_paths: Vec::new(),
            timeout: default_timeout(),
        }
    }

    /// Read a record from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| CapsuleError::io_at("read", path, err))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the record as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|err| CapsuleError::io_at("write", path, err))
    }

    /// Installation root for a record living in `record_dir`.
    #[must_use]
    pub fn install_dir(&self, record_dir: &Path) -> PathBuf {
        let joined = record_dir.join(&self.install_root);
        joined.canonicalize().unwrap_or(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_apply() {
        let raw = r#"{
            "server": "http://127.0.0.1:8080",
            "product": "demo",
            "version": "1.0",
            "platform": "darwin"
        }"#;
        let config: CapsuleConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.install_root, "../..");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.server.base().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn save_and_load_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CAPSULE_FILE);
        let mut config = CapsuleConfig::new(
            ServerEndpoints::parse("https://updates.example.com/").unwrap(),
            "demo",
            "2.1",
            OperatingSystem::Linux,
        );
        config.runtime_paths = vec!["lib".into()];
        config.save(&path).unwrap();
        assert_eq!(CapsuleConfig::load(&path).unwrap(), config);
    }
}
