//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};
use tracing::warn;
use vessel_capsule::{CapsuleConfig, CapsuleEmbedder};
use vessel_catalog::{
    validate_identifier, validate_name, Catalog, NewReleasePath, ReleaseRecord,
};
use vessel_common::{BuildConfig, OperatingSystem, StorageConfig};
use vessel_logging::{log_stage_event, vessel_debug, vessel_info, LogContext, StageOutcome};
use vessel_metrics::BuildMetrics;

use crate::archive::write_dist_archive;
use crate::error::{registration_error, BuildError, Result};
use crate::request::BuildRequest;
use crate::toolchain::{BundleJob, BundleManifest, InstallerJob, PackJob, TemplateVars, Toolchain};

/// File name of the packed resource artifact inside the build directory.
pub const PACKED_RESOURCE: &str = "resources.pakk";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Precheck,
    Pack,
    Embed,
    Bundle,
    Installer,
    Archive,
    Register,
}

/// Working directories written by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub build_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub releases_dir: PathBuf,
}

impl From<&StorageConfig> for BuildLayout {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            build_dir: storage.build_dir.clone(),
            dist_dir: storage.dist_dir.clone(),
            releases_dir: storage.releases_dir.clone(),
        }
    }
}

/// A registered release plus the installers to report back.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub record: ReleaseRecord,
    pub installers: IndexMap<OperatingSystem, PathBuf>,
}

/// Hex SHA-256 of the packing secret.
#[must_use]
pub fn pack_key(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Directory name the bundler produces for a product on `platform`.
#[must_use]
pub fn bundle_name(name: &str, platform: OperatingSystem) -> String {
    match platform {
        OperatingSystem::Darwin => format!("{name}.app"),
        OperatingSystem::Windows | OperatingSystem::Linux => name.to_owned(),
    }
}

/// Builds, archives and registers releases.
pub struct BuildPipeline {
    catalog: Arc<Catalog>,
    toolchain: Arc<dyn Toolchain>,
    config: BuildConfig,
    layout: BuildLayout,
    embedder: CapsuleEmbedder,
    metrics: Option<BuildMetrics>,
    in_flight: Mutex<HashSet<(String, String)>>,
}

impl std::fmt::Debug for BuildPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPipeline")
            .field("platform", &self.config.platform)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl BuildPipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        toolchain: Arc<dyn Toolchain>,
        config: BuildConfig,
        layout: BuildLayout,
    ) -> Result<Self> {
        let embedder = match &config.capsule_template {
            Some(path) => CapsuleEmbedder::from_template_file(path)?,
            None => CapsuleEmbedder::default(),
        }
        .with_launcher(config.launcher_binary.clone());
        Ok(Self {
            catalog,
            toolchain,
            config,
            layout,
            embedder,
            metrics: None,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: BuildMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run every stage for `request`. Nothing is registered unless all
    /// stages succeed; a partially written release directory is removed.
    pub fn run(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }

        let mut stage = Stage::Precheck;
        let mut release_dir = None;
        let result = self.run_stages(request, &mut stage, &mut release_dir);

        let platform = self.config.platform.as_str();
        let ctx = LogContext::new()
            .with_product(&request.identifier)
            .with_platform(platform)
            .with_stage(stage.as_ref());
        match &result {
            Ok(outcome) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_success(started.elapsed());
                }
                let version = outcome.record.release.version.to_string();
                log_stage_event(
                    Some(&ctx.clone().with_version(&version)),
                    "build.completed",
                    "release registered",
                    StageOutcome::Success,
                );
            }
            Err(err) => {
                if let Some(dir) = release_dir {
                    remove_quietly(&dir);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(stage.as_ref());
                }
                log_stage_event(
                    Some(&ctx),
                    "build.failed",
                    &err.to_string(),
                    StageOutcome::Failed,
                );
            }
        }
        result
    }

    fn run_stages(
        &self,
        request: &BuildRequest,
        stage: &mut Stage,
        created_release_dir: &mut Option<PathBuf>,
    ) -> Result<BuildOutcome> {
        // Both values become path components below.
        validate_identifier(&request.identifier)?;
        validate_name(&request.name)?;

        let platform = self.config.platform;
        let version = request.version(&self.config.version_key)?;
        let version_text = version.canonical();
        let duplicate = || BuildError::DuplicateVersion {
            product: request.identifier.clone(),
            version: version_text.clone(),
        };

        if self.catalog.release_exists(&request.identifier, &version)? {
            return Err(duplicate());
        }
        let _slot = InFlight::claim(
            &self.in_flight,
            (request.identifier.clone(), version.normalized_key()),
        )
        .ok_or_else(duplicate)?;

        let name = match self.catalog.find_product(&request.identifier)? {
            Some(product) => product.name,
            None => request.name.clone(),
        };
        let ctx = LogContext::new()
            .with_product(&request.identifier)
            .with_version(&version_text)
            .with_platform(platform.as_str());

        let build_dir = self.layout.build_dir.join(&request.identifier).join(&version_text);
        reset_dir(&build_dir)?;
        let mut resources = request.unpakked.clone();

        *stage = Stage::Pack;
        if !request.pakked.is_empty() {
            let password = request
                .password
                .as_deref()
                .ok_or(BuildError::MissingField("password"))?;
            let key = pack_key(password);
            let output = build_dir.join(PACKED_RESOURCE);
            self.toolchain.pack(&PackJob {
                key: &key,
                inputs: &request.pakked,
                output: &output,
            })?;
            require_artifact("packer", &output)?;
            vessel_debug!(context = ctx.clone().with_stage("pack"), "packed {} input(s)", request.pakked.len());
            resources.push(output);
        }

        *stage = Stage::Embed;
        let mut capsule = CapsuleConfig::new(
            request.server.clone(),
            request.identifier.clone(),
            version_text.clone(),
            platform,
        );
        capsule.install_root = self.config.install_root.clone();
        capsule.runtime_paths = self.config.runtime_paths.clone();
        let embedded = self.embedder.embed(&request.entry_point, &capsule)?;
        resources.extend(embedded.resources());

        *stage = Stage::Bundle;
        let dist_dir = self.layout.dist_dir.join(&request.identifier).join(&version_text);
        reset_dir(&dist_dir)?;
        let manifest = BundleManifest {
            identifier: request.identifier.clone(),
            name: name.clone(),
            version: version_text.clone(),
            platform,
            entry_point: request.entry_point.clone(),
            resources,
            icon: request.icon.clone(),
            metadata: request.metadata.clone(),
        };
        let manifest_path = build_dir.join("bundle.json");
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| BuildError::io_at("encode", &manifest_path, io::Error::from(err)))?;
        fs::write(&manifest_path, manifest_json)
            .map_err(|err| BuildError::io_at("write", &manifest_path, err))?;
        self.toolchain.bundle(&BundleJob {
            manifest: &manifest,
            manifest_path: &manifest_path,
            dist_dir: &dist_dir,
        })?;
        let bundle = dist_dir.join(bundle_name(&name, platform));
        require_artifact("bundler", &bundle)?;
        vessel_info!(context = ctx.clone().with_stage("bundle"), "bundle built at {}", bundle.display());

        *stage = Stage::Installer;
        let release_dir = self
            .layout
            .releases_dir
            .join(&request.identifier)
            .join(&version_text);
        reset_dir(&release_dir)?;
        *created_release_dir = Some(release_dir.clone());
        self.toolchain.create_installer(&InstallerJob {
            bundle: &bundle,
            output_dir: &release_dir,
            name: &name,
            version: &version_text,
        })?;
        let mut vars = TemplateVars::new();
        vars.set("name", &name);
        vars.set("version", &version_text);
        let produced = release_dir.join(vars.render(&self.config.installer.produces));
        let installer = release_dir.join(vars.render(&self.config.installer.file_name));
        require_artifact("installer", &produced)?;
        if produced != installer {
            fs::rename(&produced, &installer)
                .map_err(|err| BuildError::io_at("rename", &produced, err))?;
        }

        *stage = Stage::Archive;
        let dist_archive = release_dir.join(format!("{name}.zip"));
        let summary = write_dist_archive(&bundle, &dist_archive)?;
        vessel_debug!(
            context = ctx.clone().with_stage("archive"),
            "archived {} file(s), {} symlink(s)",
            summary.files,
            summary.symlinks
        );

        *stage = Stage::Register;
        self.catalog
            .ensure_product(&request.identifier, &request.name)
            .map_err(registration_error)?;
        let record = self
            .catalog
            .register_release(
                &request.identifier,
                &version,
                &[NewReleasePath::new(platform, installer.clone(), dist_archive)],
            )
            .map_err(registration_error)?;

        let mut installers = IndexMap::new();
        installers.insert(platform, installer);
        Ok(BuildOutcome { record, installers })
    }
}

/// Marks a (product, version) build as running until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<(String, String)>>,
    key: (String, String),
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<(String, String)>>, key: (String, String)) -> Option<Self> {
        if set.lock().insert(key.clone()) {
            Some(Self { set, key })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|err| BuildError::io_at("clear", dir, err))?;
    }
    fs::create_dir_all(dir).map_err(|err| BuildError::io_at("create", dir, err))
}

fn require_artifact(tool: &'static str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(BuildError::MissingArtifact {
            tool,
            path: path.to_path_buf(),
        })
    }
}

fn remove_quietly(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %err, "failed to remove release directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_key_is_hex_sha256() {
        assert_eq!(
            pack_key("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn bundle_names_follow_platform() {
        assert_eq!(bundle_name("Demo", OperatingSystem::Darwin), "Demo.app");
        assert_eq!(bundle_name("Demo", OperatingSystem::Linux), "Demo");
    }

    #[test]
    fn in_flight_claims_are_exclusive() {
        let set = Mutex::new(HashSet::new());
        let key = ("demo".to_owned(), "1".to_owned());
        let first = InFlight::claim(&set, key.clone()).unwrap();
        assert!(InFlight::claim(&set, key.clone()).is_none());
        drop(first);
        assert!(InFlight::claim(&set, key).is_some());
    }

    #[test]
    fn stages_have_lowercase_labels() {
        assert_eq!(Stage::Installer.as_ref(), "installer");
        assert_eq!(Stage::Precheck.to_string(), "precheck");
    }
}
