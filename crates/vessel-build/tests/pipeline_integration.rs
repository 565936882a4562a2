//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use vessel_build::{
    BuildError, BuildForm, BuildLayout, BuildPipeline, BuildRequest, BundleJob, InstallerJob,
    PackJob, Toolchain,
};
use vessel_catalog::{Catalog, CatalogError};
use vessel_common::{BuildConfig, OperatingSystem, ServerEndpoints};
use vessel_metrics::{new_registry, BuildMetrics};

/// Writes the outputs real tools would, and records what it was asked.
#[derive(Default)]
struct FakeToolchain {
    fail_bundle: bool,
    calls: AtomicUsize,
    pack_keys: parking_lot::Mutex<Vec<String>>,
    manifests: parking_lot::Mutex<Vec<serde_json::Value>>,
}

impl Toolchain for FakeToolchain {
    fn pack(&self, job: &PackJob<'_>) -> vessel_build::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pack_keys.lock().push(job.key.to_owned());
        fs::write(job.output, b"packed").unwrap();
        Ok(())
    }

    fn bundle(&self, job: &BundleJob<'_>) -> vessel_build::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = fs::read(job.manifest_path).unwrap();
        self.manifests.lock().push(serde_json::from_slice(&raw).unwrap());
        if self.fail_bundle {
            return Err(BuildError::ExternalToolFailure {
                tool: "bundler",
                status: "exit status: 1".into(),
                stderr: "boom".into(),
            });
        }
        let app = job.dist_dir.join(format!("{}.app", job.manifest.name));
        fs::create_dir_all(app.join("Contents/MacOS")).unwrap();
        fs::write(app.join("Contents/MacOS/run"), b"#!/bin/sh\n").unwrap();
        fs::write(app.join("Contents/Info.plist"), b"<plist/>").unwrap();
        Ok(())
    }

    fn create_installer(&self, job: &InstallerJob<'_>) -> vessel_build::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dmg = job.output_dir.join(format!("{} {}.dmg", job.name, job.version));
        fs::write(dmg, b"dmg").unwrap();
        Ok(())
    }
}

struct Fixture {
    root: TempDir,
    upload: PathBuf,
    layout: BuildLayout,
    catalog: Arc<Catalog>,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let upload = root.path().join("upload");
    fs::create_dir_all(upload.join("assets")).unwrap();
    fs::write(upload.join("main.py"), "print('demo')\n").unwrap();
    fs::write(upload.join("assets/logo.png"), "png").unwrap();
    fs::write(upload.join("data.db"), "secret").unwrap();
    let layout = BuildLayout {
        build_dir: root.path().join("build"),
        dist_dir: root.path().join("dist"),
        releases_dir: root.path().join("releases"),
    };
    Fixture {
        upload,
        layout,
        catalog: Arc::new(Catalog::in_memory().unwrap()),
        root,
    }
}

fn request(upload: &Path, version: &str) -> BuildRequest {
    let form = BuildForm {
        identifier: "demo".into(),
        name: "Demo".into(),
        password: "hunter2".into(),
        app: "main.py".into(),
        pakked: "data.db".into(),
        unpakked: "assets".into(),
        plist: format!(r#"{{"CFBundleShortVersionString": "{version}"}}"#),
    };
    BuildRequest::from_form(
        &form,
        upload,
        ServerEndpoints::parse("http://updates.test/").unwrap(),
        "pakkicon.icns",
    )
    .unwrap()
}

fn pipeline(fixture: &Fixture, toolchain: Arc<FakeToolchain>) -> BuildPipeline {
    BuildPipeline::new(
        fixture.catalog.clone(),
        toolchain,
        BuildConfig::default(),
        fixture.layout.clone(),
    )
    .unwrap()
}

#[test]
fn successful_build_registers_release_and_artifacts() {
    let fixture = fixture();
    let toolchain = Arc::new(FakeToolchain::default());
    let registry = new_registry();
    let metrics = BuildMetrics::new(&registry).unwrap();
    let pipeline = pipeline(&fixture, toolchain.clone()).with_metrics(metrics.clone());

    let outcome = pipeline.run(&request(&fixture.upload, "1.0.0")).unwrap();

    let installer = &outcome.installers[&OperatingSystem::Darwin];
    assert!(installer.ends_with("releases/demo/1.0.0/Demo.dmg"));
    assert!(installer.is_file());
    let dist = &outcome.record.paths[0].dist_path;
    assert!(dist.ends_with("Demo.zip"));

    let mut archive = zip::ZipArchive::new(fs::File::open(dist).unwrap()).unwrap();
    assert!(archive.by_name("Contents/MacOS/run").is_ok());

    let latest = fixture.catalog.get_latest("demo").unwrap();
    assert_eq!(latest.version.canonical(), "1.0.0");
    assert_eq!(
        toolchain.pack_keys.lock()[0],
        vessel_build::pack_key("hunter2")
    );

    let manifest = &toolchain.manifests.lock()[0];
    assert_eq!(manifest["version"], "1.0.0");
    let resources: Vec<String> = manifest["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_owned())
        .collect();
    assert!(resources.iter().any(|r| r.ends_with("assets")));
    assert!(resources.iter().any(|r| r.ends_with("resources.pakk")));
    assert!(resources.iter().any(|r| r.ends_with("capsule.json")));

    let entry = fs::read_to_string(fixture.upload.join("main.py")).unwrap();
    assert!(entry.starts_with("# >>> vessel update capsule >>>\ndef __vessel_capsule():"));
    assert!(entry.contains("env['VESSEL_PRODUCT'] = 'demo'"));
    assert!(entry.contains("env['VESSEL_VERSION'] = '1.0.0'"));
    assert!(entry.ends_with("print('demo')\n"));
    assert_eq!(metrics.failures("bundle"), 0);
}

#[test]
fn bundler_failure_registers_nothing() {
    let fixture = fixture();
    let toolchain = Arc::new(FakeToolchain {
        fail_bundle: true,
        ..FakeToolchain::default()
    });
    let registry = new_registry();
    let metrics = BuildMetrics::new(&registry).unwrap();
    let pipeline = pipeline(&fixture, toolchain).with_metrics(metrics.clone());

    let err = pipeline.run(&request(&fixture.upload, "2.0")).unwrap_err();
    assert!(matches!(err, BuildError::ExternalToolFailure { .. }));
    assert!(fixture.catalog.find_product("demo").unwrap().is_none());
    assert!(!fixture.layout.releases_dir.join("demo/2.0").exists());
    assert_eq!(metrics.failures("bundle"), 1);
}

#[test]
fn duplicate_version_is_rejected_before_tools_run() {
    let fixture = fixture();
    let toolchain = Arc::new(FakeToolchain::default());
    let pipeline = pipeline(&fixture, toolchain.clone());

    pipeline.run(&request(&fixture.upload, "1.0")).unwrap();
    let calls_after_first = toolchain.calls.load(Ordering::SeqCst);

    let err = pipeline.run(&request(&fixture.upload, "1.0.0")).unwrap_err();
    assert!(matches!(err, BuildError::DuplicateVersion { .. }));
    assert_eq!(toolchain.calls.load(Ordering::SeqCst), calls_after_first);
    assert!(fixture.layout.releases_dir.join("demo/1.0").is_dir());
    assert_eq!(fixture.catalog.list_releases("demo").unwrap().len(), 1);
}

#[test]
fn missing_installer_output_aborts() {
    struct NoInstaller(FakeToolchain);
    impl Toolchain for NoInstaller {
        fn pack(&self, job: &PackJob<'_>) -> vessel_build::Result<()> {
            self.0.pack(job)
        }
        fn bundle(&self, job: &BundleJob<'_>) -> vessel_build::Result<()> {
            self.0.bundle(job)
        }
        fn create_installer(&self, _job: &InstallerJob<'_>) -> vessel_build::Result<()> {
            Ok(())
        }
    }

    let fixture = fixture();
    let pipeline = BuildPipeline::new(
        fixture.catalog.clone(),
        Arc::new(NoInstaller(FakeToolchain::default())),
        BuildConfig::default(),
        fixture.layout.clone(),
    )
    .unwrap();
    let err = pipeline.run(&request(&fixture.upload, "3.0")).unwrap_err();
    assert!(matches!(err, BuildError::MissingArtifact { tool: "installer", .. }));
    assert!(fixture.catalog.find_product("demo").unwrap().is_none());
}

#[test]
fn unsafe_identifier_or_name_touches_nothing_on_disk() {
    let fixture = fixture();
    let victim = fixture.root.path().join("victim/1.0");
    fs::create_dir_all(&victim).unwrap();
    fs::write(victim.join("keep.txt"), "keep").unwrap();
    let absolute = fixture.root.path().join("absolute");
    fs::create_dir_all(&absolute).unwrap();
    fs::write(absolute.join("keep.txt"), "keep").unwrap();

    let toolchain = Arc::new(FakeToolchain::default());
    let pipeline = pipeline(&fixture, toolchain.clone());

    for identifier in ["../victim".to_owned(), absolute.display().to_string()] {
        let mut request = request(&fixture.upload, "1.0");
        request.identifier = identifier.clone();
        let err = pipeline.run(&request).unwrap_err();
        assert!(
            matches!(err, BuildError::Catalog(CatalogError::InvalidIdentifier(_))),
            "{identifier}: {err}"
        );
    }

    let mut request = request(&fixture.upload, "1.0");
    request.name = "a/b".into();
    let err = pipeline.run(&request).unwrap_err();
    assert!(matches!(err, BuildError::Catalog(CatalogError::InvalidName(_))));

    assert!(victim.join("keep.txt").is_file());
    assert!(absolute.join("keep.txt").is_file());
    assert_eq!(toolchain.calls.load(Ordering::SeqCst), 0);
    assert!(!fixture.layout.build_dir.exists());
    assert!(!fixture.layout.dist_dir.exists());
    assert!(!fixture.layout.releases_dir.exists());
    assert_eq!(
        fs::read_to_string(fixture.upload.join("main.py")).unwrap(),
        "print('demo')\n"
    );
}
