//! ---
//! vsl_section: "15-testing-qa-runbook"
//! vsl_subsection: "integration-tests"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "End-to-end release, check and self-update cycle."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vessel_api::{spawn_api_server, ApiServer, ApiState};
use vessel_build::{BuildPipeline, BundleJob, InstallerJob, PackJob, Toolchain};
use vessel_capsule::{CapsuleClient, CapsuleConfig, UpdateDecision};
use vessel_catalog::{Catalog, NewReleasePath};
use vessel_common::{
    BuildConfig, OperatingSystem, ServerEndpoints, StorageConfig, UpdaterConfig,
};
use vessel_update::{
    HttpFetcher, ParentProbe, Relauncher, UpdateRequest, Updater, UpdaterState, WaitPolicy,
};
use vessel_versioning::Version;

/// Releases here are registered directly, so the tools never run.
struct IdleToolchain;

impl Toolchain for IdleToolchain {
    fn pack(&self, _job: &PackJob<'_>) -> vessel_build::Result<()> {
        unreachable!("pack")
    }

    fn bundle(&self, _job: &BundleJob<'_>) -> vessel_build::Result<()> {
        unreachable!("bundle")
    }

    fn create_installer(&self, _job: &InstallerJob<'_>) -> vessel_build::Result<()> {
        unreachable!("installer")
    }
}

struct ExitedParent;

impl ParentProbe for ExitedParent {
    fn is_alive(&self, _pid: u32) -> io::Result<bool> {
        Ok(false)
    }
}

struct NoRelaunch;

impl Relauncher for NoRelaunch {
    fn relaunch(&self, _directory: &Path, _launch: Option<&str>) -> vessel_update::Result<Option<u32>> {
        Ok(None)
    }
}

struct Server {
    root: TempDir,
    catalog: Arc<Catalog>,
    api: ApiServer,
}

impl Server {
    fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            database: root.path().join("server.db"),
            build_dir: root.path().join("build"),
            dist_dir: root.path().join("dist"),
            releases_dir: root.path().join("releases"),
            temp_dir: root.path().join("temp"),
            busy_timeout: Duration::from_secs(5),
        };
        storage.ensure_dirs().unwrap();
        let catalog = Arc::new(Catalog::open(&storage.database, storage.busy_timeout).unwrap());
        let pipeline = BuildPipeline::new(
            catalog.clone(),
            Arc::new(IdleToolchain),
            BuildConfig::default(),
            (&storage).into(),
        )
        .unwrap();
        let state = ApiState::new(Arc::new(pipeline), &storage, UpdaterConfig::default());
        let api = spawn_api_server(Arc::new(state), "127.0.0.1:0".parse().unwrap()).unwrap();
        Self { root, catalog, api }
    }

    fn endpoints(&self) -> ServerEndpoints {
        ServerEndpoints::parse(&format!("http://{}/", self.api.addr())).unwrap()
    }

    fn publish(&self, version: &str) {
        let dir = self.root.path().join("releases/demo").join(version);
        fs::create_dir_all(&dir).unwrap();
        let dist = dir.join("Demo.zip");
        fs::write(&dist, bundle_bytes(version)).unwrap();
        self.catalog.ensure_product("demo", "Demo").unwrap();
        self.catalog
            .register_release(
                "demo",
                &Version::parse(version).unwrap(),
                &[NewReleasePath::new(
                    OperatingSystem::Darwin,
                    dir.join("Demo.dmg"),
                    dist,
                )],
            )
            .unwrap();
    }
}

fn bundle_bytes(version: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("Contents/Info.plist", options).unwrap();
    writer.write_all(version.as_bytes()).unwrap();
    writer.start_file("Contents/MacOS/run", options).unwrap();
    writer.write_all(b"#!/bin/sh\n").unwrap();
    writer.finish().unwrap().into_inner()
}

fn installed_app(root: &Path, version: &str) -> PathBuf {
    let app = root.join("Demo.app");
    fs::create_dir_all(app.join("Contents")).unwrap();
    fs::write(app.join("Contents/Info.plist"), version).unwrap();
    fs::write(app.join("Contents/stale.txt"), "old").unwrap();
    app
}

#[tokio::test]
async fn outdated_install_is_replaced_by_latest_release() {
    let server = Server::start();
    server.publish("1.0");
    server.publish("1.10");
    server.publish("1.9.9");

    let client = CapsuleClient::new(CapsuleConfig::new(
        server.endpoints(),
        "demo",
        "1.9.9",
        OperatingSystem::Darwin,
    ))
    .unwrap();
    let decision = client.check().await.unwrap();
    assert!(decision.update_available());
    assert_eq!(decision.latest(), &Version::parse("1.10").unwrap());

    let client_root = tempfile::tempdir().unwrap();
    let app = installed_app(client_root.path(), "1.9.9");
    let scratch = client_root.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();

    let updater = Updater::new(
        UpdateRequest {
            product: "demo".into(),
            pid: 999_999,
            directory: app.clone(),
            launch: None,
            platform: OperatingSystem::Darwin,
            scratch_dir: scratch,
            wait: WaitPolicy::default().with_timeout(Duration::from_secs(5)),
        },
        Arc::new(HttpFetcher::new(server.endpoints()).unwrap()),
    )
    .with_probe(Arc::new(ExitedParent))
    .with_relauncher(Arc::new(NoRelaunch));
    let report = updater.run().await.unwrap();

    assert_eq!(report.states.last(), Some(&UpdaterState::Done));
    assert!(report.replaced.replaced_existing);
    assert_eq!(
        fs::read_to_string(app.join("Contents/Info.plist")).unwrap(),
        "1.10"
    );
    assert!(!app.join("Contents/stale.txt").exists());
    assert!(app.join("Contents/MacOS/run").is_file());

    let updated = CapsuleClient::new(CapsuleConfig::new(
        server.endpoints(),
        "demo",
        "1.10.0",
        OperatingSystem::Darwin,
    ))
    .unwrap();
    assert!(matches!(
        updated.check().await.unwrap(),
        UpdateDecision::UpToDate { .. }
    ));
    server.api.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_product_is_a_check_failure() {
    let server = Server::start();
    let client = CapsuleClient::new(CapsuleConfig::new(
        server.endpoints(),
        "ghost",
        "1.0",
        OperatingSystem::Darwin,
    ))
    .unwrap();
    assert!(client.check().await.is_err());
    server.api.shutdown().await.unwrap();
}
