//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use vessel_capsule::{
    CapsuleClient, CapsuleConfig, ContinueReason, StartupCheck, StartupOutcome, UpdateDecision,
};
use vessel_common::{OperatingSystem, ServerEndpoints};

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn record(addr: SocketAddr, product: &str, version: &str) -> CapsuleConfig {
    let mut config = CapsuleConfig::new(
        ServerEndpoints::parse(&format!("http://{addr}/")).unwrap(),
        product,
        version,
        OperatingSystem::Darwin,
    );
    config.timeout = Duration::from_secs(2);
    config
}

fn latest_router(version: &'static str) -> Router {
    Router::new().route(
        "/product/:identifier/latest/version",
        get(move || async move { version }),
    )
}

#[tokio::test]
async fn newer_remote_version_is_available() {
    let addr = serve(latest_router("1.0.0")).await;
    let client = CapsuleClient::new(record(addr, "demo", "0.9.0")).unwrap();
    let decision = client.check().await.unwrap();
    assert!(decision.update_available());
    assert_eq!(decision.latest().canonical(), "1.0.0");
}

#[tokio::test]
async fn equal_or_older_remote_is_up_to_date() {
    let addr = serve(latest_router("1.0")).await;
    for local in ["1.0.0", "1.0.1"] {
        let client = CapsuleClient::new(record(addr, "demo", local)).unwrap();
        assert!(matches!(
            client.check().await.unwrap(),
            UpdateDecision::UpToDate { .. }
        ));
    }
}

#[tokio::test]
async fn foreign_platform_skips_without_network() {
    let config = record("127.0.0.1:9".parse().unwrap(), "demo", "0.1");
    let check = StartupCheck::new(config, ".")
        .unwrap()
        .with_host_platform(Some(OperatingSystem::Windows));
    assert_eq!(
        check.run(1).await,
        StartupOutcome::Continue(ContinueReason::ForeignPlatform)
    );
}

#[tokio::test]
async fn failures_fail_open() {
    let addr = serve(Router::new().route(
        "/product/:identifier/latest/version",
        get(|| async { (StatusCode::NOT_FOUND, "missing") }),
    ))
    .await;
    let check = StartupCheck::new(record(addr, "demo", "0.1"), ".")
        .unwrap()
        .with_host_platform(Some(OperatingSystem::Darwin));
    assert_eq!(
        check.run(1).await,
        StartupOutcome::Continue(ContinueReason::CheckFailed)
    );

    let malformed = serve(latest_router("1.x")).await;
    let check = StartupCheck::new(record(malformed, "demo", "0.1"), ".")
        .unwrap()
        .with_host_platform(Some(OperatingSystem::Darwin));
    assert_eq!(
        check.run(1).await,
        StartupOutcome::Continue(ContinueReason::CheckFailed)
    );

    let unreachable = record("127.0.0.1:9".parse().unwrap(), "demo", "0.1");
    let check = StartupCheck::new(unreachable, ".")
        .unwrap()
        .with_host_platform(Some(OperatingSystem::Darwin));
    assert_eq!(
        check.run(1).await,
        StartupOutcome::Continue(ContinueReason::CheckFailed)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn update_available_spawns_updater_with_arguments() {
    const SCRIPT: &str = "#!/bin/sh\necho \"$@\" > invoked.txt\n";
    let router = latest_router("2.0").route("/updater", get(|| async { SCRIPT }));
    let addr = serve(router).await;

    let install = tempfile::tempdir().unwrap();
    let record_dir = install.path().join("Demo.app/Contents/Resources");
    std::fs::create_dir_all(record_dir.join("lib")).unwrap();
    std::fs::write(record_dir.join("lib/runtime.txt"), "rt").unwrap();

    let product = format!("capsule-test-{}", std::process::id());
    let mut config = record(addr, &product, "1.0");
    config.runtime_paths = vec!["lib".into()];

    let check = StartupCheck::new(config, &record_dir)
        .unwrap()
        .with_host_platform(Some(OperatingSystem::Darwin));
    let outcome = check.run(31337).await;
    let StartupOutcome::UpdateStarted { latest, .. } = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(latest.canonical(), "2.0");

    let scratch = vessel_capsule::stage::scratch_dir(&product);
    assert!(scratch.join("lib/runtime.txt").is_file());

    let marker = scratch.join("invoked.txt");
    let mut args = String::new();
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(&marker) {
            if !contents.is_empty() {
                args = contents;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(args.contains(&format!("--product {product}")), "args: {args}");
    assert!(args.contains("--pid 31337"), "args: {args}");
    assert!(args.contains("Demo.app"), "args: {args}");
    let _ = std::fs::remove_dir_all(scratch);
}
