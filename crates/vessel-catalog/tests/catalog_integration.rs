//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::tempdir;
use vessel_catalog::{Catalog, CatalogError, NewReleasePath};
use vessel_common::OperatingSystem;
use vessel_versioning::Version;

fn paths(version: &str) -> Vec<NewReleasePath> {
    vec![
        NewReleasePath::new(
            OperatingSystem::Darwin,
            format!("releases/app/{version}/App.dmg"),
            format!("releases/app/{version}/App.zip"),
        ),
        NewReleasePath::new(
            OperatingSystem::Linux,
            format!("releases/app/{version}/app.tar"),
            format!("releases/app/{version}/app-linux.zip"),
        ),
    ]
}

#[test]
fn catalog_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("server.db");
    {
        let catalog = Catalog::open(&db, Duration::from_secs(1)).unwrap();
        catalog.create_product("app", "App").unwrap();
        catalog
            .register_release("app", &Version::parse("1.4").unwrap(), &paths("1.4"))
            .unwrap();
    }

    let catalog = Catalog::open(&db, Duration::from_secs(1)).unwrap();
    let latest = catalog.get_latest("app").unwrap();
    assert_eq!(latest.version.to_string(), "1.4");
    let linux = catalog.get_path(&latest, OperatingSystem::Linux).unwrap();
    assert!(linux.dist_path.ends_with("app-linux.zip"));
    assert_eq!(catalog.release_paths(&latest).unwrap().len(), 2);
}

#[test]
fn shuffled_insertion_resolves_same_latest() {
    let versions = ["0.1", "1.0.0.1", "1.0", "0.10", "0.9.9"];
    let mut orders = vec![versions.to_vec()];
    let mut reversed = versions.to_vec();
    reversed.reverse();
    orders.push(reversed);
    orders.push(vec!["1.0", "0.9.9", "1.0.0.1", "0.1", "0.10"]);

    for order in orders {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("app", "App").unwrap();
        for version in &order {
            catalog
                .register_release("app", &Version::parse(version).unwrap(), &paths(version))
                .unwrap();
        }
        let latest = catalog.get_latest("app").unwrap();
        assert_eq!(latest.version.canonical(), "1.0.0.1", "order {order:?}");

        let listed: Vec<String> = catalog
            .list_releases("app")
            .unwrap()
            .into_iter()
            .map(|release| release.version.canonical())
            .collect();
        assert_eq!(listed, vec!["0.1", "0.9.9", "0.10", "1.0", "1.0.0.1"]);
    }
}

#[test]
fn concurrent_duplicate_registration_admits_one() {
    let catalog = Arc::new(Catalog::in_memory().unwrap());
    catalog.create_product("app", "App").unwrap();

    let handles: Vec<_> = ["2.0", "2.0.0", "2", "2.0.0.0"]
        .into_iter()
        .map(|raw| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                catalog.register_release("app", &Version::parse(raw).unwrap(), &paths(raw))
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => admitted += 1,
            Err(CatalogError::DuplicateVersion { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(catalog.list_releases("app").unwrap().len(), 1);
}

#[test]
fn unknown_product_registration_is_rejected() {
    let catalog = Catalog::in_memory().unwrap();
    let err = catalog
        .register_release("ghost", &Version::parse("1").unwrap(), &paths("1"))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn products_serialize_for_listing() {
    let catalog = Catalog::in_memory().unwrap();
    catalog.create_product("b-app", "B").unwrap();
    catalog.create_product("a-app", "A").unwrap();
    let listed = serde_json::to_value(catalog.list_products().unwrap()).unwrap();
    assert_eq!(listed[0]["identifier"], "a-app");
    assert_eq!(listed[1]["name"], "B");
}
