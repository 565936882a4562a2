//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use vessel_common::OperatingSystem;
use vessel_versioning::Version;

use crate::error::{is_constraint_violation, CatalogError, Result};
use crate::model::{NewReleasePath, Product, Release, ReleasePath, ReleaseRecord};
use crate::schema;

const PRODUCT_COLUMNS: &str = "id, identifier, name, created_at";
const RELEASE_COLUMNS: &str = "r.id, r.product_id, p.identifier, r.version, r.created_at";
const PATH_COLUMNS: &str = "id, release_id, operating_system, installer_path, dist_path";

/// Handle to the release catalog.
///
/// Constructed once per process and shared behind an `Arc`. Access to the
/// connection is serialised; every multi-row write runs in one transaction.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    /// Open (or create) the catalog database at `path` and apply migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(busy_timeout)?;
        info!(database = %path.display(), "catalog opened");
        Self::from_connection(conn)
    }

    /// Private in-memory catalog, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a product. Fails with `DuplicateProduct` if the identifier is taken.
    pub fn create_product(&self, identifier: &str, name: &str) -> Result<Product> {
        validate_identifier(identifier)?;
        validate_name(name)?;
        let conn = self.conn.lock();
        if lookup_product(&conn, identifier)?.is_some() {
            return Err(CatalogError::DuplicateProduct(identifier.to_owned()));
        }
        let product = insert_product(&conn, identifier, name)?;
        info!(product = identifier, "product created");
        Ok(product)
    }

    /// Return the product, creating it on first sight.
    ///
    /// An existing product keeps its current name.
    pub fn ensure_product(&self, identifier: &str, name: &str) -> Result<Product> {
        validate_identifier(identifier)?;
        validate_name(name)?;
        let conn = self.conn.lock();
        if let Some(existing) = lookup_product(&conn, identifier)? {
            return Ok(existing);
        }
        let product = insert_product(&conn, identifier, name)?;
        info!(product = identifier, "product created on first release");
        Ok(product)
    }

    /// Look up a product by identifier.
    pub fn find_product(&self, identifier: &str) -> Result<Option<Product>> {
        let conn = self.conn.lock();
        lookup_product(&conn, identifier)
    }

    /// All products ordered by identifier.
    pub fn list_products(&self) -> Result<Vec<Product>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY identifier"
        ))?;
        let rows = stmt.query_map([], product_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Change the display name of a product.
    pub fn rename_product(&self, identifier: &str, name: &str) -> Result<Product> {
        validate_name(name)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE products SET name = ?1 WHERE identifier = ?2",
            params![name, identifier],
        )?;
        if changed == 0 {
            return Err(CatalogError::ProductNotFound(identifier.to_owned()));
        }
        lookup_product(&conn, identifier)?
            .ok_or_else(|| CatalogError::ProductNotFound(identifier.to_owned()))
    }

    /// Remove a product. Rejected while the product still has releases.
    pub fn delete_product(&self, identifier: &str) -> Result<()> {
        let conn = self.conn.lock();
        let product = lookup_product(&conn, identifier)?
            .ok_or_else(|| CatalogError::ProductNotFound(identifier.to_owned()))?;
        let releases: i64 = conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE product_id = ?1",
            [product.id],
            |row| row.get(0),
        )?;
        if releases > 0 {
            return Err(CatalogError::ProductHasReleases {
                identifier: identifier.to_owned(),
                releases,
            });
        }
        conn.execute("DELETE FROM products WHERE id = ?1", [product.id])?;
        info!(product = identifier, "product deleted");
        Ok(())
    }

    /// Register a release and its per-platform paths atomically.
    ///
    /// Fails with `DuplicateVersion` when a release of the product already
    /// has an equal normalized version (`1.0` and `1.0.0` collide).
    pub fn register_release(
        &self,
        identifier: &str,
        version: &Version,
        paths: &[NewReleasePath],
    ) -> Result<ReleaseRecord> {
        let mut seen = HashSet::new();
        for path in paths {
            if !seen.insert(path.operating_system) {
                return Err(CatalogError::DuplicatePlatform(path.operating_system));
            }
        }

        let duplicate = || CatalogError::DuplicateVersion {
            product: identifier.to_owned(),
            version: version.to_string(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let product = lookup_product(&tx, identifier)?
            .ok_or_else(|| CatalogError::ProductNotFound(identifier.to_owned()))?;

        let key = version.normalized_key();
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM releases WHERE product_id = ?1 AND normalized_version = ?2)",
            params![product.id, key],
            |row| row.get(0),
        )?;
        if exists {
            return Err(duplicate());
        }

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO releases (product_id, version, normalized_version, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![product.id, version.canonical(), key, created_at],
        )
        .map_err(|err| {
            if is_constraint_violation(&err) {
                duplicate()
            } else {
                CatalogError::Sqlite(err)
            }
        })?;
        let release_id = tx.last_insert_rowid();

        let mut written = Vec::with_capacity(paths.len());
        for path in paths {
            tx.execute(
                "INSERT INTO release_paths (release_id, operating_system, installer_path, dist_path)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    release_id,
                    path.operating_system.as_str(),
                    path_text(&path.installer_path),
                    path_text(&path.dist_path),
                ],
            )?;
            written.push(ReleasePath {
                id: tx.last_insert_rowid(),
                release_id,
                operating_system: path.operating_system,
                installer_path: path.installer_path.clone(),
                dist_path: path.dist_path.clone(),
            });
        }
        tx.commit()?;

        info!(
            product = identifier,
            version = %version,
            platforms = written.len(),
            "release registered"
        );
        Ok(ReleaseRecord {
            release: Release {
                id: release_id,
                product_id: product.id,
                product: product.identifier,
                version: version.clone(),
                created_at,
            },
            paths: written,
        })
    }

    /// Whether a release with an equal normalized version exists.
    pub fn release_exists(&self, identifier: &str, version: &Version) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM releases r JOIN products p ON p.id = r.product_id
                WHERE p.identifier = ?1 AND r.normalized_version = ?2)",
            params![identifier, version.normalized_key()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Releases of a product in ascending comparator order.
    pub fn list_releases(&self, identifier: &str) -> Result<Vec<Release>> {
        let conn = self.conn.lock();
        let product = lookup_product(&conn, identifier)?
            .ok_or_else(|| CatalogError::ProductNotFound(identifier.to_owned()))?;
        let mut releases = releases_of(&conn, product.id)?;
        releases.sort_by(|a, b| a.version.cmp(&b.version).then(a.id.cmp(&b.id)));
        Ok(releases)
    }

    /// The greatest release of a product under the version comparator.
    ///
    /// Equal versions resolve to the most recently registered release.
    pub fn get_latest(&self, identifier: &str) -> Result<Release> {
        let conn = self.conn.lock();
        let product = lookup_product(&conn, identifier)?
            .ok_or_else(|| CatalogError::ProductNotFound(identifier.to_owned()))?;
        let latest = releases_of(&conn, product.id)?
            .into_iter()
            .max_by(|a, b| a.version.cmp(&b.version).then(a.id.cmp(&b.id)))
            .ok_or_else(|| CatalogError::NoReleases(identifier.to_owned()))?;
        debug!(product = identifier, version = %latest.version, "latest release resolved");
        Ok(latest)
    }

    /// Artifacts of a release for one platform.
    pub fn get_path(&self, release: &Release, os: OperatingSystem) -> Result<ReleasePath> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {PATH_COLUMNS} FROM release_paths
                 WHERE release_id = ?1 AND operating_system = ?2"
            ),
            params![release.id, os.as_str()],
            path_from_row,
        )
        .optional()?
        .ok_or_else(|| CatalogError::PathNotFound {
            product: release.product.clone(),
            version: release.version.to_string(),
            os,
        })
    }

    /// Every platform path of a release.
    pub fn release_paths(&self, release: &Release) -> Result<Vec<ReleasePath>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATH_COLUMNS} FROM release_paths WHERE release_id = ?1 ORDER BY operating_system"
        ))?;
        let rows = stmt.query_map([release.id], path_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Latest release of a product together with its artifacts for `os`.
    pub fn latest_path(
        &self,
        identifier: &str,
        os: OperatingSystem,
    ) -> Result<(Release, ReleasePath)> {
        let release = self.get_latest(identifier)?;
        let path = self.get_path(&release, os)?;
        Ok((release, path))
    }
}

/// Check that `identifier` is a slug: ASCII letters, digits, `.`, `-` and
/// `_`, never `.` or `..` on its own.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let valid = !identifier.is_empty()
        && identifier != "."
        && identifier != ".."
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier(identifier.to_owned()))
    }
}

/// Check that a display name is non-blank and usable as a single path
/// component.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidName(name.to_owned()))
    }
}

fn insert_product(conn: &Connection, identifier: &str, name: &str) -> Result<Product> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO products (identifier, name, created_at) VALUES (?1, ?2, ?3)",
        params![identifier, name, created_at],
    )
    .map_err(|err| {
        if is_constraint_violation(&err) {
            CatalogError::DuplicateProduct(identifier.to_owned())
        } else {
            CatalogError::Sqlite(err)
        }
    })?;
    Ok(Product {
        id: conn.last_insert_rowid(),
        identifier: identifier.to_owned(),
        name: name.to_owned(),
        created_at,
    })
}

fn lookup_product(conn: &Connection, identifier: &str) -> Result<Option<Product>> {
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE identifier = ?1"),
            [identifier],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

fn releases_of(conn: &Connection, product_id: i64) -> Result<Vec<Release>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RELEASE_COLUMNS} FROM releases r
         JOIN products p ON p.id = r.product_id
         WHERE r.product_id = ?1 ORDER BY r.id"
    ))?;
    let rows = stmt.query_map([product_id], release_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        identifier: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<Release> {
    let raw: String = row.get(3)?;
    let version = Version::parse(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?;
    Ok(Release {
        id: row.get(0)?,
        product_id: row.get(1)?,
        product: row.get(2)?,
        version,
        created_at: row.get(4)?,
    })
}

fn path_from_row(row: &Row<'_>) -> rusqlite::Result<ReleasePath> {
    let raw: String = row.get(2)?;
    let operating_system = OperatingSystem::parse(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(err)))?;
    Ok(ReleasePath {
        id: row.get(0)?,
        release_id: row.get(1)?,
        operating_system,
        installer_path: PathBuf::from(row.get::<_, String>(3)?),
        dist_path: PathBuf::from(row.get::<_, String>(4)?),
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: &str) -> Version {
        Version::parse(raw).unwrap()
    }

    fn darwin(version: &str) -> Vec<NewReleasePath> {
        vec![NewReleasePath::new(
            OperatingSystem::Darwin,
            format!("releases/demo/{version}/Demo.dmg"),
            format!("releases/demo/{version}/Demo.zip"),
        )]
    }

    #[test]
    fn create_product_rejects_duplicates() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        let err = catalog.create_product("demo", "Other").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateProduct(id) if id == "demo"));
    }

    #[test]
    fn identifiers_must_be_slugs() {
        let catalog = Catalog::in_memory().unwrap();
        for bad in ["", "..", "a/b", "with space"] {
            assert!(matches!(
                catalog.create_product(bad, "Name"),
                Err(CatalogError::InvalidIdentifier(_))
            ));
        }
        assert!(matches!(
            catalog.create_product("ok", "bad/name"),
            Err(CatalogError::InvalidName(_))
        ));
    }

    #[test]
    fn ensure_product_keeps_existing_name() {
        let catalog = Catalog::in_memory().unwrap();
        let first = catalog.ensure_product("demo", "Demo").unwrap();
        let second = catalog.ensure_product("demo", "Renamed").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Demo");
    }

    #[test]
    fn equal_normalized_versions_are_duplicates() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        catalog
            .register_release("demo", &v("1.0.0"), &darwin("1.0.0"))
            .unwrap();
        let err = catalog
            .register_release("demo", &v("1.0"), &darwin("1.0"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateVersion { .. }));
        assert_eq!(catalog.list_releases("demo").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_platform_writes_nothing() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        let mut paths = darwin("1.0");
        paths.extend(darwin("1.0"));
        assert!(matches!(
            catalog.register_release("demo", &v("1.0"), &paths),
            Err(CatalogError::DuplicatePlatform(OperatingSystem::Darwin))
        ));
        assert!(!catalog.release_exists("demo", &v("1.0")).unwrap());
    }

    #[test]
    fn latest_uses_comparator_not_insertion_order() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        for version in ["1.2", "1.10", "0.9", "1.9.9"] {
            catalog
                .register_release("demo", &v(version), &darwin(version))
                .unwrap();
        }
        assert_eq!(catalog.get_latest("demo").unwrap().version.canonical(), "1.10");
    }

    #[test]
    fn latest_errors_distinguish_missing_product_and_releases() {
        let catalog = Catalog::in_memory().unwrap();
        assert!(matches!(
            catalog.get_latest("ghost"),
            Err(CatalogError::ProductNotFound(_))
        ));
        catalog.create_product("demo", "Demo").unwrap();
        assert!(matches!(
            catalog.get_latest("demo"),
            Err(CatalogError::NoReleases(_))
        ));
    }

    #[test]
    fn path_lookup_is_per_platform() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        let record = catalog
            .register_release("demo", &v("2.0"), &darwin("2.0"))
            .unwrap();
        let path = catalog
            .get_path(&record.release, OperatingSystem::Darwin)
            .unwrap();
        assert_eq!(path.dist_path, PathBuf::from("releases/demo/2.0/Demo.zip"));
        assert!(matches!(
            catalog.get_path(&record.release, OperatingSystem::Windows),
            Err(CatalogError::PathNotFound { os: OperatingSystem::Windows, .. })
        ));
        assert_eq!(record.path_for(OperatingSystem::Darwin), Some(&path));
    }

    #[test]
    fn delete_rejected_while_releases_exist() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.create_product("demo", "Demo").unwrap();
        catalog.create_product("empty", "Empty").unwrap();
        catalog
            .register_release("demo", &v("1"), &darwin("1"))
            .unwrap();
        assert!(matches!(
            catalog.delete_product("demo"),
            Err(CatalogError::ProductHasReleases { releases: 1, .. })
        ));
        catalog.delete_product("empty").unwrap();
        assert!(catalog.find_product("empty").unwrap().is_none());
        assert!(matches!(
            catalog.delete_product("empty"),
            Err(CatalogError::ProductNotFound(_))
        ));
    }

    #[test]
    fn rename_changes_only_the_name() {
        let catalog = Catalog::in_memory().unwrap();
        let created = catalog.create_product("demo", "Demo").unwrap();
        let renamed = catalog.rename_product("demo", "Demo Pro").unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.identifier, "demo");
        assert_eq!(renamed.name, "Demo Pro");
        assert!(matches!(
            catalog.rename_product("ghost", "x"),
            Err(CatalogError::ProductNotFound(_))
        ));
    }
}
