//! ---
//! vsl_section: "02-release-catalog"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Persistent catalog of products, releases and artifacts."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Versioned schema migrations recorded in `schema_version`.

use rusqlite::Connection;
use tracing::info;

pub(crate) const SCHEMA_VERSION: i64 = 2;

pub(crate) fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn record_version(conn: &Connection, version: i64) -> rusqlite::Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let current = current_version(conn)?;
    info!(
        schema_version = current,
        target = SCHEMA_VERSION,
        "catalog schema check"
    );
    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        info!("applying catalog migration 1: products, releases, release paths");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL
                    REFERENCES products(id) ON DELETE RESTRICT,
                version TEXT NOT NULL,
                normalized_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (product_id, normalized_version)
            );

            CREATE TABLE IF NOT EXISTS release_paths (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                release_id INTEGER NOT NULL
                    REFERENCES releases(id) ON DELETE CASCADE,
                operating_system TEXT NOT NULL
                    CHECK (operating_system IN ('darwin', 'windows', 'linux')),
                installer_path TEXT NOT NULL,
                dist_path TEXT NOT NULL,
                UNIQUE (release_id, operating_system)
            );
            "#,
        )?;
        record_version(conn, 1)?;
    }

    if current < 2 {
        info!("applying catalog migration 2: lookup indexes");
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_releases_product
                ON releases(product_id);
            CREATE INDEX IF NOT EXISTS idx_release_paths_release
                ON release_paths(release_id);
            "#,
        )?;
        record_version(conn, 2)?;
    }

    Ok(())
}
