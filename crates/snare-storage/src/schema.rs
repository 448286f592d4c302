//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        if current_version < 2 {
            migrate_v2(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: traffic log, rules and settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: traffic log and rules");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS traffic_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id INTEGER,
            timestamp TEXT NOT NULL,
            request_method TEXT NOT NULL,
            request_url TEXT NOT NULL,
            request_protocol TEXT NOT NULL DEFAULT '',
            request_headers TEXT NOT NULL DEFAULT '{}',
            request_body BLOB,
            response_status INTEGER,
            response_reason TEXT,
            response_protocol TEXT,
            response_headers TEXT,
            response_body BLOB,
            response_content_type TEXT,
            response_size INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            client_addr TEXT NOT NULL DEFAULT '',
            is_https INTEGER NOT NULL DEFAULT 0,
            is_page_candidate INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            log_source TEXT NOT NULL DEFAULT 'proxy',
            recording_session_id INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_traffic_log_target ON traffic_log (target_id, timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scope_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id INTEGER NOT NULL,
            item_type TEXT NOT NULL,
            pattern TEXT NOT NULL,
            is_in_scope INTEGER NOT NULL DEFAULT 1,
            is_wildcard INTEGER NOT NULL DEFAULT 0,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scope_rules_target ON scope_rules (target_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxy_exclusion_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_type TEXT NOT NULL,
            pattern TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Migration to version 2: external platform feed records.
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("Applying migration v2: external feed tables");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS external_targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id TEXT NOT NULL UNIQUE,
            codename TEXT,
            category TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            raw TEXT NOT NULL DEFAULT '{}',
            first_seen_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deactivated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS target_analytics (
            target_id INTEGER PRIMARY KEY REFERENCES external_targets(id) ON DELETE CASCADE,
            categories TEXT NOT NULL DEFAULT '{}',
            fetched_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS external_findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id INTEGER NOT NULL REFERENCES external_targets(id) ON DELETE CASCADE,
            finding_id TEXT,
            category TEXT NOT NULL,
            status TEXT,
            vulnerability_url TEXT NOT NULL,
            raw TEXT NOT NULL DEFAULT '{}',
            reported_at TEXT,
            UNIQUE (target_id, vulnerability_url)
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn v1_database_upgrades_to_v2() {
        let conn = Connection::open_in_memory().unwrap();
        get_schema_version(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM external_targets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }
}
