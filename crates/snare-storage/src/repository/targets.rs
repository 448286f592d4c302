//! External platform targets repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use snare_core::{ExternalTarget, NewExternalTarget};

use super::{format_datetime, parse_datetime, parse_json};
use crate::error::Result;

const SELECT_COLUMNS: &str =
    "id, platform_id, codename, category, is_active, raw, updated_at, deactivated_at";

/// Repository for targets learned from the external feed.
pub struct ExternalTargetsRepo;

impl ExternalTargetsRepo {
    /// Insert or refresh a target by platform id, reactivating it.
    pub fn upsert(conn: &Connection, target: &NewExternalTarget, now: DateTime<Utc>) -> Result<i64> {
        let raw = serde_json::to_string(&target.raw)?;
        let now = format_datetime(&now);

        conn.execute(
            "INSERT INTO external_targets
                (platform_id, codename, category, is_active, raw, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)
             ON CONFLICT(platform_id) DO UPDATE SET
                codename = excluded.codename,
                category = excluded.category,
                raw = excluded.raw,
                is_active = 1,
                deactivated_at = NULL,
                updated_at = excluded.updated_at",
            params![target.platform_id, target.codename, target.category, raw, now],
        )?;

        // last_insert_rowid is not updated by the conflict branch.
        let id = conn.query_row(
            "SELECT id FROM external_targets WHERE platform_id = ?1",
            [&target.platform_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a target by platform id.
    pub fn get_by_platform_id(conn: &Connection, platform_id: &str) -> Result<Option<ExternalTarget>> {
        let sql = format!(
            "SELECT {} FROM external_targets WHERE platform_id = ?1",
            SELECT_COLUMNS
        );
        let target = conn.query_row(&sql, [platform_id], map_row).optional()?;
        Ok(target)
    }

    /// All targets, active first.
    pub fn get_all(conn: &Connection) -> Result<Vec<ExternalTarget>> {
        let sql = format!(
            "SELECT {} FROM external_targets ORDER BY is_active DESC, platform_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let targets = stmt
            .query_map([], map_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(targets)
    }

    /// Marks every active target not listed in `seen` as inactive.
    ///
    /// Already inactive targets are left untouched, so repeating the call with
    /// the same set changes nothing.
    pub fn deactivate_missing(
        conn: &Connection,
        seen: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<usize> {
        let mut sql = String::from(
            "UPDATE external_targets SET is_active = 0, deactivated_at = ?1 WHERE is_active = 1",
        );
        if !seen.is_empty() {
            let placeholders: Vec<String> = (0..seen.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND platform_id NOT IN ({})", placeholders.join(", ")));
        }

        let values = std::iter::once(format_datetime(&as_of)).chain(seen.iter().cloned());
        let changed = conn.execute(&sql, params_from_iter(values))?;
        Ok(changed)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ExternalTarget> {
    Ok(ExternalTarget {
        id: row.get(0)?,
        platform_id: row.get(1)?,
        codename: row.get(2)?,
        category: row.get(3)?,
        is_active: row.get(4)?,
        raw: parse_json(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
        deactivated_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
    })
}
