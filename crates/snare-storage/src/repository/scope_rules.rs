//! Scope rules repository.

use rusqlite::{params, Connection, Row};

use snare_core::{ScopeItemType, ScopeRule};

use crate::error::Result;

/// Repository for per-target scope rules.
pub struct ScopeRulesRepo;

impl ScopeRulesRepo {
    /// Insert a rule, returning its ID.
    pub fn insert(conn: &Connection, rule: &ScopeRule) -> Result<i64> {
        conn.execute(
            "INSERT INTO scope_rules (target_id, item_type, pattern, is_in_scope, is_wildcard, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.target_id,
                rule.item_type.as_str(),
                rule.pattern,
                rule.is_in_scope,
                rule.is_wildcard,
                rule.description,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// All rules of one target. Rows with an unknown item type are skipped.
    pub fn get_for_target(conn: &Connection, target_id: i64) -> Result<Vec<ScopeRule>> {
        let mut stmt = conn.prepare(
            "SELECT id, target_id, item_type, pattern, is_in_scope, is_wildcard, description
             FROM scope_rules WHERE target_id = ?1 ORDER BY id",
        )?;

        let rules = stmt
            .query_map([target_id], map_row)?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();

        Ok(rules)
    }

    /// Delete a rule.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM scope_rules WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Option<ScopeRule>> {
    let item_type: String = row.get(2)?;
    let Some(item_type) = ScopeItemType::parse(&item_type) else {
        tracing::warn!("Skipping scope rule with unknown item type '{}'", item_type);
        return Ok(None);
    };

    Ok(Some(ScopeRule {
        id: row.get(0)?,
        target_id: row.get(1)?,
        item_type,
        pattern: row.get(3)?,
        is_in_scope: row.get(4)?,
        is_wildcard: row.get(5)?,
        description: row.get(6)?,
    }))
}
