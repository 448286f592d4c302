//! Global exclusion rules repository.

use rusqlite::{params, Connection};

use snare_core::{ExclusionRuleType, ProxyExclusionRule};

use crate::error::Result;

/// Repository for global capture exclusion rules.
pub struct ExclusionRulesRepo;

impl ExclusionRulesRepo {
    /// Insert a rule, returning its ID.
    pub fn insert(conn: &Connection, rule: &ProxyExclusionRule) -> Result<i64> {
        conn.execute(
            "INSERT INTO proxy_exclusion_rules (rule_type, pattern, enabled, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rule.rule_type.as_str(),
                rule.pattern,
                rule.enabled,
                rule.description,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Every rule, enabled or not.
    pub fn get_all(conn: &Connection) -> Result<Vec<ProxyExclusionRule>> {
        let mut stmt = conn.prepare(
            "SELECT id, rule_type, pattern, enabled, description
             FROM proxy_exclusion_rules ORDER BY id",
        )?;

        let rules = stmt
            .query_map([], |row| {
                let rule_type: String = row.get(1)?;
                let Some(rule_type) = ExclusionRuleType::parse(&rule_type) else {
                    tracing::warn!("Skipping exclusion rule with unknown type '{}'", rule_type);
                    return Ok(None);
                };
                Ok(Some(ProxyExclusionRule {
                    id: row.get(0)?,
                    rule_type,
                    pattern: row.get(2)?,
                    enabled: row.get(3)?,
                    description: row.get(4)?,
                }))
            })?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();

        Ok(rules)
    }

    /// Enable or disable a rule.
    pub fn set_enabled(conn: &Connection, id: i64, enabled: bool) -> Result<()> {
        conn.execute(
            "UPDATE proxy_exclusion_rules SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(())
    }
}
