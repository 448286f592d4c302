//! External findings repository.

use rusqlite::{params, Connection};

use snare_core::{Finding, NewFinding};

use super::{format_datetime, parse_datetime, parse_json};
use crate::error::Result;

/// Repository for findings extracted from target analytics.
pub struct FindingsRepo;

impl FindingsRepo {
    /// Insert or refresh a finding keyed by (target, vulnerability URL).
    pub fn upsert(conn: &Connection, finding: &NewFinding) -> Result<i64> {
        let raw = serde_json::to_string(&finding.raw)?;
        conn.execute(
            "INSERT INTO external_findings
                (target_id, finding_id, category, status, vulnerability_url, raw, reported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(target_id, vulnerability_url) DO UPDATE SET
                finding_id = excluded.finding_id,
                category = excluded.category,
                status = excluded.status,
                raw = excluded.raw,
                reported_at = excluded.reported_at",
            params![
                finding.target_id,
                finding.finding_id,
                finding.category,
                finding.status,
                finding.vulnerability_url,
                raw,
                finding.reported_at.as_ref().map(format_datetime),
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM external_findings WHERE target_id = ?1 AND vulnerability_url = ?2",
            params![finding.target_id, finding.vulnerability_url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Findings of one target.
    pub fn get_for_target(conn: &Connection, target_id: i64) -> Result<Vec<Finding>> {
        let mut stmt = conn.prepare(
            "SELECT id, target_id, finding_id, category, status, vulnerability_url, raw, reported_at
             FROM external_findings WHERE target_id = ?1 ORDER BY id",
        )?;

        let findings = stmt
            .query_map([target_id], |row| {
                Ok(Finding {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    finding_id: row.get(2)?,
                    category: row.get(3)?,
                    status: row.get(4)?,
                    vulnerability_url: row.get(5)?,
                    raw: parse_json(&row.get::<_, String>(6)?),
                    reported_at: row
                        .get::<_, Option<String>>(7)?
                        .map(|s| parse_datetime(&s)),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(findings)
    }

    /// Count all findings.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM external_findings", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ExternalTargetsRepo;
    use crate::schema::run_migrations;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use snare_core::NewExternalTarget;

    fn setup_db() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let id = ExternalTargetsRepo::upsert(
            &conn,
            &NewExternalTarget {
                platform_id: "T1".into(),
                codename: None,
                category: None,
                raw: json!({}),
            },
            Utc::now(),
        )
        .unwrap();
        (conn, id)
    }

    fn finding(target_id: i64, url: &str, status: &str) -> NewFinding {
        NewFinding {
            target_id,
            finding_id: Some("f-1".into()),
            category: "XSS".into(),
            status: Some(status.into()),
            vulnerability_url: url.into(),
            raw: json!({ "url": url }),
            reported_at: DateTime::from_timestamp(1_700_000_000, 0),
        }
    }

    #[test]
    fn upsert_by_target_and_url() {
        let (conn, id) = setup_db();
        let a = FindingsRepo::upsert(&conn, &finding(id, "https://t.test/a", "new")).unwrap();
        let b = FindingsRepo::upsert(&conn, &finding(id, "https://t.test/a", "triaged")).unwrap();
        FindingsRepo::upsert(&conn, &finding(id, "https://t.test/b", "new")).unwrap();

        assert_eq!(a, b);
        assert_eq!(FindingsRepo::count(&conn).unwrap(), 2);

        let stored = FindingsRepo::get_for_target(&conn, id).unwrap();
        assert_eq!(stored[0].status.as_deref(), Some("triaged"));
        assert_eq!(stored[0].reported_at, DateTime::from_timestamp(1_700_000_000, 0));
    }
}
