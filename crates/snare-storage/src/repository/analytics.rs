//! Per-target analytics repository.
//!
//! A row in `target_analytics` doubles as the fetch marker: once present, the
//! ingester never fetches analytics for that target again.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use snare_core::CategoryCounts;

use super::{format_datetime, parse_datetime};
use crate::error::Result;

/// Repository for stored analytics summaries.
pub struct AnalyticsRepo;

impl AnalyticsRepo {
    /// When analytics were fetched for a target, if ever.
    pub fn get_marker(conn: &Connection, target_id: i64) -> Result<Option<DateTime<Utc>>> {
        let fetched_at: Option<String> = conn
            .query_row(
                "SELECT fetched_at FROM target_analytics WHERE target_id = ?1",
                [target_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fetched_at.map(|s| parse_datetime(&s)))
    }

    /// Stores category counts and the fetch time.
    pub fn store(
        conn: &Connection,
        target_id: i64,
        counts: &CategoryCounts,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let categories = serde_json::to_string(counts)?;
        conn.execute(
            "INSERT INTO target_analytics (target_id, categories, fetched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(target_id) DO UPDATE SET categories = ?2, fetched_at = ?3",
            params![target_id, categories, format_datetime(&fetched_at)],
        )?;
        Ok(())
    }

    /// Stored category counts for a target.
    pub fn get_counts(conn: &Connection, target_id: i64) -> Result<Option<CategoryCounts>> {
        let categories: Option<String> = conn
            .query_row(
                "SELECT categories FROM target_analytics WHERE target_id = ?1",
                [target_id],
                |row| row.get(0),
            )
            .optional()?;

        match categories {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}
