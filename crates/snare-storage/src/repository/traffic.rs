//! Traffic log repository.

use rusqlite::{params, Connection, Row};

use snare_core::{HttpTrafficLogEntry, LogSource};

use super::{format_datetime, parse_datetime};
use crate::error::Result;
use crate::models::StoredTrafficLog;

const SELECT_COLUMNS: &str = "id, target_id, timestamp, request_method, request_url,
    request_protocol, request_headers, request_body, response_status, response_reason,
    response_protocol, response_headers, response_body, response_content_type, response_size,
    duration_ms, client_addr, is_https, is_page_candidate, notes, log_source,
    recording_session_id";

/// Repository for captured exchanges.
pub struct TrafficRepo;

impl TrafficRepo {
    /// Insert one exchange.
    pub fn insert(conn: &Connection, entry: &HttpTrafficLogEntry) -> Result<i64> {
        conn.execute(
            "INSERT INTO traffic_log (
                target_id, timestamp, request_method, request_url, request_protocol,
                request_headers, request_body, response_status, response_reason,
                response_protocol, response_headers, response_body, response_content_type,
                response_size, duration_ms, client_addr, is_https, is_page_candidate, notes,
                log_source, recording_session_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21)",
            params![
                entry.target_id,
                format_datetime(&entry.timestamp),
                entry.request_method,
                entry.request_url,
                entry.request_protocol,
                entry.request_headers,
                entry.request_body,
                entry.response_status,
                entry.response_reason,
                entry.response_protocol,
                entry.response_headers,
                entry.response_body,
                entry.response_content_type,
                entry.response_size,
                entry.duration_ms,
                entry.client_addr,
                entry.is_https,
                entry.is_page_candidate,
                entry.notes,
                entry.log_source.as_str(),
                entry.recording_session_id,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get an exchange by ID.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<StoredTrafficLog>> {
        let sql = format!("SELECT {} FROM traffic_log WHERE id = ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let entry = stmt.query_row([id], map_row).ok();
        Ok(entry)
    }

    /// Most recent exchanges, newest first.
    pub fn get_recent(conn: &Connection, limit: i64) -> Result<Vec<StoredTrafficLog>> {
        let sql = format!(
            "SELECT {} FROM traffic_log ORDER BY id DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([limit], map_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Count all exchanges.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM traffic_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredTrafficLog> {
    Ok(StoredTrafficLog {
        id: row.get(0)?,
        entry: HttpTrafficLogEntry {
            target_id: row.get(1)?,
            timestamp: parse_datetime(&row.get::<_, String>(2)?),
            request_method: row.get(3)?,
            request_url: row.get(4)?,
            request_protocol: row.get(5)?,
            request_headers: row.get(6)?,
            request_body: row.get::<_, Option<Vec<u8>>>(7)?.unwrap_or_default(),
            response_status: row.get(8)?,
            response_reason: row.get(9)?,
            response_protocol: row.get(10)?,
            response_headers: row.get(11)?,
            response_body: row.get::<_, Option<Vec<u8>>>(12)?.unwrap_or_default(),
            response_content_type: row.get(13)?,
            response_size: row.get(14)?,
            duration_ms: row.get(15)?,
            client_addr: row.get(16)?,
            is_https: row.get(17)?,
            is_page_candidate: row.get(18)?,
            notes: row.get(19)?,
            log_source: LogSource::parse(&row.get::<_, String>(20)?).unwrap_or_default(),
            recording_session_id: row.get(21)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use chrono::{TimeZone, Utc};

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample() -> HttpTrafficLogEntry {
        HttpTrafficLogEntry {
            target_id: Some(4),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            request_method: "POST".into(),
            request_url: "https://api.example.com/login".into(),
            request_protocol: "HTTP/1.1".into(),
            request_headers: r#"{"content-type":["application/json"]}"#.into(),
            request_body: b"{\"u\":\"a\"}".to_vec(),
            response_status: Some(200),
            response_reason: Some("OK".into()),
            response_protocol: Some("HTTP/1.1".into()),
            response_headers: Some("{}".into()),
            response_body: vec![0, 159, 146, 150],
            response_content_type: Some("application/octet-stream".into()),
            response_size: 4,
            duration_ms: 37,
            client_addr: "127.0.0.1:50000".into(),
            is_https: true,
            is_page_candidate: false,
            notes: None,
            log_source: LogSource::Recorder,
            recording_session_id: Some(9),
        }
    }

    #[test]
    fn insert_and_read_back() {
        let conn = setup_db();
        let entry = sample();

        let id = TrafficRepo::insert(&conn, &entry).unwrap();
        let stored = TrafficRepo::get_by_id(&conn, id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.entry, entry);
    }

    #[test]
    fn abandoned_exchange_keeps_empty_response() {
        let conn = setup_db();
        let entry = HttpTrafficLogEntry {
            request_method: "GET".into(),
            request_url: "http://down.test/".into(),
            ..Default::default()
        };

        let id = TrafficRepo::insert(&conn, &entry).unwrap();
        let stored = TrafficRepo::get_by_id(&conn, id).unwrap().unwrap();

        assert!(!stored.entry.has_response());
        assert!(stored.entry.response_body.is_empty());
        assert_eq!(stored.entry.target_id, None);
    }

    #[test]
    fn recent_and_by_target() {
        let conn = setup_db();
        TrafficRepo::insert(&conn, &sample()).unwrap();
        TrafficRepo::insert(
            &conn,
            &HttpTrafficLogEntry {
                target_id: None,
                ..sample()
            },
        )
        .unwrap();

        assert_eq!(TrafficRepo::count(&conn).unwrap(), 2);
        assert_eq!(TrafficRepo::get_recent(&conn, 10).unwrap().len(), 2);
        let recent = TrafficRepo::get_recent(&conn, 10).unwrap();
        assert_eq!(recent.iter().filter(|t| t.entry.target_id == Some(4)).count(), 1);
    }

    #[test]
    fn get_nonexistent() {
        let conn = setup_db();
        assert!(TrafficRepo::get_by_id(&conn, 999).unwrap().is_none());
    }
}
