//! Database repositories for each table.

pub mod analytics;
pub mod exclusions;
pub mod findings;
pub mod scope_rules;
pub mod settings;
pub mod targets;
pub mod traffic;

pub use analytics::AnalyticsRepo;
pub use exclusions::ExclusionRulesRepo;
pub use findings::FindingsRepo;
pub use scope_rules::ScopeRulesRepo;
pub use settings::SettingsRepo;
pub use targets::ExternalTargetsRepo;
pub use traffic::TrafficRepo;

use chrono::{DateTime, Utc};

/// Timestamps are stored as RFC 3339 text.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses stored timestamps, accepting SQLite's `datetime('now')` format too.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

/// Parses stored JSON text, falling back to `null` for corrupt rows.
pub(crate) fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}
