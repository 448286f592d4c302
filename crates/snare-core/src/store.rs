//! The storage collaborator used by the proxy.
//!
//! Implementations are expected to be cheap, synchronous and safe to share
//! between request tasks (the SQLite store serializes access behind a mutex).

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    CategoryCounts, HttpTrafficLogEntry, NewExternalTarget, NewFinding, ProxyExclusionRule,
    ScopeRule,
};

/// Setting key holding the persisted active research target.
pub const CURRENT_TARGET_SETTING: &str = "current_target_id";

/// Persistence operations the interception core depends on.
pub trait TrafficStore: Send + Sync {
    /// Persists one exchange, returning its row id.
    fn insert_traffic_log(&self, entry: &HttpTrafficLogEntry) -> Result<i64>;

    /// Scope rules of a research target.
    fn get_active_scope_rules(&self, target_id: i64) -> Result<Vec<ScopeRule>>;

    /// All global exclusion rules, enabled or not.
    fn get_global_exclusion_rules(&self) -> Result<Vec<ProxyExclusionRule>>;

    /// Reads a runtime setting.
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Upserts a target by platform id and marks it active. Returns the row id.
    fn upsert_external_target(&self, target: &NewExternalTarget) -> Result<i64>;

    /// When analytics for a target were last fetched, if ever.
    fn get_analytics_fetch_marker(&self, target_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Stores per-category counts and sets the fetch marker.
    fn store_analytics(
        &self,
        target_id: i64,
        counts: &CategoryCounts,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Upserts a finding by (target, vulnerability URL). Returns the row id.
    fn upsert_finding(&self, finding: &NewFinding) -> Result<i64>;

    /// Deactivates every active target whose platform id is not in `seen`.
    /// Returns how many targets changed state.
    fn deactivate_missing_targets(&self, seen: &[String], as_of: DateTime<Utc>) -> Result<usize>;

    /// Resolves the persisted active target from settings.
    fn current_target_id(&self) -> Result<Option<i64>> {
        Ok(self
            .get_setting(CURRENT_TARGET_SETTING)?
            .and_then(|v| v.trim().parse::<i64>().ok()))
    }
}
