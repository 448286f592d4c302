//! High-level database interface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use tracing::info;

use snare_core::{
    CategoryCounts, ExternalTarget, Finding, HttpTrafficLogEntry, NewExternalTarget, NewFinding,
    ProxyExclusionRule, ScopeRule, TrafficStore,
};

use crate::error::{Result, StorageError};
use crate::models::StoredTrafficLog;
use crate::pool::ConnectionPool;
use crate::repository::{
    AnalyticsRepo, ExclusionRulesRepo, ExternalTargetsRepo, FindingsRepo, ScopeRulesRepo,
    SettingsRepo, TrafficRepo,
};

/// High-level database interface for Snare.
#[derive(Clone, Debug)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open the database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Open the database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "snare", "snare")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("snare.db"))
    }

    // === Traffic ===

    /// Persist one exchange.
    pub fn insert_traffic(&self, entry: &HttpTrafficLogEntry) -> Result<i64> {
        let conn = self.pool.get()?;
        TrafficRepo::insert(&conn, entry)
    }

    /// Get an exchange by ID.
    pub fn get_traffic(&self, id: i64) -> Result<Option<StoredTrafficLog>> {
        let conn = self.pool.get()?;
        TrafficRepo::get_by_id(&conn, id)
    }

    /// Most recent exchanges.
    pub fn get_recent_traffic(&self, limit: i64) -> Result<Vec<StoredTrafficLog>> {
        let conn = self.pool.get()?;
        TrafficRepo::get_recent(&conn, limit)
    }

    /// Count captured exchanges.
    pub fn count_traffic(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        TrafficRepo::count(&conn)
    }

    // === Rules ===

    /// Add a scope rule.
    pub fn add_scope_rule(&self, rule: &ScopeRule) -> Result<i64> {
        let conn = self.pool.get()?;
        ScopeRulesRepo::insert(&conn, rule)
    }

    /// Scope rules of a target.
    pub fn get_scope_rules(&self, target_id: i64) -> Result<Vec<ScopeRule>> {
        let conn = self.pool.get()?;
        ScopeRulesRepo::get_for_target(&conn, target_id)
    }

    /// Add a global exclusion rule.
    pub fn add_exclusion_rule(&self, rule: &ProxyExclusionRule) -> Result<i64> {
        let conn = self.pool.get()?;
        ExclusionRulesRepo::insert(&conn, rule)
    }

    /// All global exclusion rules.
    pub fn get_exclusion_rules(&self) -> Result<Vec<ProxyExclusionRule>> {
        let conn = self.pool.get()?;
        ExclusionRulesRepo::get_all(&conn)
    }

    // === Settings ===

    /// Read a setting.
    pub fn get_setting_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        SettingsRepo::get(&conn, key)
    }

    /// Write a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        SettingsRepo::set(&conn, key, value)
    }

    /// Persist the active research target.
    pub fn set_current_target(&self, target_id: Option<i64>) -> Result<()> {
        let conn = self.pool.get()?;
        match target_id {
            Some(id) => SettingsRepo::set(&conn, snare_core::CURRENT_TARGET_SETTING, &id.to_string()),
            None => SettingsRepo::delete(&conn, snare_core::CURRENT_TARGET_SETTING).map(|_| ()),
        }
    }

    // === External feed ===

    /// Get an external target by platform id.
    pub fn get_external_target(&self, platform_id: &str) -> Result<Option<ExternalTarget>> {
        let conn = self.pool.get()?;
        ExternalTargetsRepo::get_by_platform_id(&conn, platform_id)
    }

    /// All external targets.
    pub fn get_external_targets(&self) -> Result<Vec<ExternalTarget>> {
        let conn = self.pool.get()?;
        ExternalTargetsRepo::get_all(&conn)
    }

    /// Stored analytics counts of a target.
    pub fn get_analytics(&self, target_id: i64) -> Result<Option<CategoryCounts>> {
        let conn = self.pool.get()?;
        AnalyticsRepo::get_counts(&conn, target_id)
    }

    /// Findings of a target.
    pub fn get_findings(&self, target_id: i64) -> Result<Vec<Finding>> {
        let conn = self.pool.get()?;
        FindingsRepo::get_for_target(&conn, target_id)
    }
}

impl TrafficStore for Database {
    fn insert_traffic_log(&self, entry: &HttpTrafficLogEntry) -> snare_core::Result<i64> {
        Ok(self.insert_traffic(entry)?)
    }

    fn get_active_scope_rules(&self, target_id: i64) -> snare_core::Result<Vec<ScopeRule>> {
        Ok(self.get_scope_rules(target_id)?)
    }

    fn get_global_exclusion_rules(&self) -> snare_core::Result<Vec<ProxyExclusionRule>> {
        Ok(self.get_exclusion_rules()?)
    }

    fn get_setting(&self, key: &str) -> snare_core::Result<Option<String>> {
        Ok(self.get_setting_value(key)?)
    }

    fn upsert_external_target(&self, target: &NewExternalTarget) -> snare_core::Result<i64> {
        let conn = self.pool.get()?;
        Ok(ExternalTargetsRepo::upsert(&conn, target, Utc::now())?)
    }

    fn get_analytics_fetch_marker(
        &self,
        target_id: i64,
    ) -> snare_core::Result<Option<DateTime<Utc>>> {
        let conn = self.pool.get()?;
        Ok(AnalyticsRepo::get_marker(&conn, target_id)?)
    }

    fn store_analytics(
        &self,
        target_id: i64,
        counts: &CategoryCounts,
        fetched_at: DateTime<Utc>,
    ) -> snare_core::Result<()> {
        let conn = self.pool.get()?;
        Ok(AnalyticsRepo::store(&conn, target_id, counts, fetched_at)?)
    }

    fn upsert_finding(&self, finding: &NewFinding) -> snare_core::Result<i64> {
        let conn = self.pool.get()?;
        Ok(FindingsRepo::upsert(&conn, finding)?)
    }

    fn deactivate_missing_targets(
        &self,
        seen: &[String],
        as_of: DateTime<Utc>,
    ) -> snare_core::Result<usize> {
        let conn = self.pool.get()?;
        let changed = ExternalTargetsRepo::deactivate_missing(&conn, seen, as_of)?;
        if changed > 0 {
            info!("Deactivated {} external targets missing from the feed", changed);
        }
        Ok(changed)
    }
}
