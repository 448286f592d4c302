//! Feed ingestion pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hyper::body::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use snare_core::{CategoryCounts, JsonPath, NewExternalTarget, NewFinding, TrafficStore};

use super::client::AnalyticsClient;
use super::rate_limit::RateLimiter;
use super::FeedConfig;
use crate::error::IngestError;

/// Counters for one ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Targets upserted.
    pub upserted: usize,
    /// Targets skipped because of an error.
    pub skipped: usize,
    /// Analytics documents fetched.
    pub fetched: usize,
    /// Findings upserted.
    pub findings: usize,
    /// Targets deactivated.
    pub deactivated: usize,
}

/// Parses feed documents and keeps external targets, analytics and findings
/// in the store up to date.
///
/// Safe to run concurrently: a target whose analytics are already being
/// fetched by another run is skipped.
pub struct FeedIngester {
    config: FeedConfig,
    store: Arc<dyn TrafficStore>,
    client: Arc<dyn AnalyticsClient>,
    limiter: Arc<RateLimiter>,
    target_path: Option<JsonPath>,
    group_path: Option<JsonPath>,
    in_flight: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for FeedIngester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedIngester")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

/// Removes a platform id from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        set.lock().insert(key.to_string()).then(|| Self {
            set,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

impl FeedIngester {
    /// Creates an ingester. Unparseable paths are logged here, once.
    pub fn new(
        config: FeedConfig,
        store: Arc<dyn TrafficStore>,
        client: Arc<dyn AnalyticsClient>,
        limiter: Arc<RateLimiter>,
        shutdown: CancellationToken,
    ) -> Self {
        let target_path = parse_path(&config.target_path, "feed target");
        let group_path = parse_path(&config.group_path, "analytics group");
        Self {
            config,
            store,
            client,
            limiter,
            target_path,
            group_path,
            in_flight: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Ingestion settings.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Runs [`ingest`](Self::ingest) on a spawned task.
    pub fn spawn_ingest(
        self: &Arc<Self>,
        body: Bytes,
        bearer: Option<String>,
    ) -> tokio::task::JoinHandle<()> {
        let ingester = Arc::clone(self);
        tokio::spawn(async move {
            match ingester.ingest(&body, bearer.as_deref()).await {
                Ok(summary) => tracing::info!(
                    "Feed ingested: {} targets, {} skipped, {} analytics fetched, {} findings, {} deactivated",
                    summary.upserted,
                    summary.skipped,
                    summary.fetched,
                    summary.findings,
                    summary.deactivated
                ),
                Err(IngestError::Cancelled) => tracing::info!("Feed ingestion cancelled"),
                Err(e) => tracing::error!("Feed ingestion aborted: {}", e),
            }
        })
    }

    /// Ingests one feed document.
    ///
    /// Per-target failures are logged and skipped. Fails only when the body
    /// holds no target array, or with [`IngestError::Cancelled`] on shutdown.
    pub async fn ingest(&self, body: &[u8], bearer: Option<&str>) -> Result<IngestSummary, IngestError> {
        let doc: Value = serde_json::from_slice(body)?;
        let targets = self.extract_targets(&doc)?;

        let mut summary = IngestSummary::default();
        let mut seen = Vec::with_capacity(targets.len());

        for target in targets {
            if self.shutdown.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let platform_id = match self.platform_id(target) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping feed entry: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };
            seen.push(platform_id.clone());

            let record = self.target_record(&platform_id, target);
            let row_id = match self.store.upsert_external_target(&record) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Failed to upsert target {}: {}", platform_id, e);
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.upserted += 1;

            if !self.config.analytics_enabled() {
                continue;
            }
            match self.fetch_analytics(row_id, &platform_id, bearer).await {
                Ok(Some(findings)) => {
                    summary.fetched += 1;
                    summary.findings += findings;
                }
                Ok(None) => {}
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e) => tracing::warn!("Analytics for target {} failed: {}", platform_id, e),
            }
        }

        if seen.is_empty() {
            tracing::warn!("Feed held no valid targets; skipping deactivation");
        } else {
            match self.store.deactivate_missing_targets(&seen, Utc::now()) {
                Ok(n) => summary.deactivated = n,
                Err(e) => tracing::warn!("Failed to deactivate missing targets: {}", e),
            }
        }

        Ok(summary)
    }

    /// The target array, falling back to the whole document when it is an
    /// array itself.
    fn extract_targets<'a>(&self, doc: &'a Value) -> Result<&'a Vec<Value>, IngestError> {
        if let Some(targets) = self
            .target_path
            .as_ref()
            .and_then(|path| path.select(doc))
            .and_then(Value::as_array)
        {
            return Ok(targets);
        }
        doc.as_array()
            .ok_or_else(|| IngestError::NoTargets(self.config.target_path.clone()))
    }

    fn platform_id(&self, target: &Value) -> Result<String, IngestError> {
        let id = match target {
            Value::Object(map) => map.get(&self.config.id_field).and_then(scalar_string),
            other => scalar_string(other),
        };
        id.ok_or_else(|| IngestError::MissingId(self.config.id_field.clone()))
    }

    fn target_record(&self, platform_id: &str, target: &Value) -> NewExternalTarget {
        let field = |name: &str| target.get(name).and_then(scalar_string);
        NewExternalTarget {
            platform_id: platform_id.to_string(),
            codename: field(&self.config.codename_field),
            category: field(&self.config.category_field),
            raw: target.clone(),
        }
    }

    /// Fetches and stores analytics for one target. Returns the number of
    /// findings stored, or `None` when the target was skipped.
    async fn fetch_analytics(
        &self,
        row_id: i64,
        platform_id: &str,
        bearer: Option<&str>,
    ) -> Result<Option<usize>, IngestError> {
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, platform_id) else {
            tracing::debug!("Analytics for {} already in flight", platform_id);
            return Ok(None);
        };
        if self.store.get_analytics_fetch_marker(row_id)?.is_some() {
            tracing::debug!("Analytics for {} already fetched", platform_id);
            return Ok(None);
        }
        let Some(template) = self.config.analytics_url.as_deref() else {
            return Ok(None);
        };

        if !self.limiter.acquire(&self.shutdown).await {
            return Err(IngestError::Cancelled);
        }

        let url = template.replace("{id}", platform_id);
        tracing::debug!("Fetching analytics for {} from {}", platform_id, url);
        let doc = tokio::select! {
            result = self.client.fetch(&url, bearer) => result?,
            _ = self.shutdown.cancelled() => return Err(IngestError::Cancelled),
        };

        let (counts, findings) = self.parse_analytics(row_id, &doc)?;
        let mut stored = 0;
        for finding in &findings {
            match self.store.upsert_finding(finding) {
                Ok(_) => stored += 1,
                Err(e) => tracing::warn!(
                    "Failed to store finding {} for {}: {}",
                    finding.vulnerability_url,
                    platform_id,
                    e
                ),
            }
        }
        self.store.store_analytics(row_id, &counts, Utc::now())?;

        Ok(Some(stored))
    }

    fn parse_analytics(
        &self,
        row_id: i64,
        doc: &Value,
    ) -> Result<(CategoryCounts, Vec<NewFinding>), IngestError> {
        let groups = self
            .group_path
            .as_ref()
            .and_then(|path| path.select(doc))
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::NoGroups(self.config.group_path.clone()))?;

        let mut counts = CategoryCounts::new();
        let mut findings = Vec::new();

        for group in groups {
            let group_category = group
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("uncategorized");
            let status = group.get("status").and_then(scalar_string);
            let Some(locations) = group.get("locations").and_then(Value::as_array) else {
                continue;
            };

            for location in locations {
                let category = location
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or(group_category);
                *counts.entry(category.to_string()).or_insert(0) += 1;

                if !self.config.extract_findings {
                    continue;
                }
                let Some(url) = location
                    .get("url")
                    .and_then(Value::as_str)
                    .filter(|u| !u.is_empty())
                else {
                    continue;
                };

                findings.push(NewFinding {
                    target_id: row_id,
                    finding_id: location.get("id").and_then(scalar_string),
                    category: group_category.to_string(),
                    status: status.clone(),
                    vulnerability_url: url.to_string(),
                    raw: location.clone(),
                    reported_at: location.get("created_at").and_then(epoch_seconds),
                });
            }
        }

        Ok((counts, findings))
    }
}

fn parse_path(expr: &str, what: &str) -> Option<JsonPath> {
    match JsonPath::parse(expr) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!("Invalid {} path: {}", what, e);
            None
        }
    }
}

/// Non-empty string or number as a string.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decodes a Unix-epoch-seconds timestamp given as a number or numeric string.
fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    DateTime::from_timestamp(secs, 0)
}
