//! External bug-bounty feed ingestion.
//!
//! When the proxy sees a 2xx JSON response from the configured feed endpoint,
//! the body is handed to [`FeedIngester`], which upserts the listed targets,
//! fetches per-target analytics through a shared [`RateLimiter`], and retires
//! targets that disappeared from the feed.

mod client;
mod ingester;
mod rate_limit;

pub use client::{AnalyticsClient, HttpAnalyticsClient, DEFAULT_REQUEST_TIMEOUT};
pub use ingester::{FeedIngester, IngestSummary};
pub use rate_limit::{RateLimiter, DEFAULT_RATE_INTERVAL};

use std::time::Duration;

use url::Url;

use crate::error::{ProxyError, Result};

/// Feed recognition and ingestion settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Feed endpoint URL. Recognition is disabled when unset.
    pub endpoint: Option<String>,
    /// Path to the target array inside the feed document.
    pub target_path: String,
    /// Field holding a target's platform id.
    pub id_field: String,
    /// Field holding a target's codename.
    pub codename_field: String,
    /// Field holding a target's category.
    pub category_field: String,
    /// Analytics URL template; `{id}` is replaced with the platform id.
    pub analytics_url: Option<String>,
    /// Path to the group array inside an analytics document.
    pub group_path: String,
    /// Whether to fetch per-target analytics.
    pub fetch_analytics: bool,
    /// Whether to extract findings from analytics.
    pub extract_findings: bool,
    /// Minimum time between analytics calls.
    pub rate_interval: Duration,
    /// Timeout for one analytics call.
    pub request_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            target_path: "data".to_string(),
            id_field: "id".to_string(),
            codename_field: "handle".to_string(),
            category_field: "category".to_string(),
            analytics_url: None,
            group_path: "groups".to_string(),
            fetch_analytics: true,
            extract_findings: true,
            rate_interval: DEFAULT_RATE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl FeedConfig {
    /// Sets the feed endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the target array path.
    pub fn with_target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = path.into();
        self
    }

    /// Sets the platform id field.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Sets the analytics URL template.
    pub fn with_analytics_url(mut self, template: impl Into<String>) -> Self {
        self.analytics_url = Some(template.into());
        self
    }

    /// Enables or disables analytics fetching.
    pub fn with_fetch_analytics(mut self, enabled: bool) -> Self {
        self.fetch_analytics = enabled;
        self
    }

    /// Enables or disables findings extraction.
    pub fn with_extract_findings(mut self, enabled: bool) -> Self {
        self.extract_findings = enabled;
        self
    }

    /// Sets the rate-limit interval.
    pub fn with_rate_interval(mut self, interval: Duration) -> Self {
        self.rate_interval = interval;
        self
    }

    /// Whether analytics calls will be made.
    pub fn analytics_enabled(&self) -> bool {
        self.fetch_analytics && self.analytics_url.is_some()
    }

    /// Parses the configured endpoint, if any.
    pub fn parsed_endpoint(&self) -> Result<Option<FeedEndpoint>> {
        self.endpoint.as_deref().map(FeedEndpoint::parse).transpose()
    }
}

/// The feed URL, normalized for matching.
///
/// Scheme, host and port must match exactly; paths are compared with any
/// trailing slash removed. Query strings are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl FeedEndpoint {
    /// Parses an absolute feed URL.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| ProxyError::Config(format!("invalid feed endpoint '{}': {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::Config(format!("feed endpoint '{}' has no host", url)))?;

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port: parsed.port_or_known_default(),
            path: trim_path(parsed.path()).to_string(),
        })
    }

    /// Whether `url` addresses this endpoint.
    pub fn matches(&self, url: &Url) -> bool {
        url.scheme() == self.scheme
            && url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.host))
            && url.port_or_known_default() == self.port
            && trim_path(url.path()) == self.path
    }
}

fn trim_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
