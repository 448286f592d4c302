//! Data models shared between the proxy and its storage collaborator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of pattern a scope rule carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeItemType {
    /// Hostname, exact or `*.suffix`.
    Domain,
    /// Hostname, same wildcard semantics as `Domain`.
    Subdomain,
    /// Path prefix.
    UrlPath,
    /// Literal IP address.
    IpAddress,
    /// CIDR block.
    Cidr,
}

impl ScopeItemType {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeItemType::Domain => "domain",
            ScopeItemType::Subdomain => "subdomain",
            ScopeItemType::UrlPath => "url_path",
            ScopeItemType::IpAddress => "ip_address",
            ScopeItemType::Cidr => "cidr",
        }
    }

    /// Parse from database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "domain" => Some(ScopeItemType::Domain),
            "subdomain" => Some(ScopeItemType::Subdomain),
            "url_path" => Some(ScopeItemType::UrlPath),
            "ip_address" => Some(ScopeItemType::IpAddress),
            "cidr" => Some(ScopeItemType::Cidr),
            _ => None,
        }
    }
}

/// A per-target scope rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRule {
    /// Unique identifier (0 for rules not yet stored).
    pub id: i64,
    /// Owning research target.
    pub target_id: i64,
    /// How `pattern` is interpreted.
    pub item_type: ScopeItemType,
    /// The pattern itself.
    pub pattern: String,
    /// `true` for inclusion rules, `false` for exclusion rules.
    pub is_in_scope: bool,
    /// Bare host patterns also cover every subdomain when set.
    pub is_wildcard: bool,
    /// Free-text description.
    pub description: Option<String>,
}

impl ScopeRule {
    /// Creates an inclusion rule.
    pub fn include(target_id: i64, item_type: ScopeItemType, pattern: impl Into<String>) -> Self {
        Self {
            id: 0,
            target_id,
            item_type,
            pattern: pattern.into(),
            is_in_scope: true,
            is_wildcard: false,
            description: None,
        }
    }

    /// Creates an exclusion rule.
    pub fn exclude(target_id: i64, item_type: ScopeItemType, pattern: impl Into<String>) -> Self {
        Self {
            is_in_scope: false,
            ..Self::include(target_id, item_type, pattern)
        }
    }

    /// Sets the wildcard flag.
    pub fn with_wildcard(mut self, wildcard: bool) -> Self {
        self.is_wildcard = wildcard;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Kind of pattern a global exclusion rule carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionRuleType {
    /// Suffix of the URL path (`.png`).
    FileExtension,
    /// Regular expression over the full URL.
    UrlRegex,
    /// Exact hostname.
    Domain,
}

impl ExclusionRuleType {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionRuleType::FileExtension => "file_extension",
            ExclusionRuleType::UrlRegex => "url_regex",
            ExclusionRuleType::Domain => "domain",
        }
    }

    /// Parse from database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file_extension" => Some(ExclusionRuleType::FileExtension),
            "url_regex" => Some(ExclusionRuleType::UrlRegex),
            "domain" => Some(ExclusionRuleType::Domain),
            _ => None,
        }
    }
}

/// A global, target-independent capture suppression rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyExclusionRule {
    /// Unique identifier (0 for rules not yet stored).
    pub id: i64,
    /// How `pattern` is interpreted.
    pub rule_type: ExclusionRuleType,
    /// The pattern itself.
    pub pattern: String,
    /// Disabled rules never match.
    pub enabled: bool,
    /// Free-text description.
    pub description: Option<String>,
}

impl ProxyExclusionRule {
    /// Creates an enabled rule.
    pub fn new(rule_type: ExclusionRuleType, pattern: impl Into<String>) -> Self {
        Self {
            id: 0,
            rule_type,
            pattern: pattern.into(),
            enabled: true,
            description: None,
        }
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Where a traffic log entry came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Observed by the intercepting proxy.
    #[default]
    Proxy,
    /// Issued by a replay tool.
    Tool,
    /// Captured while a page recording session was active.
    Recorder,
}

impl LogSource {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Proxy => "proxy",
            LogSource::Tool => "tool",
            LogSource::Recorder => "recorder",
        }
    }

    /// Parse from database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proxy" => Some(LogSource::Proxy),
            "tool" => Some(LogSource::Tool),
            "recorder" => Some(LogSource::Recorder),
            _ => None,
        }
    }
}

/// One captured (or attempted) request/response exchange.
///
/// Request fields are filled in at request time. Response fields stay empty
/// when the response never arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpTrafficLogEntry {
    /// Research target the exchange belongs to, if any.
    pub target_id: Option<i64>,
    /// When the request was seen.
    pub timestamp: DateTime<Utc>,
    /// Request method.
    pub request_method: String,
    /// Full request URL.
    pub request_url: String,
    /// Request protocol version (`HTTP/1.1`).
    pub request_protocol: String,
    /// Serialized request headers.
    pub request_headers: String,
    /// Raw request body.
    pub request_body: Vec<u8>,
    /// Response status code; `None` if the response never arrived.
    pub response_status: Option<u16>,
    /// Canonical reason phrase.
    pub response_reason: Option<String>,
    /// Response protocol version.
    pub response_protocol: Option<String>,
    /// Serialized response headers.
    pub response_headers: Option<String>,
    /// Raw response body.
    pub response_body: Vec<u8>,
    /// Response `Content-Type`.
    pub response_content_type: Option<String>,
    /// Response body size in bytes.
    pub response_size: i64,
    /// Milliseconds between request and response.
    pub duration_ms: i64,
    /// Client socket address.
    pub client_addr: String,
    /// Whether the exchange travelled through a TLS tunnel.
    pub is_https: bool,
    /// Whether the response looks like an HTML page.
    pub is_page_candidate: bool,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Where the entry came from.
    pub log_source: LogSource,
    /// Linked page recording session.
    pub recording_session_id: Option<i64>,
}

impl HttpTrafficLogEntry {
    /// Returns true once response fields have been captured.
    pub fn has_response(&self) -> bool {
        self.response_status.is_some()
    }
}

/// Fields used to upsert a target from the external platform feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExternalTarget {
    /// Platform-assigned identifier (natural key).
    pub platform_id: String,
    /// Codename / handle.
    pub codename: Option<String>,
    /// Platform category.
    pub category: Option<String>,
    /// The original feed object.
    pub raw: serde_json::Value,
}

/// A stored external target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTarget {
    /// Unique identifier.
    pub id: i64,
    /// Platform-assigned identifier.
    pub platform_id: String,
    /// Codename / handle.
    pub codename: Option<String>,
    /// Platform category.
    pub category: Option<String>,
    /// Whether the target was present in the last feed snapshot.
    pub is_active: bool,
    /// The original feed object.
    pub raw: serde_json::Value,
    /// Last upsert time.
    pub updated_at: DateTime<Utc>,
    /// When the target was last deactivated.
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Fields used to upsert a finding extracted from target analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    /// Owning external target (row id).
    pub target_id: i64,
    /// Platform finding identifier, when the location carries one.
    pub finding_id: Option<String>,
    /// Primary category of the finding's group.
    pub category: String,
    /// Group status.
    pub status: Option<String>,
    /// Affected URL (natural key together with `target_id`).
    pub vulnerability_url: String,
    /// The original location object.
    pub raw: serde_json::Value,
    /// Report time decoded from the embedded epoch timestamp.
    pub reported_at: Option<DateTime<Utc>>,
}

/// A stored finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier.
    pub id: i64,
    /// Owning external target (row id).
    pub target_id: i64,
    /// Platform finding identifier.
    pub finding_id: Option<String>,
    /// Primary category.
    pub category: String,
    /// Status.
    pub status: Option<String>,
    /// Affected URL.
    pub vulnerability_url: String,
    /// The original location object.
    pub raw: serde_json::Value,
    /// Report time.
    pub reported_at: Option<DateTime<Utc>>,
}

/// Finding counts keyed by category name.
pub type CategoryCounts = BTreeMap<String, i64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_item_type_round_trips_through_str() {
        for t in [
            ScopeItemType::Domain,
            ScopeItemType::Subdomain,
            ScopeItemType::UrlPath,
            ScopeItemType::IpAddress,
            ScopeItemType::Cidr,
        ] {
            assert_eq!(ScopeItemType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ScopeItemType::parse("URL_PATH"), Some(ScopeItemType::UrlPath));
        assert_eq!(ScopeItemType::parse("regex"), None);
    }

    #[test]
    fn exclusion_rule_type_parse() {
        assert_eq!(
            ExclusionRuleType::parse("file_extension"),
            Some(ExclusionRuleType::FileExtension)
        );
        assert_eq!(ExclusionRuleType::parse("bogus"), None);
    }

    #[test]
    fn scope_rule_builders() {
        let rule = ScopeRule::exclude(3, ScopeItemType::Domain, "ads.example.com")
            .with_wildcard(true)
            .with_description("ad server");
        assert!(!rule.is_in_scope);
        assert!(rule.is_wildcard);
        assert_eq!(rule.target_id, 3);
        assert_eq!(rule.description.as_deref(), Some("ad server"));
    }

    #[test]
    fn log_entry_without_response() {
        let entry = HttpTrafficLogEntry::default();
        assert!(!entry.has_response());
        assert_eq!(entry.log_source, LogSource::Proxy);
    }
}
