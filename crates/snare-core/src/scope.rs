//! Per-target scope evaluation.
//!
//! A [`ScopeSet`] is compiled once per target activation from that target's
//! rules and then queried for every request:
//!
//! 1. any matching exclusion rule puts the URL out of scope;
//! 2. with no inclusion rules at all the URL is in scope;
//! 3. otherwise the URL is in scope iff an inclusion rule matches.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use url::Url;

use crate::models::{ScopeItemType, ScopeRule};

/// Returns the normalized host of a URL: lowercase, no brackets, no trailing dot.
pub fn url_host(url: &Url) -> Option<String> {
    url.host_str().map(normalize_host)
}

/// Lowercases a host and strips IPv6 brackets and any trailing dot.
pub fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
enum Matcher {
    Host { pattern: String, wildcard: bool },
    Path { host: Option<String>, prefix: String },
    Ip(IpAddr),
    Cidr(IpNetwork),
    Inert,
}

impl Matcher {
    fn compile(rule: &ScopeRule) -> Self {
        let pattern = rule.pattern.trim();
        match rule.item_type {
            ScopeItemType::Domain | ScopeItemType::Subdomain => Matcher::Host {
                pattern: normalize_host(pattern),
                wildcard: rule.is_wildcard,
            },
            ScopeItemType::UrlPath => compile_path(pattern),
            ScopeItemType::IpAddress => match normalize_host(pattern).parse::<IpAddr>() {
                Ok(ip) => Matcher::Ip(ip),
                Err(_) => {
                    tracing::warn!(rule_id = rule.id, "Invalid IP address scope pattern: {}", pattern);
                    Matcher::Inert
                }
            },
            ScopeItemType::Cidr => match pattern.parse::<IpNetwork>() {
                Ok(net) => Matcher::Cidr(net),
                Err(e) => {
                    tracing::warn!(rule_id = rule.id, "Invalid CIDR scope pattern {}: {}", pattern, e);
                    Matcher::Inert
                }
            },
        }
    }

    fn matches(&self, url: &Url, host: Option<&str>) -> bool {
        match self {
            Matcher::Host { pattern, wildcard } => {
                host.is_some_and(|h| host_matches(pattern, *wildcard, h))
            }
            Matcher::Path {
                host: rule_host,
                prefix,
            } => {
                if let Some(rule_host) = rule_host {
                    if host != Some(rule_host.as_str()) {
                        return false;
                    }
                }
                path_matches(prefix, &normalize_path(url.path()))
            }
            Matcher::Ip(ip) => host_ip(host).is_some_and(|h| h == *ip),
            Matcher::Cidr(net) => host_ip(host).is_some_and(|h| net.contains(h)),
            Matcher::Inert => false,
        }
    }
}

fn compile_path(pattern: &str) -> Matcher {
    // Full URLs pin the host as well as the path.
    if pattern.contains("://") {
        if let Ok(url) = Url::parse(pattern) {
            return Matcher::Path {
                host: url_host(&url),
                prefix: normalize_path(url.path()),
            };
        }
    }
    Matcher::Path {
        host: None,
        prefix: normalize_path(pattern),
    }
}

fn host_ip(host: Option<&str>) -> Option<IpAddr> {
    host.and_then(|h| h.parse::<IpAddr>().ok())
}

/// Matches a hostname against an exact or `*.suffix` pattern.
///
/// `*.example.com` covers subdomains at any depth but not the apex. A bare
/// pattern with the wildcard flag covers the apex and every subdomain.
fn host_matches(pattern: &str, wildcard: bool, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host.len() > suffix.len() + 1 && host.ends_with(&format!(".{}", suffix));
    }
    if host == pattern {
        return true;
    }
    wildcard && host.ends_with(&format!(".{}", pattern))
}

/// Ensures a leading slash and collapses repeated slashes.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    if path.ends_with('/') && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// `prefix` ending in `/` covers the directory and everything below it;
/// otherwise it covers the exact segment or the segment followed by `/`.
fn path_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    if let Some(dir) = prefix.strip_suffix('/') {
        return path == dir || path.starts_with(prefix);
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

#[derive(Debug, Clone)]
struct CompiledRule {
    include: bool,
    matcher: Matcher,
}

/// The compiled scope rules of one research target.
#[derive(Debug, Clone, Default)]
pub struct ScopeSet {
    rules: Vec<CompiledRule>,
    has_inclusions: bool,
}

impl ScopeSet {
    /// Compiles a target's rules. Unparseable patterns are logged once and
    /// then never match.
    pub fn new(rules: &[ScopeRule]) -> Self {
        let rules: Vec<CompiledRule> = rules
            .iter()
            .map(|rule| CompiledRule {
                include: rule.is_in_scope,
                matcher: Matcher::compile(rule),
            })
            .collect();
        let has_inclusions = rules.iter().any(|r| r.include);
        Self {
            rules,
            has_inclusions,
        }
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decides whether a URL is in scope.
    pub fn is_in_scope(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            // Nothing can match an unparseable URL, so only the default applies.
            return !self.has_inclusions;
        };
        self.is_url_in_scope(&parsed)
    }

    /// Decides whether an already parsed URL is in scope.
    pub fn is_url_in_scope(&self, url: &Url) -> bool {
        let host = url_host(url);
        let host = host.as_deref();

        let mut included = false;
        for rule in &self.rules {
            if !rule.matcher.matches(url, host) {
                continue;
            }
            if !rule.include {
                return false;
            }
            included = true;
        }

        included || !self.has_inclusions
    }
}

/// Evaluates a URL against a rule set in one shot.
pub fn is_in_scope(url: &str, rules: &[ScopeRule]) -> bool {
    ScopeSet::new(rules).is_in_scope(url)
}
