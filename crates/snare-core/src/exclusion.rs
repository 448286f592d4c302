//! Global capture suppression.
//!
//! Exclusion rules apply to every target and are evaluated before scope.
//! They are compiled once, at startup, so a bad regex is reported a single
//! time and then ignored.

use regex::Regex;
use url::Url;

use crate::models::{ExclusionRuleType, ProxyExclusionRule};
use crate::scope::{normalize_host, url_host};

#[derive(Debug, Clone)]
enum Compiled {
    Extension(String),
    Regex(Regex),
    Domain(String),
}

/// Compiled set of enabled global exclusion rules.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    rules: Vec<Compiled>,
}

impl ExclusionFilter {
    /// Compiles the enabled rules; disabled and invalid ones are skipped.
    pub fn new(rules: &[ProxyExclusionRule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules.iter().filter(|r| r.enabled) {
            let pattern = rule.pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            match rule.rule_type {
                ExclusionRuleType::FileExtension => {
                    let ext = pattern.to_lowercase();
                    let ext = if ext.starts_with('.') {
                        ext
                    } else {
                        format!(".{}", ext)
                    };
                    compiled.push(Compiled::Extension(ext));
                }
                ExclusionRuleType::UrlRegex => match Regex::new(pattern) {
                    Ok(re) => compiled.push(Compiled::Regex(re)),
                    Err(e) => {
                        tracing::error!(
                            rule_id = rule.id,
                            "Invalid exclusion regex '{}', rule ignored: {}",
                            pattern,
                            e
                        );
                    }
                },
                ExclusionRuleType::Domain => {
                    compiled.push(Compiled::Domain(normalize_host(pattern)));
                }
            }
        }

        tracing::debug!("Compiled {} global exclusion rules", compiled.len());
        Self { rules: compiled }
    }

    /// Number of active (enabled and valid) rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if nothing can be excluded.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if capture of this URL must be suppressed.
    pub fn is_excluded(&self, url: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let parsed = Url::parse(url).ok();
        let path = parsed.as_ref().map(|u| u.path().to_lowercase());
        let host = parsed.as_ref().and_then(url_host);

        self.rules.iter().any(|rule| match rule {
            Compiled::Extension(ext) => path.as_deref().is_some_and(|p| p.ends_with(ext.as_str())),
            Compiled::Regex(re) => re.is_match(url),
            Compiled::Domain(domain) => host.as_deref() == Some(domain.as_str()),
        })
    }
}

/// Evaluates a URL against a rule list in one shot.
pub fn is_globally_excluded(url: &str, rules: &[ProxyExclusionRule]) -> bool {
    ExclusionFilter::new(rules).is_excluded(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(t: ExclusionRuleType, p: &str) -> ProxyExclusionRule {
        ProxyExclusionRule::new(t, p)
    }

    #[test]
    fn file_extension_is_case_insensitive_suffix() {
        let rules = vec![rule(ExclusionRuleType::FileExtension, "png")];
        assert!(is_globally_excluded("https://a.test/img/logo.PNG", &rules));
        assert!(is_globally_excluded("https://a.test/logo.png?v=3", &rules));
        assert!(!is_globally_excluded("https://a.test/png/index.html", &rules));
    }

    #[test]
    fn extension_with_leading_dot() {
        let rules = vec![rule(ExclusionRuleType::FileExtension, ".woff2")];
        assert!(is_globally_excluded("https://cdn.test/f.woff2", &rules));
    }

    #[test]
    fn url_regex_matches_full_url() {
        let rules = vec![rule(ExclusionRuleType::UrlRegex, r"^https://[^/]+/telemetry")];
        assert!(is_globally_excluded("https://x.test/telemetry/v2", &rules));
        assert!(!is_globally_excluded("http://x.test/telemetry/v2", &rules));
    }

    #[test]
    fn invalid_regex_is_inert() {
        let filter = ExclusionFilter::new(&[rule(ExclusionRuleType::UrlRegex, "([")]);
        assert!(filter.is_empty());
        assert!(!filter.is_excluded("https://x.test/(["));
    }

    #[test]
    fn domain_is_exact_and_case_insensitive() {
        let rules = vec![rule(ExclusionRuleType::Domain, "Tracker.Example.com")];
        assert!(is_globally_excluded("https://tracker.example.com/p", &rules));
        assert!(!is_globally_excluded("https://sub.tracker.example.com/p", &rules));
    }

    #[test]
    fn disabled_rules_never_match() {
        let rules = vec![rule(ExclusionRuleType::Domain, "a.test").with_enabled(false)];
        assert!(!is_globally_excluded("https://a.test/", &rules));
        assert_eq!(ExclusionFilter::new(&rules).len(), 0);
    }
}
