//! Snare Core - rule evaluation and shared types for the interception proxy.
//!
//! This crate contains everything that does not touch the network or disk:
//!
//! - Scope evaluation for the active research target ([`scope`])
//! - Global capture suppression ([`exclusion`])
//! - Traffic log and external feed record types ([`models`])
//! - The storage collaborator trait ([`store`])
//! - Path queries over feed JSON ([`json_path`])

pub mod error;
pub mod exclusion;
pub mod json_path;
pub mod models;
pub mod scope;
pub mod store;

pub use error::{CoreError, Result};
pub use exclusion::{is_globally_excluded, ExclusionFilter};
pub use json_path::JsonPath;
pub use models::{
    CategoryCounts, ExclusionRuleType, ExternalTarget, Finding, HttpTrafficLogEntry, LogSource,
    NewExternalTarget, NewFinding, ProxyExclusionRule, ScopeItemType, ScopeRule,
};
pub use scope::{is_in_scope, ScopeSet};
pub use store::{TrafficStore, CURRENT_TARGET_SETTING};
