//! Snare Storage - SQLite persistence layer.
//!
//! Implements [`snare_core::TrafficStore`] on top of a single SQLite file:
//!
//! - Captured request/response exchanges
//! - Per-target scope rules and global exclusion rules
//! - Runtime settings (the persisted active target)
//! - External feed targets, analytics fetch markers and findings
//!
//! # Example
//!
//! ```no_run
//! use snare_core::{ScopeItemType, ScopeRule, TrafficStore};
//! use snare_storage::Database;
//!
//! let db = Database::in_memory().unwrap();
//! db.add_scope_rule(&ScopeRule::include(1, ScopeItemType::Domain, "*.example.com"))
//!     .unwrap();
//! db.set_current_target(Some(1)).unwrap();
//!
//! assert_eq!(db.current_target_id().unwrap(), Some(1));
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::StoredTrafficLog;
pub use pool::ConnectionPool;
