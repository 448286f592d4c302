//! Storage-side record types.
//!
//! Domain types live in `snare_core::models`; this module only adds the
//! wrappers that carry database identifiers.

use serde::{Deserialize, Serialize};

use snare_core::HttpTrafficLogEntry;

/// A traffic log entry as read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrafficLog {
    /// Row identifier.
    pub id: i64,
    /// The captured exchange.
    #[serde(flatten)]
    pub entry: HttpTrafficLogEntry,
}
