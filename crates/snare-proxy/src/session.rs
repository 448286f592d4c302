//! Transport session table.
//!
//! Maps a transport session id (the client socket address) to whether the
//! session arrived through a CONNECT tunnel. Entries are created on CONNECT,
//! live for the whole tunnel and are removed on teardown. A sweeper evicts
//! tunnels that have been idle longer than the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Default time after which an idle session entry is evicted.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    is_tls: bool,
    last_seen: Instant,
}

/// Mutex-guarded session map.
#[derive(Debug, Default)]
pub struct SessionTable {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session established through CONNECT.
    pub fn register_tls(&self, session: &str) {
        self.entries.lock().insert(
            session.to_string(),
            SessionEntry {
                is_tls: true,
                last_seen: Instant::now(),
            },
        );
    }

    /// Whether the session was established through CONNECT. A hit counts as
    /// activity and keeps the entry from being swept.
    pub fn is_tls(&self, session: &str) -> bool {
        match self.entries.lock().get_mut(session) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                entry.is_tls
            }
            None => false,
        }
    }

    /// Forgets a session. Returns true if it was known.
    pub fn remove(&self, session: &str) -> bool {
        self.entries.lock().remove(session).is_some()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no session is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Evicts entries idle for at least `ttl`, returning how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_seen.elapsed() < ttl);
        before - entries.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until cancelled.
    pub fn start_sweeper(
        self: Arc<Self>,
        ttl: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.sweep(ttl);
                        if evicted > 0 {
                            tracing::debug!("Evicted {} stale sessions", evicted);
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_remove() {
        let table = SessionTable::new();
        assert!(!table.is_tls("127.0.0.1:5000"));

        table.register_tls("127.0.0.1:5000");
        assert!(table.is_tls("127.0.0.1:5000"));
        assert_eq!(table.len(), 1);

        assert!(table.remove("127.0.0.1:5000"));
        assert!(!table.remove("127.0.0.1:5000"));
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_respects_ttl() {
        let table = SessionTable::new();
        table.register_tls("a");
        assert_eq!(table.sweep(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(table.sweep(Duration::from_millis(10)), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn lookups_keep_busy_tunnels_alive() {
        let table = SessionTable::new();
        table.register_tls("busy");
        table.register_tls("idle");

        std::thread::sleep(Duration::from_millis(30));
        assert!(table.is_tls("busy"));

        assert_eq!(table.sweep(Duration::from_millis(20)), 1);
        assert!(table.is_tls("busy"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn sweeper_task_evicts_and_stops() {
        let table = Arc::new(SessionTable::new());
        table.register_tls("a");

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&table).start_sweeper(
            Duration::from_millis(5),
            Duration::from_millis(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(table.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
