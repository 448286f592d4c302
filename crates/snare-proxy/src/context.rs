//! Shared interception state owned by one proxy instance.
//!
//! ```text
//! Request → ExclusionFilter (Arc, immutable)
//!         → active target + ScopeSet (RwLock, written on activation)
//!                 ↑ (background poll of `current_target_id`)
//!           TrafficStore
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use snare_core::{ExclusionFilter, ScopeSet, TrafficStore};

/// Default poll interval for the persisted active target.
pub const DEFAULT_TARGET_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct ActiveTarget {
    target_id: Option<i64>,
    scope: Arc<ScopeSet>,
}

/// Interception state: global exclusions, the active target and its scope,
/// and the page recording session.
pub struct InterceptionContext {
    store: Arc<dyn TrafficStore>,
    exclusions: Arc<ExclusionFilter>,
    active: RwLock<ActiveTarget>,
    target_override: Option<i64>,
    recording_session: RwLock<Option<i64>>,
}

impl std::fmt::Debug for InterceptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.read();
        f.debug_struct("InterceptionContext")
            .field("exclusions", &self.exclusions.len())
            .field("target_id", &active.target_id)
            .field("scope_rules", &active.scope.len())
            .field("target_override", &self.target_override)
            .field("recording_session", &*self.recording_session.read())
            .finish()
    }
}

impl InterceptionContext {
    /// Loads global exclusions and activates the initial target.
    ///
    /// A launch `target_override` pins the target for the lifetime of the
    /// instance; otherwise the persisted `current_target_id` setting is used.
    pub fn new(store: Arc<dyn TrafficStore>, target_override: Option<i64>) -> Self {
        let exclusions = match store.get_global_exclusion_rules() {
            Ok(rules) => ExclusionFilter::new(&rules),
            Err(e) => {
                tracing::warn!("Failed to load global exclusion rules: {}", e);
                ExclusionFilter::default()
            }
        };
        tracing::info!("Loaded {} global exclusion rules", exclusions.len());

        let ctx = Self {
            store,
            exclusions: Arc::new(exclusions),
            active: RwLock::new(ActiveTarget::default()),
            target_override,
            recording_session: RwLock::new(None),
        };
        ctx.activate(ctx.resolve_target_id());
        ctx
    }

    /// The storage collaborator.
    pub fn store(&self) -> &Arc<dyn TrafficStore> {
        &self.store
    }

    /// The compiled global exclusion filter.
    pub fn exclusions(&self) -> &ExclusionFilter {
        &self.exclusions
    }

    /// Whether the active target is pinned by a launch override.
    pub fn has_override(&self) -> bool {
        self.target_override.is_some()
    }

    /// The active target and its compiled scope.
    pub fn active_target(&self) -> (Option<i64>, Arc<ScopeSet>) {
        let active = self.active.read();
        (active.target_id, Arc::clone(&active.scope))
    }

    /// Override first, then the persisted setting, then none.
    pub fn resolve_target_id(&self) -> Option<i64> {
        if let Some(id) = self.target_override {
            return Some(id);
        }
        match self.store.current_target_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to read current target setting: {}", e);
                self.active.read().target_id
            }
        }
    }

    /// Makes `target_id` the active target, reloading its scope rules.
    pub fn activate(&self, target_id: Option<i64>) {
        let scope = match target_id {
            Some(id) => match self.store.get_active_scope_rules(id) {
                Ok(rules) => ScopeSet::new(&rules),
                Err(e) => {
                    tracing::warn!("Failed to load scope rules for target {}: {}", id, e);
                    ScopeSet::default()
                }
            },
            None => ScopeSet::default(),
        };

        tracing::info!(
            "Active target: {:?} ({} scope rules)",
            target_id,
            scope.len()
        );

        *self.active.write() = ActiveTarget {
            target_id,
            scope: Arc::new(scope),
        };
    }

    /// Re-resolves the active target and activates it if it changed.
    /// Returns true on change.
    pub fn refresh_target(&self) -> bool {
        let resolved = self.resolve_target_id();
        if resolved == self.active.read().target_id {
            return false;
        }
        self.activate(resolved);
        true
    }

    /// Starts or stops tagging captured traffic with a page recording session.
    pub fn set_recording_session(&self, session_id: Option<i64>) {
        *self.recording_session.write() = session_id;
    }

    /// The active page recording session, if any.
    pub fn recording_session(&self) -> Option<i64> {
        *self.recording_session.read()
    }

    /// Polls the persisted active target until cancelled.
    ///
    /// Does nothing when the target is pinned by an override.
    pub fn start_target_watcher(
        self: Arc<Self>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if self.has_override() {
                return;
            }
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_target();
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Target watcher stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snare_core::{ExclusionRuleType, ProxyExclusionRule, ScopeItemType, ScopeRule};
    use snare_storage::Database;

    fn setup() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.add_scope_rule(&ScopeRule::include(1, ScopeItemType::Domain, "one.test"))
            .unwrap();
        db.add_scope_rule(&ScopeRule::include(2, ScopeItemType::Domain, "two.test"))
            .unwrap();
        db.add_exclusion_rule(&ProxyExclusionRule::new(ExclusionRuleType::FileExtension, "png"))
            .unwrap();
        Arc::new(db)
    }

    #[test]
    fn no_target_means_empty_scope() {
        let ctx = InterceptionContext::new(setup(), None);
        let (target, scope) = ctx.active_target();
        assert_eq!(target, None);
        assert!(scope.is_empty());
        assert_eq!(ctx.exclusions().len(), 1);
    }

    #[test]
    fn persisted_setting_selects_target() {
        let db = setup();
        db.set_current_target(Some(2)).unwrap();
        let ctx = InterceptionContext::new(db, None);

        let (target, scope) = ctx.active_target();
        assert_eq!(target, Some(2));
        assert!(scope.is_in_scope("https://two.test/"));
        assert!(!scope.is_in_scope("https://one.test/"));
    }

    #[test]
    fn override_beats_setting() {
        let db = setup();
        db.set_current_target(Some(2)).unwrap();
        let ctx = InterceptionContext::new(db.clone(), Some(1));
        assert_eq!(ctx.active_target().0, Some(1));

        db.set_current_target(Some(2)).unwrap();
        assert!(!ctx.refresh_target());
        assert_eq!(ctx.active_target().0, Some(1));
    }

    #[test]
    fn refresh_picks_up_setting_change() {
        let db = setup();
        let ctx = InterceptionContext::new(db.clone(), None);
        assert!(!ctx.refresh_target());

        db.set_current_target(Some(1)).unwrap();
        assert!(ctx.refresh_target());
        assert_eq!(ctx.active_target().0, Some(1));
        assert!(!ctx.refresh_target());
    }

    #[test]
    fn recording_session_toggle() {
        let ctx = InterceptionContext::new(setup(), None);
        assert_eq!(ctx.recording_session(), None);
        ctx.set_recording_session(Some(5));
        assert_eq!(ctx.recording_session(), Some(5));
    }

    #[tokio::test]
    async fn watcher_activates_new_target() {
        let db = setup();
        let ctx = Arc::new(InterceptionContext::new(db.clone(), None));
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&ctx).start_target_watcher(Duration::from_millis(10), shutdown.clone());

        db.set_current_target(Some(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.active_target().0, Some(2));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
