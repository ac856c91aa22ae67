//! Scope to session id memoization.
//!
//! One sandbox is reused per scope (typically a conversation) instead of one
//! per process, so unrelated conversations never share a session.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Scope used when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "default";

/// The pool reclaims a session after at most an hour without requests, so a
/// scope idle for longer would only point at a dead sandbox.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct Entry {
    session_id: String,
    last_used: Instant,
    /// Configured sessions are never evicted.
    pinned: bool,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget scopes unused for longer than `idle_ttl`.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Pre-assign a session id to `scope`, typically from configuration.
    pub fn with_session(self, scope: &str, session_id: impl Into<String>) -> Self {
        self.lock().insert(
            scope.to_string(),
            Entry {
                session_id: session_id.into(),
                last_used: Instant::now(),
                pinned: true,
            },
        );
        self
    }

    /// Returns the session id for `scope`, creating one on first use.
    ///
    /// `requested` only applies when the scope has no session yet; the first
    /// id stored for a scope wins. Idle scopes are evicted on each call.
    pub fn session_for(&self, scope: &str, requested: Option<&str>) -> String {
        let now = Instant::now();
        let mut sessions = self.lock();

        let before = sessions.len();
        let idle_ttl = self.idle_ttl;
        sessions.retain(|_, entry| entry.pinned || now.duration_since(entry.last_used) < idle_ttl);
        if sessions.len() < before {
            tracing::debug!("Evicted {} idle session scopes", before - sessions.len());
        }

        if let Some(existing) = sessions.get_mut(scope) {
            existing.last_used = now;
            return existing.session_id.clone();
        }

        let session_id = requested
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::info!("Assigned session {} to scope {}", session_id, scope);
        sessions.insert(
            scope.to_string(),
            Entry {
                session_id: session_id.clone(),
                last_used: now,
                pinned: false,
            },
        );
        session_id
    }

    pub fn get(&self, scope: &str) -> Option<String> {
        self.lock().get(scope).map(|entry| entry.session_id.clone())
    }

    /// Number of scopes currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the map cannot leave it half-written.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_session_within_scope() {
        let registry = SessionRegistry::new();
        let first = registry.session_for("conv-1", None);
        let second = registry.session_for("conv-1", Some("ignored"));
        assert_eq!(first, second);
    }

    #[test]
    fn scopes_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.session_for("conv-a", None);
        let b = registry.session_for("conv-b", None);
        assert_ne!(a, b);
    }

    #[test]
    fn requested_id_is_used_for_new_scope() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.session_for("conv-1", Some("my-session")), "my-session");
        assert_eq!(registry.get("conv-1").as_deref(), Some("my-session"));
    }

    #[test]
    fn configured_default_session() {
        let registry = SessionRegistry::new().with_session(DEFAULT_SCOPE, "from-config");
        assert_eq!(registry.session_for(DEFAULT_SCOPE, None), "from-config");
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn idle_scopes_are_evicted() {
        let registry = SessionRegistry::new()
            .with_idle_ttl(Duration::ZERO)
            .with_session(DEFAULT_SCOPE, "from-config");

        let first = registry.session_for("conv-1", None);
        let second = registry.session_for("conv-2", None);
        assert_ne!(first, second);
        assert!(registry.get("conv-1").is_none());
        assert_eq!(registry.len(), 2);

        assert_ne!(registry.session_for("conv-1", None), first);
        assert_eq!(registry.session_for(DEFAULT_SCOPE, None), "from-config");
    }

    #[test]
    fn active_scopes_are_kept() {
        let registry = SessionRegistry::new().with_idle_ttl(Duration::from_secs(3600));
        let first = registry.session_for("conv-1", None);
        registry.session_for("conv-2", None);
        assert_eq!(registry.session_for("conv-1", None), first);
        assert_eq!(registry.len(), 2);
    }
}
