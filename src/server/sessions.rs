//! Per-browser session registry and its idle-session sweeper.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::Conversation;

/// Identifier handed to the browser on page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

struct SessionEntry {
    state: Conversation,
    last_seen: Instant,
}

/// Conversation states keyed by session. Each session is mutated only by its own requests.
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionEntry>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty store whose sessions expire after `ttl` without activity.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Register a new session.
    pub fn create(&self, state: Conversation) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionEntry {
                state,
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Current state of a session, refreshing its idle timer.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Conversation> {
        self.sessions.get_mut(&id).map(|mut entry| {
            entry.last_seen = Instant::now();
            entry.state.clone()
        })
    }

    /// Replace the state of an existing session. Returns `false` if it is gone.
    pub fn put(&self, id: SessionId, state: Conversation) -> bool {
        self.sessions
            .get_mut(&id)
            .map(|mut entry| {
                entry.state = state;
                entry.last_seen = Instant::now();
            })
            .is_some()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for longer than the TTL. Returns how many were removed.
    pub fn remove_expired(&self) -> usize {
        self.remove_idle_since(Instant::now())
    }

    fn remove_idle_since(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= self.ttl);
        before - self.sessions.len()
    }

    /// Spawn a task sweeping idle sessions every `interval` until `shutdown` fires.
    #[must_use]
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(?interval, ttl = ?self.ttl, "Starting session sweeper");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        let removed = self.remove_expired();
                        if removed > 0 {
                            info!(removed, live = self.len(), "Evicted idle sessions");
                        } else {
                            debug!("Session sweep found nothing to evict");
                        }
                    }
                    () = shutdown.notified() => {
                        info!("Session sweeper shutting down");
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
    use crate::conversation::default_conversation;

    #[test]
    fn test_create_get_put() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(default_conversation());

        let mut state = store.get(id).unwrap_or_else(default_conversation);
        state.push_exchange("hi".into());
        assert!(store.put(id, state));
        assert_eq!(store.get(id).map(|s| s.messages.len()), Some(2));

        assert!(!store.put(SessionId::new(), default_conversation()));
        assert!(store.get(SessionId::new()).is_none());
    }

    #[test]
    fn test_idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_millis(10));
        store.create(default_conversation());
        store.create(default_conversation());
        assert_eq!(store.len(), 2);

        assert_eq!(store.remove_expired(), 0);
        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(store.remove_idle_since(later), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_session_id_parses() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().ok(), Some(id));
        assert!("nope".parse::<SessionId>().is_err());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let shutdown = Arc::new(Notify::new());
        let handle = Arc::clone(&store).spawn_sweeper(Duration::from_secs(3600), Arc::clone(&shutdown));
        shutdown.notify_one();
        assert!(handle.await.is_ok());
    }
}
