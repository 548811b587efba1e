//! In-memory session store with TTL expiry and LRU eviction.
//!
//! Expiry is enforced twice: every read checks the deadline and deletes an
//! expired entry on the spot, and `sweep()` (run periodically by
//! `spawn_sweeper`) removes whatever nobody has read since it expired. After
//! removing expired sessions the sweep evicts least-recently-updated ones
//! until the store is back within `max_sessions`.
//!
//! Deadlines use `tokio::time::Instant` so tests can drive them with a
//! paused clock; the chrono timestamps on `Session` are informational.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentflow_types::config::SessionConfig;
use agentflow_types::session::{Session, SessionError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

/// Key-value-with-TTL contract the orchestrator uses for cross-run state.
///
/// Object-safe so the orchestrator can hold an `Arc<dyn SessionStore>`.
pub trait SessionStore: Send + Sync {
    /// Create a session with the store's default TTL and return its id.
    fn create_session(&self, metadata: Map<String, Value>) -> String;

    /// Create a session under a caller-chosen id. An existing live session
    /// with that id is left untouched.
    fn create_session_with_id(&self, id: &str, metadata: Map<String, Value>) -> String;

    /// Snapshot of a live session, `None` if unknown or expired.
    fn get_session(&self, id: &str) -> Option<Session>;

    fn get(&self, id: &str, key: &str) -> Result<Option<Value>, SessionError>;

    fn set(&self, id: &str, key: &str, value: Value) -> Result<(), SessionError>;

    /// Push the session's expiry to `ttl` from now.
    fn extend_session(&self, id: &str, ttl: Duration) -> Result<(), SessionError>;

    /// Returns whether a session was removed.
    fn delete_session(&self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    session: Session,
    deadline: Instant,
    /// Monotonic update counter; lower means less recently updated.
    touched: u64,
}

/// `DashMap`-backed `SessionStore`.
#[derive(Debug)]
pub struct ContextStore {
    config: SessionConfig,
    sessions: DashMap<String, Entry>,
    clock: AtomicU64,
}

impl ContextStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session that expires `ttl` from now.
    pub fn create_session_with_ttl(&self, metadata: Map<String, Value>, ttl: Duration) -> String {
        let id = Uuid::now_v7().to_string();
        self.insert(id.clone(), metadata, ttl);
        id
    }

    /// Remove expired sessions, then evict least-recently-updated sessions
    /// until at most `max_sessions` remain. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.shrink_to(self.config.max_sessions)
    }

    /// Run `sweep()` every `period` until the returned token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let store = Arc::clone(self);
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = store.len(), "session sweep");
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        });

        token
    }

    fn insert(&self, id: String, metadata: Map<String, Value>, ttl: Duration) {
        let bound = self.config.max_sessions.max(1);
        if self.sessions.len() >= bound {
            self.shrink_to(bound - 1);
        }

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            expires_at: expiry_after(now, ttl),
            metadata,
            state: Map::new(),
        };
        let entry = Entry {
            session,
            deadline: deadline_after(Instant::now(), ttl),
            touched: self.tick(),
        };
        self.sessions.insert(id, entry);
    }

    fn shrink_to(&self, bound: usize) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.deadline > now);
        let expired = before.saturating_sub(self.sessions.len());

        let mut evicted = 0;
        let len = self.sessions.len();
        if len > bound {
            let mut by_age: Vec<(String, u64)> = self
                .sessions
                .iter()
                .map(|e| (e.key().clone(), e.value().touched))
                .collect();
            by_age.sort_by_key(|(_, touched)| *touched);
            for (id, _) in by_age.into_iter().take(len - bound) {
                if self.sessions.remove(&id).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            tracing::warn!(evicted, max_sessions = bound, "evicted least recently updated sessions");
        }
        expired + evicted
    }

    /// Run `f` against a live entry, deleting it first if it has expired.
    fn with_live<R>(&self, id: &str, f: impl FnOnce(&mut Entry) -> R) -> Result<R, SessionError> {
        let now = Instant::now();
        {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            if entry.deadline > now {
                return Ok(f(&mut entry));
            }
        }
        self.sessions.remove_if(id, |_, entry| entry.deadline <= now);
        tracing::debug!(session_id = id, "expired session removed on read");
        Err(SessionError::Expired(id.to_string()))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionStore for ContextStore {
    fn create_session(&self, metadata: Map<String, Value>) -> String {
        self.create_session_with_ttl(metadata, self.config.ttl())
    }

    fn create_session_with_id(&self, id: &str, metadata: Map<String, Value>) -> String {
        if self.with_live(id, |_| ()).is_err() {
            self.insert(id.to_string(), metadata, self.config.ttl());
        }
        id.to_string()
    }

    fn get_session(&self, id: &str) -> Option<Session> {
        self.with_live(id, |entry| entry.session.clone()).ok()
    }

    fn get(&self, id: &str, key: &str) -> Result<Option<Value>, SessionError> {
        self.with_live(id, |entry| entry.session.state.get(key).cloned())
    }

    fn set(&self, id: &str, key: &str, value: Value) -> Result<(), SessionError> {
        let touched = self.tick();
        self.with_live(id, |entry| {
            entry.session.state.insert(key.to_string(), value);
            entry.session.updated_at = Utc::now();
            entry.touched = touched;
        })
    }

    fn extend_session(&self, id: &str, ttl: Duration) -> Result<(), SessionError> {
        let touched = self.tick();
        self.with_live(id, |entry| {
            let now = Utc::now();
            entry.deadline = deadline_after(Instant::now(), ttl);
            entry.session.expires_at = expiry_after(now, ttl);
            entry.session.updated_at = now;
            entry.touched = touched;
        })
    }

    fn delete_session(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Roughly a century; stands in for TTLs too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(max_sessions: usize) -> ContextStore {
        ContextStore::new(SessionConfig {
            ttl_secs: 60,
            max_sessions,
            sweep_interval_secs: 1,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_on_read_without_sweep() {
        let store = store(10);
        let id = store.create_session_with_ttl(Map::new(), Duration::from_secs(1));

        assert!(store.get_session(&id).is_some());

        tokio::time::advance(Duration::from_millis(1_050)).await;

        assert!(store.get_session(&id).is_none());
        // The read deleted it.
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_on_expired_session_reports_expired() {
        let store = store(10);
        let id = store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.get(&id, "k"), Err(SessionError::Expired(id.clone())));
        assert_eq!(store.get(&id, "k"), Err(SessionError::NotFound(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_saturates_instead_of_overflowing() {
        let store = ContextStore::new(SessionConfig {
            ttl_secs: u64::MAX,
            max_sessions: 10,
            sweep_interval_secs: 1,
        });
        let id = store.create_session(Map::new());
        let other = store.create_session_with_ttl(Map::new(), Duration::MAX);
        store.extend_session(&other, Duration::MAX).unwrap();

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(store.get_session(&other).is_some());
        assert_eq!(store.sweep(), 0);
    }

    #[tokio::test]
    async fn test_set_and_get_state() {
        let store = store(10);
        let mut metadata = Map::new();
        metadata.insert("owner".to_string(), json!("ops"));
        let id = store.create_session(metadata);

        store.set(&id, "cursor", json!(42)).unwrap();
        assert_eq!(store.get(&id, "cursor").unwrap(), Some(json!(42)));
        assert_eq!(store.get(&id, "missing").unwrap(), None);

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.metadata["owner"], json!("ops"));
        assert!(session.updated_at >= session.created_at);
    }

    #[tokio::test]
    async fn test_set_on_unknown_session_fails() {
        let store = store(10);
        let err = store.set("nope", "k", json!(1)).unwrap_err();
        assert_eq!(err, SessionError::NotFound("nope".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_session_pushes_deadline() {
        let store = store(10);
        let id = store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(800)).await;

        store.extend_session(&id, Duration::from_secs(5)).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(store.get_session(&id).is_some());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let store = store(10);
        let id = store.create_session(Map::new());
        assert!(store.delete_session(&id));
        assert!(!store.delete_session(&id));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_sessions() {
        let store = store(10);
        store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        let keep = store.create_session_with_ttl(Map::new(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.sweep(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get_session(&keep).is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_updated() {
        let store = store(2);
        let a = store.create_session(Map::new());
        let b = store.create_session(Map::new());
        // `a` becomes the most recently updated.
        store.set(&a, "k", json!(1)).unwrap();

        let c = store.create_session(Map::new());

        assert_eq!(store.len(), 2);
        assert!(store.get_session(&a).is_some());
        assert!(store.get_session(&b).is_none());
        assert!(store.get_session(&c).is_some());
    }

    #[tokio::test]
    async fn test_create_with_existing_id_keeps_state() {
        let store = store(10);
        let id = store.create_session_with_id("run-1", Map::new());
        store.set(&id, "k", json!("v")).unwrap();

        store.create_session_with_id("run-1", Map::new());
        assert_eq!(store.get("run-1", "k").unwrap(), Some(json!("v")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_removes_expired_and_stops() {
        let store = Arc::new(store(10));
        store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        let token = store.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.len(), 0);

        token.cancel();
        store.create_session_with_ttl(Map::new(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.len(), 1);
    }
}
