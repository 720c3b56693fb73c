//! Per-conversation state with sliding expiry.
//!
//! Sessions live in a [`DashMap`] so requests for different sessions never
//! contend. Every operation on one session runs under that entry's lock, so
//! concurrent requests on the same id interleave at operation granularity
//! and the last writer decides the order of appended turns.
//!
//! Expiry is logical: a session whose `last_activity` is older than the
//! timeout is treated as absent by every read, and physically evicted when a
//! read touches it or when [`SessionStore::sweep_expired`] runs. Nothing
//! sweeps automatically; `serve` may spawn a periodic sweeper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::RagError;
use crate::models::{ChatMessage, Role};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Snapshot of one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub chat_history: Vec<ChatMessage>,
    pub context: HashMap<String, Value>,
}

impl Session {
    fn new(id: String, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            last_activity: now,
            chat_history: Vec::new(),
            context: HashMap::new(),
        }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    timeout: Duration,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(timeout: Duration, max_history: usize) -> Self {
        Self::with_clock(timeout, max_history, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout: Duration, max_history: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
            max_history: max_history.max(1),
            clock,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Allocate a fresh session and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.clock.now());
        self.sessions.insert(id.clone(), session);
        tracing::info!(session_id = %id, "created session");
        id
    }

    /// Run `f` on a live session, refreshing its activity time.
    ///
    /// An expired session is evicted and `None` returned, exactly as if it
    /// had never existed.
    fn with_live<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let now = self.clock.now();
        {
            let mut entry = self.sessions.get_mut(id)?;
            if !entry.is_expired(now, self.timeout) {
                entry.last_activity = now;
                return Some(f(entry.value_mut()));
            }
        }

        let timeout = self.timeout;
        if self
            .sessions
            .remove_if(id, |_, s| s.is_expired(now, timeout))
            .is_some()
        {
            tracing::debug!(session_id = %id, "evicted expired session");
        }
        None
    }

    /// Owned snapshot of a live session.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.with_live(id, |s| s.clone())
    }

    /// Remove a session. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "ended session");
        }
        removed
    }

    /// Append a turn and keep only the most recent `max_history` entries.
    pub fn add_message(&self, id: &str, role: Role, content: &str) -> Result<(), RagError> {
        let max_history = self.max_history;
        self.with_live(id, |s| {
            s.chat_history.push(ChatMessage {
                role,
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            let len = s.chat_history.len();
            if len > max_history {
                s.chat_history.drain(..len - max_history);
            }
        })
        .ok_or_else(|| RagError::SessionNotFound(id.to_string()))
    }

    /// History of a live session, empty when absent.
    pub fn get_history(&self, id: &str) -> Vec<ChatMessage> {
        self.with_live(id, |s| s.chat_history.clone())
            .unwrap_or_default()
    }

    /// Empty a session's history, keeping the session itself.
    pub fn clear_history(&self, id: &str) -> Result<(), RagError> {
        self.with_live(id, |s| s.chat_history.clear())
            .ok_or_else(|| RagError::SessionNotFound(id.to_string()))
    }

    pub fn get_context(&self, id: &str, key: &str) -> Option<Value> {
        self.with_live(id, |s| s.context.get(key).cloned()).flatten()
    }

    /// Set a context entry. Returns `false` (and does nothing) when the
    /// session is absent.
    pub fn update_context(&self, id: &str, key: &str, value: Value) -> bool {
        self.with_live(id, |s| {
            s.context.insert(key.to_string(), value);
        })
        .is_some()
    }

    /// Evict every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.timeout;
        let mut removed = 0;
        self.sessions.retain(|_, s| {
            let expired = s.is_expired(now, timeout);
            if expired {
                removed += 1;
            }
            !expired
        });
        if removed > 0 {
            tracing::info!(removed, "swept expired sessions");
        }
        removed
    }

    /// Sweep, then count what remains.
    pub fn count_active(&self) -> usize {
        self.sweep_expired();
        self.sessions.len()
    }

    /// Physically stored sessions, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn store(max_history: usize) -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = SessionStore::with_clock(TIMEOUT, max_history, clock.clone());
        (store, clock)
    }

    #[test]
    fn test_create_and_get() {
        let (store, _) = store(10);
        let id = store.create();
        let session = store.get(&id).unwrap();
        assert_eq!(session.id, id);
        assert!(session.chat_history.is_empty());
        assert!(session.context.is_empty());
        assert!(session.last_activity >= session.created_at);
    }

    #[test]
    fn test_ids_are_unique() {
        let (store, _) = store(10);
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_session_is_absent_and_evicted() {
        let (store, clock) = store(10);
        let id = store.create();
        clock.advance(TIMEOUT + Duration::from_secs(1));
        assert_eq!(store.len(), 1);
        assert!(store.get(&id).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_exactly_at_timeout_is_still_live() {
        let (store, clock) = store(10);
        let id = store.create();
        clock.advance(TIMEOUT);
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn test_touch_slides_expiry_window() {
        let (store, clock) = store(10);
        let id = store.create();
        clock.advance(Duration::from_secs(50));
        assert!(store.get(&id).is_some());
        clock.advance(Duration::from_secs(50));
        // 100s after creation, 50s after the last touch
        assert!(store.get(&id).is_some());
        clock.advance(Duration::from_secs(61));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn test_history_keeps_most_recent_in_order() {
        let (store, _) = store(10);
        let id = store.create();
        for i in 0..15 {
            store.add_message(&id, Role::User, &format!("m{}", i)).unwrap();
        }
        let history = store.get_history(&id);
        assert_eq!(history.len(), 10);
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (5..15).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_add_message_unknown_session_fails_without_side_effects() {
        let (store, _) = store(10);
        let id = store.create();
        let err = store.add_message("nope", Role::User, "hi").unwrap_err();
        assert!(matches!(err, RagError::SessionNotFound(ref s) if s == "nope"));
        assert_eq!(store.len(), 1);
        assert!(store.get_history(&id).is_empty());
    }

    #[test]
    fn test_add_message_expired_session_fails() {
        let (store, clock) = store(10);
        let id = store.create();
        clock.advance(TIMEOUT * 2);
        assert!(matches!(
            store.add_message(&id, Role::User, "hi"),
            Err(RagError::SessionNotFound(_))
        ));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_get_history_absent_is_empty() {
        let (store, _) = store(10);
        assert!(store.get_history("missing").is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (store, _) = store(10);
        let id = store.create();
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn test_sweep_and_count_active() {
        let (store, clock) = store(10);
        let old = store.create();
        clock.advance(Duration::from_secs(40));
        let fresh = store.create();
        clock.advance(Duration::from_secs(30));

        assert_eq!(store.len(), 2);
        assert_eq!(store.count_active(), 1);
        assert!(store.get(&old).is_none());
        assert!(store.get(&fresh).is_some());
        assert_eq!(store.sweep_expired(), 0);
    }

    #[test]
    fn test_context_roundtrip_and_absent_noop() {
        let (store, _) = store(10);
        let id = store.create();
        assert!(store.update_context(&id, "lang", serde_json::json!("en")));
        assert_eq!(store.get_context(&id, "lang"), Some(serde_json::json!("en")));
        assert_eq!(store.get_context(&id, "other"), None);
        assert!(!store.update_context("missing", "lang", serde_json::json!(1)));
    }

    #[test]
    fn test_clear_history_keeps_session() {
        let (store, _) = store(10);
        let id = store.create();
        store.add_message(&id, Role::User, "hello").unwrap();
        store.add_message(&id, Role::Assistant, "hi").unwrap();
        store.clear_history(&id).unwrap();
        assert!(store.get_history(&id).is_empty());
        assert!(store.get(&id).is_some());
        assert!(store.clear_history("missing").is_err());
    }

    #[test]
    fn test_concurrent_sessions() {
        let store = Arc::new(SessionStore::new(TIMEOUT, 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let id = store.create();
                    for i in 0..20 {
                        store.add_message(&id, Role::User, &i.to_string()).unwrap();
                    }
                    id
                })
            })
            .collect();
        for h in handles {
            let id = h.join().unwrap();
            assert_eq!(store.get_history(&id).len(), 20);
        }
        assert_eq!(store.count_active(), 8);
    }
}
