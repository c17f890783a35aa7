//! Session storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Shared, individually locked session state.
pub type SessionHandle<T> = Arc<Mutex<T>>;

/// Trait for session storage backends.
///
/// Handles are locked per session, so concurrent requests for the same id
/// are serialised while different sessions proceed in parallel.
#[async_trait]
pub trait SessionStore<T: Send + 'static>: Send + Sync {
    /// Store a new session, replacing any existing one with the same id.
    async fn insert(&self, id: &str, session: T) -> SessionHandle<T>;

    /// Look up a session and mark it active.
    async fn get(&self, id: &str) -> Option<SessionHandle<T>>;

    /// Return the existing session, or store `session` if there is none.
    async fn get_or_insert(&self, id: &str, session: T) -> SessionHandle<T>;

    /// Remove a session. Returns true if it existed.
    async fn evict(&self, id: &str) -> bool;

    /// Remove sessions idle for longer than `max_idle`. Returns the number removed.
    async fn evict_idle(&self, max_idle: Duration) -> usize;

    /// Number of stored sessions.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct Entry<T> {
    handle: SessionHandle<T>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn new(session: T) -> Self {
        let now = Utc::now();
        Self {
            handle: Arc::new(Mutex::new(session)),
            created_at: now,
            last_activity: now,
        }
    }
}

/// In-memory session store.
pub struct InMemorySessionStore<T> {
    sessions: Arc<RwLock<HashMap<String, Entry<T>>>>,
}

impl<T> InMemorySessionStore<T> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creation time of a session, if present.
    pub async fn created_at(&self, id: &str) -> Option<DateTime<Utc>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|entry| entry.created_at)
    }

    async fn evict_inactive_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_activity >= cutoff);
        before - sessions.len()
    }
}

impl<T> Default for InMemorySessionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InMemorySessionStore<T> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> SessionStore<T> for InMemorySessionStore<T> {
    async fn insert(&self, id: &str, session: T) -> SessionHandle<T> {
        let entry = Entry::new(session);
        let handle = Arc::clone(&entry.handle);
        self.sessions.write().await.insert(id.to_string(), entry);
        debug!(session = id, "Session created");
        handle
    }

    async fn get(&self, id: &str) -> Option<SessionHandle<T>> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(id).map(|entry| {
            entry.last_activity = Utc::now();
            Arc::clone(&entry.handle)
        })
    }

    async fn get_or_insert(&self, id: &str, session: T) -> SessionHandle<T> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session = id, "Session created");
            Entry::new(session)
        });
        entry.last_activity = Utc::now();
        Arc::clone(&entry.handle)
    }

    async fn evict(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session = id, "Session evicted");
        }
        removed
    }

    async fn evict_idle(&self, max_idle: Duration) -> usize {
        let max_idle =
            chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let cutoff = Utc::now()
            .checked_sub_signed(max_idle)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_inactive_since(cutoff).await
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemorySessionStore::new();
        store.insert("a", vec![1]).await;

        let handle = store.get("a").await.unwrap();
        handle.lock().await.push(2);

        let again = store.get("a").await.unwrap();
        assert_eq!(*again.lock().await, vec![1, 2]);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_insert_keeps_existing() {
        let store = InMemorySessionStore::new();
        store.get_or_insert("user", "first").await;
        let handle = store.get_or_insert("user", "second").await;

        assert_eq!(*handle.lock().await, "first");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict() {
        let store = InMemorySessionStore::new();
        store.insert("a", ()).await;

        assert!(store.evict("a").await);
        assert!(!store.evict("a").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let store = InMemorySessionStore::new();
        store.insert("old", 1).await;
        store.insert("new", 2).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);

        let future = Utc::now() + chrono::Duration::seconds(10);
        assert_eq!(store.evict_inactive_since(future).await, 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_same_session_is_serialised() {
        let store = InMemorySessionStore::new();
        store.insert("s", 0u32).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let handle = store.get("s").await.unwrap();
                let mut guard = handle.lock().await;
                let value = *guard;
                tokio::task::yield_now().await;
                *guard = value + 1;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*store.get("s").await.unwrap().lock().await, 20);
    }
}
