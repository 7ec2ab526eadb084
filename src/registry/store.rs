//! Session registry implementation
//!
//! The set of live sessions the fan-out engine delivers to. Each registered
//! session gets a lifecycle watcher that removes it once it reaches a
//! terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::session::{Session, SessionId};

struct Entry {
    session: Arc<Session>,
    watcher: JoinHandle<()>,
}

/// Registry of live sessions
///
/// Thread-safe via `RwLock`. Broadcasting only needs the read lock for the
/// time it takes to snapshot the session list.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session
    ///
    /// A session that is already terminal is removed again by its watcher as
    /// soon as the insert completes. A different session registered under the
    /// same id is replaced and torn down.
    pub async fn add(self: &Arc<Self>, session: Arc<Session>) {
        let id = session.id();
        let mut sessions = self.sessions.write().await;

        let watcher = self.spawn_watcher(&session);
        if let Some(previous) = sessions.insert(
            id,
            Entry {
                session: Arc::clone(&session),
                watcher,
            },
        ) {
            previous.watcher.abort();
            if !Arc::ptr_eq(&previous.session, &session) {
                tracing::warn!(session_id = %id, "Replacing session with duplicate id");
                previous.session.teardown();
            }
        }

        tracing::info!(
            session_id = %id,
            state = %session.state(),
            sessions = sessions.len(),
            "Session registered"
        );
    }

    fn spawn_watcher(self: &Arc<Self>, session: &Arc<Session>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = session.id();
        let mut state_rx = session.subscribe();

        tokio::spawn(async move {
            // Sender dropped means the session is gone; treat like terminal
            let terminal = state_rx.wait_for(|state| state.is_terminal()).await.ok().map(|s| *s);

            if let Some(registry) = registry.upgrade() {
                if registry.remove_entry(id, false).await {
                    tracing::info!(
                        session_id = %id,
                        state = ?terminal,
                        "Session removed on terminal state"
                    );
                }
            }
        })
    }

    /// Remove a session
    ///
    /// Idempotent: returns `false` if the session was not registered.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = self.remove_entry(id, true).await;
        if removed {
            tracing::info!(session_id = %id, "Session removed");
        }
        removed
    }

    async fn remove_entry(&self, id: SessionId, abort_watcher: bool) -> bool {
        let entry = self.sessions.write().await.remove(&id);

        match entry {
            Some(entry) => {
                // The watcher calls this itself; it must not abort its own task
                if abort_watcher {
                    entry.watcher.abort();
                }
                entry.session.teardown();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the sessions currently connected
    pub async fn active(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|entry| entry.session.is_active())
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    /// Call `f` once per connected session
    ///
    /// Operates on a snapshot taken at call time; the registry lock is not
    /// held while `f` runs.
    pub async fn for_each_active<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.active().await {
            if session.is_active() {
                f(&session);
            }
        }
    }

    /// Look up a session by id
    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| Arc::clone(&entry.session))
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Number of registered sessions (any non-terminal state)
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove every session, e.g. on shutdown
    ///
    /// Returns the removed sessions so the caller can close them.
    pub async fn clear(&self) -> Vec<Arc<Session>> {
        let entries: Vec<Entry> = self.sessions.write().await.drain().map(|(_, e)| e).collect();
        entries
            .into_iter()
            .map(|entry| {
                entry.watcher.abort();
                entry.session.teardown();
                entry.session
            })
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
