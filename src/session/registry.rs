//! Process-wide table of live sessions

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::connection::{ConnectionSession, SessionInfo};
use crate::error::{AppError, Result};

/// Number of recently closed ids remembered for idempotent stops
const TOMBSTONE_CAPACITY: usize = 1024;

/// Result of [`SessionRegistry::stop_and_remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was live and has been closed and removed
    Stopped,
    /// The session was closed earlier
    AlreadyStopped,
    /// The id was never registered (or fell out of the tombstone window)
    NotFound,
}

#[derive(Default)]
struct Tombstones {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl Tombstones {
    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > TOMBSTONE_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, Arc<ConnectionSession>>,
    closed: Tombstones,
}

/// Registry of active sessions keyed by id, iterated in id order
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Register a session. Fails with [`AppError::ServiceUnavailable`] at
    /// capacity and [`AppError::BadRequest`] on a duplicate id.
    pub async fn add(&self, session: Arc<ConnectionSession>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.len() >= self.max_sessions {
            return Err(AppError::ServiceUnavailable(format!(
                "Maximum sessions ({}) reached",
                self.max_sessions
            )));
        }
        let id = session.id().to_string();
        if inner.sessions.contains_key(&id) {
            return Err(AppError::BadRequest(format!("Duplicate session id: {}", id)));
        }
        inner.sessions.insert(id.clone(), session);
        info!("Session {} registered ({} active)", id, inner.sessions.len());
        Ok(())
    }

    /// Remove a session by id. Missing ids are ignored.
    pub async fn remove(&self, id: &str) -> Option<Arc<ConnectionSession>> {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.remove(id);
        if removed.is_some() {
            inner.closed.insert(id.to_string());
            debug!("Session {} removed ({} active)", id, inner.sessions.len());
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ConnectionSession>> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.inner.read().await.sessions.values().cloned().collect();
        sessions.iter().map(|s| s.info()).collect()
    }

    /// Close a session and remove it.
    ///
    /// Repeating the call for the same id reports
    /// [`StopOutcome::AlreadyStopped`]; only ids never seen are
    /// [`StopOutcome::NotFound`].
    pub async fn stop_and_remove(&self, id: &str) -> StopOutcome {
        // Not holding the lock while closing: close() calls back into remove()
        let session = {
            let inner = self.inner.read().await;
            match inner.sessions.get(id) {
                Some(session) => session.clone(),
                None if inner.closed.contains(id) => return StopOutcome::AlreadyStopped,
                None => return StopOutcome::NotFound,
            }
        };

        session.close().await;
        self.remove(id).await;
        info!("Session {} stopped", id);
        StopOutcome::Stopped
    }

    /// Close every session (shutdown)
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.inner.read().await.sessions.values().cloned().collect();
        if sessions.is_empty() {
            return;
        }
        info!("Closing {} session(s)", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        self.inner.write().await.sessions.clear();
    }
}
