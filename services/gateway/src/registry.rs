//! In-memory session registry.
//!
//! Three indices kept mutually consistent under one write guard:
//! socket -> session, `(userId, deviceId)` -> session, userId -> sessions.
//! Lookups are O(1) average; per-user iteration touches only that user's
//! sessions.  Callers never hold a guard across I/O — every method copies
//! what it needs out and drops the lock before returning.

use crate::session::SessionHandle;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Indices {
    by_socket: HashMap<Uuid, Arc<SessionHandle>>,
    by_user_device: HashMap<(i64, String), Uuid>,
    by_user: HashMap<i64, HashSet<Uuid>>,
}

impl Indices {
    fn unlink(&mut self, socket_id: Uuid) -> Option<Arc<SessionHandle>> {
        let session = self.by_socket.remove(&socket_id)?;
        self.by_user_device
            .remove(&(session.user_id, session.device_id.clone()));
        if let Some(sockets) = self.by_user.get_mut(&session.user_id) {
            sockets.remove(&socket_id);
            if sockets.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Indices>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated session.
    ///
    /// If a session already holds the same `(userId, deviceId)` it is
    /// atomically replaced and returned; the caller kicks it *after* this
    /// returns, so lookups already see the new session while the displaced
    /// socket is still closing.
    pub async fn add(&self, session: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let mut inner = self.inner.write().await;
        let old_socket = inner
            .by_user_device
            .get(&(session.user_id, session.device_id.clone()))
            .copied();
        let displaced = old_socket.and_then(|socket_id| inner.unlink(socket_id));
        inner
            .by_user_device
            .insert((session.user_id, session.device_id.clone()), session.socket_id);
        inner
            .by_user
            .entry(session.user_id)
            .or_default()
            .insert(session.socket_id);
        inner.by_socket.insert(session.socket_id, session);
        displaced
    }

    /// Remove a session by its socket id.
    ///
    /// Returns the removed session at most once across concurrent callers —
    /// the disconnect hook runs exactly once per session.
    pub async fn remove_by_socket(&self, socket_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.inner.write().await.unlink(socket_id)
    }

    pub async fn get(&self, user_id: i64, device_id: &str) -> Option<Arc<SessionHandle>> {
        let inner = self.inner.read().await;
        let socket_id = inner
            .by_user_device
            .get(&(user_id, device_id.to_owned()))?;
        inner.by_socket.get(socket_id).cloned()
    }

    pub async fn get_by_socket(&self, socket_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.inner.read().await.by_socket.get(&socket_id).cloned()
    }

    pub async fn sessions_for_user(&self, user_id: i64) -> Vec<Arc<SessionHandle>> {
        let inner = self.inner.read().await;
        match inner.by_user.get(&user_id) {
            Some(sockets) => sockets
                .iter()
                .filter_map(|sid| inner.by_socket.get(sid).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn all_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.inner.read().await.by_socket.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.by_socket.len()
    }
}
