//! Session directory: owner of every live `ServerSession`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::domain::entities::ServerSession;
use crate::domain::value_objects::SessionId;
use crate::infrastructure::metrics;

#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: DashMap<SessionId, Arc<ServerSession>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly handshaken session
    pub fn register(&self, session: Arc<ServerSession>) {
        let id = session.id().clone();
        self.sessions.insert(id.clone(), session);
        metrics::set_sessions_active(self.sessions.len());

        tracing::debug!(session_id = %id, "Session registered");
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a session. The caller is responsible for disconnecting it.
    pub fn deregister(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            metrics::set_sessions_active(self.sessions.len());
            tracing::debug!(session_id = %id, "Session deregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of every session handle
    pub fn snapshot(&self) -> Vec<Arc<ServerSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn suspended_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().has_pending())
            .count()
    }

    /// Sessions eligible for removal at `now`.
    ///
    /// A session is expired when it holds no suspended connect and either it
    /// was disconnected or, with no connect in flight, its last renewal is
    /// older than `max_interval`. Renewals are stamped when a connect arrives
    /// and again when its reply is built.
    pub fn expired(&self, now: Instant, max_interval: Duration) -> Vec<Arc<ServerSession>> {
        self.sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                if session.has_pending() {
                    return false;
                }
                if !session.is_connected() {
                    return true;
                }
                !session.is_connecting()
                    && now.saturating_duration_since(session.last_connect()) > max_interval
            })
            .map(|entry| entry.value().clone())
            .collect()
    }
}
