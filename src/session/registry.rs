//! Concurrent session registry.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::observability::metrics;
use crate::protocol::server::SessionStatus;
use crate::session::session::{Session, SessionId};

/// A thread-safe map of connection identity to session.
///
/// Cloning shares the same map. Create and remove are atomic per key, so
/// lifecycle events of independent sessions never interfere.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it if absent.
    pub fn create(&self, id: SessionId) -> Arc<Session> {
        let mut created = false;
        let session = self
            .inner
            .entry(id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Session::new(id.clone()))
            })
            .value()
            .clone();

        if created {
            tracing::debug!(session_id = %id, "Session registered");
            metrics::record_session_opened(self.inner.len());
        }
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and destroy the session. Only the first call for an ID
    /// returns it; later calls are no-ops.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.inner.remove(id)?;
        session.destroy();

        let lifetime = SystemTime::now()
            .duration_since(session.created_at())
            .unwrap_or_default();
        tracing::debug!(session_id = %id, lifetime_secs = lifetime.as_secs_f64(), "Session removed");
        metrics::record_session_closed(self.inner.len(), lifetime);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Status of every registered session.
    pub fn snapshot(&self) -> Vec<SessionStatus> {
        self.inner.iter().map(|entry| entry.value().status()).collect()
    }
}
