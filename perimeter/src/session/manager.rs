//! Session table.

use super::{Session, SessionConfig};
use crate::graph::{GraphStore, MemoryGraphStore};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Creates, tracks, and tears down sessions.
///
/// Sessions live in a sharded map keyed by ID. Terminating a session cancels
/// its `done` token so handler callbacks bound to it unwind; the handler
/// worker pools themselves are owned by the dispatcher runtime and drained
/// on engine shutdown.
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session backed by an in-memory graph store.
    pub fn new_session(&self, config: SessionConfig) -> Arc<Session> {
        self.new_session_with_graph(config, Arc::new(MemoryGraphStore::new()))
    }

    /// Creates a session with an explicit graph-store handle.
    pub fn new_session_with_graph(
        &self,
        config: SessionConfig,
        graph: Arc<dyn GraphStore>,
    ) -> Arc<Session> {
        let id = Uuid::new_v4();
        let session = Arc::new(Session::new(id, config, graph));
        self.sessions.insert(id, Arc::clone(&session));
        info!(session_id = %id, "Session created");
        session
    }

    /// Looks up a session by ID.
    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Terminates a session: cancels its token and drops it from the table.
    pub fn terminate(&self, id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.done().cancel();
            info!(session_id = %id, "Session terminated");
        }
    }

    /// Terminates every session.
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.terminate(id);
        }
    }

    /// Number of live sessions.
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

    #[test]
    fn test_new_session_is_retrievable() {
        let mgr = SessionManager::new();
        let session = mgr.new_session(SessionConfig::in_scope(["example.com"]));

        let found = mgr.get(session.id()).expect("session should exist");
        assert_eq!(found.id(), session.id());
        assert!(found.config().is_domain_in_scope("www.example.com"));
    }

    #[test]
    fn test_terminate_cancels_done_token() {
        let mgr = SessionManager::new();
        let session = mgr.new_session(SessionConfig::default());
        assert!(!session.is_done());

        mgr.terminate(session.id());
        assert!(session.is_done());
        assert!(mgr.get(session.id()).is_none());
    }

    #[test]
    fn test_shutdown_terminates_all_sessions() {
        let mgr = SessionManager::new();
        let a = mgr.new_session(SessionConfig::default());
        let b = mgr.new_session(SessionConfig::default());

        mgr.shutdown();
        assert!(a.is_done());
        assert!(b.is_done());
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_get_unknown_session_returns_none() {
        let mgr = SessionManager::new();
        assert!(mgr.get(Uuid::new_v4()).is_none());
    }
}
