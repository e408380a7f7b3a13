//! Sessions and the session manager.
//!
//! A session owns everything scoped to one discovery run: the configuration
//! snapshot, the deduplication cache, work-item counters, the graph-store
//! handle, and the `done` token that handler callbacks poll to stop early.

mod config;
mod manager;
mod stats;

pub use config::{
    Credentials, DataSourceConfig, DiscoveryFlags, Matches, SessionConfig, SessionError, Transform,
};
pub use manager::SessionManager;
pub use stats::{SessionStats, SessionStatsSnapshot};

use crate::cache::SessionCache;
use crate::graph::GraphStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One discovery session.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    cache: SessionCache,
    stats: SessionStats,
    graph: Arc<dyn GraphStore>,
    done: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: Uuid, config: SessionConfig, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            id,
            config,
            cache: SessionCache::new(),
            stats: SessionStats::new(),
            graph,
            done: CancellationToken::new(),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The configuration snapshot taken at session creation.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's deduplication cache.
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Work-item counters for this session.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Handle to the persistent asset graph.
    pub fn graph(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.graph)
    }

    /// Token cancelled when the session is terminated.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Returns `true` once the session has been terminated.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("assets_seen", &self.cache.asset_count())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
