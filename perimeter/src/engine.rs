//! Engine facade.
//!
//! Wires the registry, session manager, resolver pool, dispatcher, and
//! scheduler together, loads the built-in plugins, and exposes the
//! producer API the transport layer consumes: dispatch seed assets, manage
//! sessions, read counters, shut down.

use crate::dispatcher::{AssetEvent, DispatchError, Dispatcher};
use crate::graph::DbQueue;
use crate::plugins::{load_and_start_plugins, Plugin, PluginDeps};
use crate::registry::{Registry, RegistryError};
use crate::resolver::ResolverPool;
use crate::runtime::RuntimeConfig;
use crate::scheduler::{
    Event, EventOutcome, EventType, ProcessConfig, Scheduler, SchedulerError, SchedulerStats,
    SessionEventStats,
};
use crate::session::{SessionConfig, SessionManager, SessionStatsSnapshot};
use crate::asset::Asset;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from engine construction.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plugin startup failed: {0}")]
    PluginStart(#[from] RegistryError),
}

/// Construction-time settings.
#[derive(Clone, Debug, Default)]
pub struct EngineSettings {
    /// Handler-runtime configuration (worker QPS).
    pub runtime: RuntimeConfig,
    /// Scheduler process-loop configuration.
    pub process: ProcessConfig,
}

/// The assembled asset-discovery engine.
pub struct Engine {
    registry: Arc<Registry>,
    manager: Arc<SessionManager>,
    dispatcher: Dispatcher,
    scheduler: Arc<Scheduler>,
    resolvers: Arc<ResolverPool>,
    db_queue: Arc<DbQueue>,
    plugins: Vec<Arc<dyn Plugin>>,
    done: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Builds and starts the engine: plugins registered, worker pools
    /// running, scheduler process loop live.
    pub async fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let registry = Arc::new(Registry::new());
        let manager = Arc::new(SessionManager::new());
        let resolvers = Arc::new(ResolverPool::new());
        let db_queue = Arc::new(DbQueue::start());

        let deps = PluginDeps {
            resolvers: Arc::clone(&resolvers),
            db: Arc::clone(&db_queue),
        };
        let plugins = load_and_start_plugins(&registry, &deps).await?;

        // The dispatcher snapshots the registry, so plugins register first.
        let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), settings.runtime);

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let scheduler =
            Arc::new(Scheduler::with_sessions(Arc::clone(&manager)).with_outcome_sink(outcome_tx));

        let done = CancellationToken::new();
        let process_scheduler = Arc::clone(&scheduler);
        let process_config = settings.process.clone();
        let tasks = vec![
            tokio::spawn(async move { process_scheduler.process(process_config).await }),
            tokio::spawn(forward_outcomes(outcome_rx, done.clone())),
        ];

        info!(resolvers = resolvers.len(), plugins = plugins.len(), "Engine started");

        Ok(Self {
            registry,
            manager,
            dispatcher,
            scheduler,
            resolvers,
            db_queue,
            plugins,
            done,
            tasks: Mutex::new(tasks),
        })
    }

    /// Creates a session and returns its ID.
    pub fn create_session(&self, config: SessionConfig) -> Uuid {
        self.manager.new_session(config).id()
    }

    /// Terminates a session.
    pub fn terminate_session(&self, id: Uuid) {
        self.manager.terminate(id);
    }

    /// Dispatches an asset event into its session's pipeline.
    pub fn dispatch(&self, event: AssetEvent) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(event)
    }

    /// Convenience: dispatch a seed FQDN.
    pub fn dispatch_fqdn(&self, session_id: Uuid, name: &str) -> Result<(), DispatchError> {
        self.dispatch(AssetEvent::new(name, session_id, Asset::fqdn(name)))
    }

    /// Schedules an event on the scheduler.
    pub fn schedule(&self, event: Event) -> Result<Uuid, SchedulerError> {
        self.scheduler.schedule(event)
    }

    /// Cancels a scheduled event and its dependents.
    pub fn cancel(&self, uuid: Uuid) {
        self.scheduler.cancel(uuid);
    }

    /// Live scheduler work-item counts for one session.
    pub fn session_stats(&self, session_id: Uuid, filter: EventType) -> SessionEventStats {
        self.scheduler.session_stats(session_id, filter)
    }

    /// Dispatcher work-item counters for one session.
    pub fn session_work_items(&self, session_id: Uuid) -> Option<SessionStatsSnapshot> {
        self.manager.get(session_id).map(|s| s.stats().snapshot())
    }

    /// System-wide scheduler counters.
    pub fn system_stats(&self) -> SchedulerStats {
        self.scheduler.system_stats()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.manager
    }

    pub fn resolvers(&self) -> Arc<ResolverPool> {
        Arc::clone(&self.resolvers)
    }

    /// Tears the engine down: stops intake, drains handler pools, stops
    /// the scheduler, flushes graph writes, and terminates every session.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.scheduler.shutdown();
        self.done.cancel();

        let tasks: Vec<JoinHandle<()>> =
            self.tasks.lock().expect("task list poisoned").drain(..).collect();
        futures::future::join_all(tasks).await;

        self.db_queue.shutdown().await;
        for plugin in &self.plugins {
            plugin.stop();
        }
        self.manager.shutdown();
        info!("Engine stopped");
    }
}

/// Logs scheduler action outcomes as they complete.
async fn forward_outcomes(
    mut rx: mpsc::UnboundedReceiver<EventOutcome>,
    done: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            _ = done.cancelled() => break,
            outcome = rx.recv() => match outcome {
                Some(outcome) => outcome,
                None => return,
            },
        };
        match outcome.error {
            Some(err) => warn!(event = %outcome.name, error = %err, "Event completed with error"),
            None => debug!(event = %outcome.name, "Event completed"),
        }
    }
    while let Ok(outcome) = rx.try_recv() {
        if let Some(err) = outcome.error {
            warn!(event = %outcome.name, error = %err, "Event completed with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_builds_and_shuts_down() {
        let engine = Engine::new(EngineSettings::default()).await.unwrap();
        let sid = engine.create_session(SessionConfig::in_scope(["example.com"]));
        assert!(engine.sessions().get(sid).is_some());

        engine.shutdown().await;
        assert!(engine.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_engine_rejects_duplicate_seed() {
        let engine = Engine::new(EngineSettings::default()).await.unwrap();
        let sid = engine.create_session(SessionConfig::in_scope(["example.com"]));

        // Out of scope, so the DNS handlers skip it without touching the
        // network; the dedup happens before any handler runs.
        engine.dispatch_fqdn(sid, "other.example.org").unwrap();
        assert!(engine.dispatch_fqdn(sid, "other.example.org").is_err());

        engine.shutdown().await;
    }
}
