//! Event dispatcher.
//!
//! Entry point for external producers: the API front-end seeds assets here,
//! and every handler that discovers a new asset feeds it back through the
//! same door. The dispatcher deduplicates against the session cache, routes
//! the event to the pipeline registered for its asset type, and drains a
//! completion queue that keeps the session counters and logs current.

mod event;

pub use event::{AssetEvent, DispatchHandle, EventDataElement};

use crate::registry::Registry;
use crate::runtime::{HandlerRuntime, RuntimeConfig};
use crate::session::SessionManager;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors returned synchronously from [`Dispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event references a session the manager does not know.
    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    /// The asset was already dispatched in this session. Producers treat
    /// this as benign.
    #[error("this event has been scheduled previously: {0}")]
    AlreadyScheduled(String),
}

struct DispatcherCore {
    manager: Arc<SessionManager>,
    runtime: HandlerRuntime,
    completion_tx: mpsc::UnboundedSender<EventDataElement>,
}

impl DispatcherCore {
    fn dispatch(&self, event: AssetEvent) -> Result<(), DispatchError> {
        let session = self
            .manager
            .get(event.session_id)
            .ok_or(DispatchError::UnknownSession(event.session_id))?;

        let key = event.asset.key();
        if session.cache().get_asset(&key).is_some() {
            return Err(DispatchError::AlreadyScheduled(key));
        }
        session.cache().set_asset(&event.asset);
        session.stats().record_received();

        if let Err(element) = self.runtime.submit(EventDataElement::new(event)) {
            // No pipeline for this asset type: complete immediately.
            let _ = self.completion_tx.send(element);
        }
        Ok(())
    }

    fn complete(&self, element: EventDataElement) {
        if let Some(err) = &element.error {
            warn!(event = %element.event.name, error = %err, "Work item failed");
        }
        if let Some(session) = self.manager.get(element.event.session_id) {
            session.stats().record_completed();
        }
        debug!(event = %element.event.name, "Work item completed");
    }
}

/// Deduplicates, routes, and completes asset events.
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
    handle: DispatchHandle,
    intake_done: CancellationToken,
    drain_done: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Builds the handler runtime from the registry and starts the intake
    /// and completion-drain tasks.
    ///
    /// Call after all plugins have registered their handlers.
    pub fn start(
        registry: &Registry,
        manager: Arc<SessionManager>,
        config: RuntimeConfig,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let handle = DispatchHandle::new(intake_tx);

        let runtime = HandlerRuntime::build(
            registry,
            config,
            Arc::clone(&manager),
            handle.clone(),
            completion_tx.clone(),
        );

        let core = Arc::new(DispatcherCore {
            manager,
            runtime,
            completion_tx,
        });

        let intake_done = CancellationToken::new();
        let drain_done = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(intake(Arc::clone(&core), intake_rx, intake_done.clone())),
            tokio::spawn(drain(Arc::clone(&core), completion_rx, drain_done.clone())),
        ];

        Self {
            core,
            handle,
            intake_done,
            drain_done,
            tasks: Mutex::new(tasks),
        }
    }

    /// Dispatches an asset event.
    ///
    /// The first dispatch with a given asset key wins; all subsequent
    /// attempts fail with [`DispatchError::AlreadyScheduled`].
    pub fn dispatch(&self, event: AssetEvent) -> Result<(), DispatchError> {
        self.core.dispatch(event)
    }

    /// A clone-able handle for handlers to feed discoveries back in.
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stops intake, drains the worker pools, and flushes the completion
    /// queue before returning.
    pub async fn shutdown(&self) {
        self.intake_done.cancel();
        self.core.runtime.shutdown().await;
        self.drain_done.cancel();

        let tasks: Vec<JoinHandle<()>> =
            self.tasks.lock().expect("task list poisoned").drain(..).collect();
        futures::future::join_all(tasks).await;
    }
}

/// Drains handler-submitted events into `dispatch`.
async fn intake(
    core: Arc<DispatcherCore>,
    mut rx: mpsc::UnboundedReceiver<AssetEvent>,
    done: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = done.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if let Err(err) = core.dispatch(event) {
            // Duplicate discoveries are the common case and not a fault.
            debug!(error = %err, "Handler dispatch rejected");
        }
    }
}

/// Drains finished work items, logging errors and updating counters.
async fn drain(
    core: Arc<DispatcherCore>,
    mut rx: mpsc::UnboundedReceiver<EventDataElement>,
    done: CancellationToken,
) {
    loop {
        let element = tokio::select! {
            _ = done.cancelled() => break,
            element = rx.recv() => match element {
                Some(element) => element,
                None => return,
            },
        };
        core.complete(element);
    }
    // Flush whatever completed before the shutdown signal.
    while let Ok(element) = rx.try_recv() {
        core.complete(element);
    }
}
