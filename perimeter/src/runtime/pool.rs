//! Per-handler worker pools.

use super::rate_limit::RateLimiter;
use crate::asset::AssetType;
use crate::dispatcher::{DispatchHandle, EventDataElement};
use crate::registry::{Handler, HandlerContext, Registry};
use crate::session::SessionManager;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-plugin QPS when the configuration does not override it.
pub const DEFAULT_PLUGIN_QPS: f64 = 10.0;

/// Handler-runtime configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// QPS applied to plugins without an explicit override.
    pub default_qps: f64,
    /// Per-plugin QPS overrides keyed by plugin name.
    pub plugin_qps: HashMap<String, f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_qps: DEFAULT_PLUGIN_QPS,
            plugin_qps: HashMap::new(),
        }
    }
}

/// Worker pools executing the registered pipelines.
///
/// Built from a registry snapshot once plugin registration has finished;
/// handlers registered afterwards are not picked up until a rebuild.
pub struct HandlerRuntime {
    inputs: HashMap<AssetType, mpsc::UnboundedSender<EventDataElement>>,
    done: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HandlerRuntime {
    /// Builds worker pools for every pipeline currently in the registry.
    ///
    /// `completion_tx` receives each element after its final stage.
    pub fn build(
        registry: &Registry,
        config: RuntimeConfig,
        manager: Arc<SessionManager>,
        dispatcher: DispatchHandle,
        completion_tx: mpsc::UnboundedSender<EventDataElement>,
    ) -> Self {
        let done = CancellationToken::new();
        let limiters: DashMap<String, Arc<RateLimiter>> = DashMap::new();
        let mut inputs = HashMap::new();
        let mut workers = Vec::new();

        for event_type in registry.event_types() {
            let pipeline = registry.get_pipeline(event_type);

            // Wire the chain back to front so each stage knows its output.
            let mut next_tx = completion_tx.clone();
            for handler in pipeline.iter().rev() {
                let (stage_tx, stage_rx) = mpsc::unbounded_channel();
                let stage_rx = Arc::new(tokio::sync::Mutex::new(stage_rx));

                let limiter = limiters
                    .entry(handler.plugin.clone())
                    .or_insert_with(|| {
                        let qps = config
                            .plugin_qps
                            .get(&handler.plugin)
                            .copied()
                            .unwrap_or(config.default_qps);
                        Arc::new(RateLimiter::new(qps))
                    })
                    .clone();

                for _ in 0..handler.max_instances {
                    workers.push(tokio::spawn(stage_worker(
                        handler.clone(),
                        Arc::clone(&stage_rx),
                        next_tx.clone(),
                        Arc::clone(&manager),
                        dispatcher.clone(),
                        Arc::clone(&limiter),
                        done.clone(),
                    )));
                }
                next_tx = stage_tx;
            }

            debug!(
                event_type = %event_type,
                stages = pipeline.len(),
                "Pipeline workers started"
            );
            inputs.insert(event_type, next_tx);
        }

        Self {
            inputs,
            done,
            workers: Mutex::new(workers),
        }
    }

    /// Routes an element into the pipeline for its asset type.
    ///
    /// Hands the element back when no pipeline exists for the type (or the
    /// pool is shut down); the caller completes it itself in that case.
    pub fn submit(&self, element: EventDataElement) -> Result<(), EventDataElement> {
        match self.inputs.get(&element.event.asset.asset_type()) {
            Some(tx) => tx.send(element).map_err(|err| err.0),
            None => Err(element),
        }
    }

    /// Stops all worker pools and waits for them to unwind.
    pub async fn shutdown(&self) {
        self.done.cancel();
        let workers: Vec<JoinHandle<()>> =
            self.workers.lock().expect("worker list poisoned").drain(..).collect();
        futures::future::join_all(workers).await;
    }
}

/// One worker of a handler's pool.
///
/// Workers share the stage receiver behind a mutex; whichever worker holds
/// the lock waits for the next element, releases the lock, and processes.
async fn stage_worker(
    handler: Handler,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<EventDataElement>>>,
    next_tx: mpsc::UnboundedSender<EventDataElement>,
    manager: Arc<SessionManager>,
    dispatcher: DispatchHandle,
    limiter: Arc<RateLimiter>,
    done: CancellationToken,
) {
    loop {
        let element = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = done.cancelled() => None,
                element = rx.recv() => element,
            }
        };
        let Some(mut element) = element else { break };

        match manager.get(element.event.session_id) {
            Some(session) if !session.is_done() => {
                limiter.acquire().await;
                let ctx = HandlerContext {
                    name: element.event.name.clone(),
                    session,
                    asset: element.event.asset.clone(),
                    dispatcher: dispatcher.clone(),
                };
                if let Err(err) = handler.callback.handle(&ctx).await {
                    warn!(
                        handler = %handler.name,
                        event = %element.event.name,
                        error = %err,
                        "Handler returned an error"
                    );
                    if element.error.is_none() {
                        element.error = Some(err);
                    }
                }
            }
            _ => {
                debug!(
                    handler = %handler.name,
                    session_id = %element.event.session_id,
                    "Session gone or terminated, passing element through"
                );
            }
        }

        // Forward regardless of outcome so completion counters stay exact.
        let _ = next_tx.send(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::dispatcher::AssetEvent;
    use crate::registry::{HandlerCallback, HandlerError};
    use crate::session::SessionConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallback {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl HandlerCallback for CountingCallback {
        async fn handle(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HandlerError::failed("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn counting_handler(name: &str, priority: i32, calls: Arc<AtomicUsize>, fail: bool) -> Handler {
        Handler {
            plugin: "test".to_string(),
            name: name.to_string(),
            event_type: AssetType::Fqdn,
            transforms: vec!["fqdn".to_string()],
            priority,
            max_instances: 2,
            callback: Arc::new(CountingCallback { calls, fail }),
        }
    }

    fn runtime_fixture(
        registry: &Registry,
    ) -> (
        Arc<SessionManager>,
        HandlerRuntime,
        mpsc::UnboundedReceiver<EventDataElement>,
    ) {
        let manager = Arc::new(SessionManager::new());
        let (intake_tx, _intake_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let runtime = HandlerRuntime::build(
            registry,
            RuntimeConfig::default(),
            Arc::clone(&manager),
            DispatchHandle::new(intake_tx),
            completion_tx,
        );
        (manager, runtime, completion_rx)
    }

    #[tokio::test]
    async fn test_element_visits_every_stage() {
        let registry = Registry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        registry
            .register_handler(counting_handler("first", 1, Arc::clone(&first), false))
            .unwrap();
        registry
            .register_handler(counting_handler("second", 2, Arc::clone(&second), false))
            .unwrap();

        let (manager, runtime, mut completion_rx) = runtime_fixture(&registry);
        let session = manager.new_session(SessionConfig::default());

        let event = AssetEvent::new("example.com", session.id(), Asset::fqdn("example.com"));
        runtime.submit(EventDataElement::new(event)).unwrap();

        let element = completion_rx.recv().await.expect("element should complete");
        assert!(element.error.is_none());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_error_sticks_to_element() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_handler(counting_handler("fails", 1, Arc::clone(&calls), true))
            .unwrap();
        registry
            .register_handler(counting_handler("after", 2, Arc::clone(&calls), false))
            .unwrap();

        let (manager, runtime, mut completion_rx) = runtime_fixture(&registry);
        let session = manager.new_session(SessionConfig::default());

        let event = AssetEvent::new("example.com", session.id(), Asset::fqdn("example.com"));
        runtime.submit(EventDataElement::new(event)).unwrap();

        let element = completion_rx.recv().await.expect("element should complete");
        assert!(element.error.is_some());
        // Both stages still ran.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_pipeline_returns_element() {
        let registry = Registry::new();
        let (manager, runtime, _completion_rx) = runtime_fixture(&registry);
        let session = manager.new_session(SessionConfig::default());

        let event = AssetEvent::new("example.com", session.id(), Asset::fqdn("example.com"));
        assert!(runtime.submit(EventDataElement::new(event)).is_err());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminated_session_passes_through() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_handler(counting_handler("only", 1, Arc::clone(&calls), false))
            .unwrap();

        let (manager, runtime, mut completion_rx) = runtime_fixture(&registry);
        let session = manager.new_session(SessionConfig::default());
        let sid = session.id();
        manager.terminate(sid);

        let event = AssetEvent::new("example.com", sid, Asset::fqdn("example.com"));
        runtime.submit(EventDataElement::new(event)).unwrap();

        let element = completion_rx.recv().await.expect("element should complete");
        assert!(element.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        runtime.shutdown().await;
    }
}
