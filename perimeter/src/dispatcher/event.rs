//! Work-item types flowing between the dispatcher and the handler runtime.

use crate::asset::Asset;
use crate::registry::HandlerError;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A unit of asset work submitted to the dispatcher.
#[derive(Clone, Debug)]
pub struct AssetEvent {
    /// Human label, usually the asset name that produced the event.
    pub name: String,
    /// The owning session.
    pub session_id: Uuid,
    /// The asset to examine.
    pub asset: Asset,
}

impl AssetEvent {
    pub fn new(name: impl Into<String>, session_id: Uuid, asset: Asset) -> Self {
        Self {
            name: name.into(),
            session_id,
            asset,
        }
    }
}

/// An [`AssetEvent`] wrapped for pipeline transit.
///
/// The first handler error encountered along the pipeline sticks to the
/// element and is logged when the element reaches the completion drain.
#[derive(Debug)]
pub struct EventDataElement {
    pub event: AssetEvent,
    pub error: Option<HandlerError>,
}

impl EventDataElement {
    pub fn new(event: AssetEvent) -> Self {
        Self { event, error: None }
    }
}

/// Clone-able handle for feeding discovered assets back into the engine.
///
/// Handlers must route new assets through this handle rather than touching
/// pipeline queues; the dispatcher applies deduplication and routing before
/// anything is enqueued. Sends never block; duplicate rejections surface on
/// the dispatcher side as debug logs and are benign for the producer.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<AssetEvent>,
}

impl DispatchHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AssetEvent>) -> Self {
        Self { tx }
    }

    /// Submits an asset event for dispatch.
    pub fn dispatch(&self, event: AssetEvent) {
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle").finish_non_exhaustive()
    }
}
