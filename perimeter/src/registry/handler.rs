//! The handler contract.
//!
//! A registered handler is the unit a plugin contributes to a pipeline.
//! Its callback receives a [`HandlerContext`] carrying the asset event, the
//! owning session, and a dispatch handle; newly discovered assets must go
//! back through the dispatcher, never into a queue directly.

use crate::asset::{Asset, AssetType};
use crate::dispatcher::DispatchHandle;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// An error returned by a handler callback.
///
/// Handler errors are captured on the work item, logged when the item
/// completes, and counted; they never abort the pipeline.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    /// The pipeline delivered an asset variant the handler cannot process.
    #[error("handler '{handler}' cannot process this asset type")]
    WrongAssetType { handler: String },
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Everything a handler callback may touch while processing one event.
pub struct HandlerContext {
    /// Human label of the work item.
    pub name: String,
    /// The session this work item belongs to.
    pub session: Arc<Session>,
    /// The asset under examination.
    pub asset: Asset,
    /// Handle for feeding newly discovered assets back into the engine.
    pub dispatcher: DispatchHandle,
}

impl HandlerContext {
    /// Dispatches a newly discovered asset into the owning session.
    ///
    /// Duplicates are rejected by the session cache downstream; handlers
    /// treat that as benign and do not observe it.
    pub fn discovered(&self, name: impl Into<String>, asset: Asset) {
        self.dispatcher.dispatch(crate::dispatcher::AssetEvent {
            name: name.into(),
            session_id: self.session.id(),
            asset,
        });
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }
}

/// The callback side of a registered handler.
#[async_trait]
pub trait HandlerCallback: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

/// A handler registration.
#[derive(Clone)]
pub struct Handler {
    /// Name of the plugin that registered this handler.
    pub plugin: String,
    /// Unique name within the pipeline for one event type.
    pub name: String,
    /// The asset type this handler consumes.
    pub event_type: AssetType,
    /// Target type tags this handler may produce, for transform checks.
    pub transforms: Vec<String>,
    /// Pipeline position; lower runs earlier.
    pub priority: i32,
    /// Worker-pool size for this handler.
    pub max_instances: usize,
    pub callback: Arc<dyn HandlerCallback>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("max_instances", &self.max_instances)
            .finish_non_exhaustive()
    }
}
