//! Handler registry.
//!
//! Plugins register handlers against asset types during startup; the
//! registry keeps one ordered pipeline per asset type. Pipelines are
//! immutable after all plugins have finished registering, but registration
//! during serving is still safe: each write replaces the pipeline with a
//! fresh copy behind an `Arc`, so readers never observe a partial update.

mod handler;

pub use handler::{Handler, HandlerCallback, HandlerContext, HandlerError};

use crate::asset::AssetType;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Errors returned from handler registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handler with this `(event_type, name)` pair already exists.
    #[error("handler '{name}' is already registered for {event_type}")]
    DuplicateHandler { event_type: AssetType, name: String },

    /// `max_instances` must allow at least one worker.
    #[error("handler '{name}' requested zero instances")]
    NoInstances { name: String },

    /// Handlers must carry a non-empty name.
    #[error("handler registration is missing a name")]
    MissingName,
}

/// Maps asset types to ordered handler pipelines.
#[derive(Default)]
pub struct Registry {
    pipelines: RwLock<HashMap<AssetType, Arc<Vec<Handler>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler into the pipeline for its event type.
    ///
    /// The pipeline stays sorted by `priority` ascending; handlers with
    /// equal priority keep registration order.
    pub fn register_handler(&self, handler: Handler) -> Result<(), RegistryError> {
        if handler.name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        if handler.max_instances < 1 {
            return Err(RegistryError::NoInstances {
                name: handler.name.clone(),
            });
        }

        let mut pipelines = self.pipelines.write().expect("pipeline table poisoned");
        let current = pipelines.entry(handler.event_type).or_default();
        if current.iter().any(|h| h.name == handler.name) {
            return Err(RegistryError::DuplicateHandler {
                event_type: handler.event_type,
                name: handler.name,
            });
        }

        debug!(
            plugin = %handler.plugin,
            handler = %handler.name,
            event_type = %handler.event_type,
            priority = handler.priority,
            "Handler registered"
        );

        // Copy-on-write: readers hold the previous Arc until they finish.
        let mut next: Vec<Handler> = current.as_ref().clone();
        let at = next.partition_point(|h| h.priority <= handler.priority);
        next.insert(at, handler);
        *current = Arc::new(next);
        Ok(())
    }

    /// Returns the ordered pipeline for an asset type.
    ///
    /// An asset type with no registered handlers yields an empty pipeline,
    /// not an error; the dispatcher completes such events immediately.
    pub fn get_pipeline(&self, event_type: AssetType) -> Arc<Vec<Handler>> {
        self.pipelines
            .read()
            .expect("pipeline table poisoned")
            .get(&event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Asset types that currently have at least one handler.
    pub fn event_types(&self) -> Vec<AssetType> {
        self.pipelines
            .read()
            .expect("pipeline table poisoned")
            .iter()
            .filter(|(_, pipeline)| !pipeline.is_empty())
            .map(|(event_type, _)| *event_type)
            .collect()
    }
}
