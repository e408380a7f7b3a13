//! Discovery plugins.
//!
//! A plugin contributes one or more handlers to the registry during
//! `start` and is stopped only at process shutdown. The built-in set
//! covers DNS discovery; data-source plugins (APIs, scrapers) follow the
//! same contract and register through the same loader.

pub mod dns;

use crate::graph::DbQueue;
use crate::registry::{Registry, RegistryError};
use crate::resolver::ResolverPool;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Worker-pool size handlers request unless they need something tighter.
pub const MAX_HANDLER_INSTANCES: usize = 10;

/// A discovery plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Registers this plugin's handlers.
    async fn start(&self, registry: &Registry) -> Result<(), RegistryError>;

    /// Called once at process shutdown.
    fn stop(&self);
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

/// Shared collaborators handed to every built-in plugin.
#[derive(Clone)]
pub struct PluginDeps {
    pub resolvers: Arc<ResolverPool>,
    pub db: Arc<DbQueue>,
}

/// The plugins compiled into the engine.
pub fn built_in_plugins(deps: &PluginDeps) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(dns::CnamePlugin::new(deps.clone())),
        Arc::new(dns::AddressPlugin::new(deps.clone())),
    ]
}

/// Starts every built-in plugin, stopping the already-started ones when a
/// later one fails.
pub async fn load_and_start_plugins(
    registry: &Registry,
    deps: &PluginDeps,
) -> Result<Vec<Arc<dyn Plugin>>, RegistryError> {
    let mut started: Vec<Arc<dyn Plugin>> = Vec::new();
    for plugin in built_in_plugins(deps) {
        if let Err(err) = plugin.start(registry).await {
            for plugin in &started {
                plugin.stop();
            }
            return Err(err);
        }
        info!(plugin = %plugin.name(), "Plugin started");
        started.push(plugin);
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> PluginDeps {
        PluginDeps {
            resolvers: Arc::new(ResolverPool::new()),
            db: Arc::new(DbQueue::start()),
        }
    }

    #[tokio::test]
    async fn test_built_in_plugins_register_fqdn_pipeline() {
        let registry = Registry::new();
        let deps = deps();
        let plugins = load_and_start_plugins(&registry, &deps).await.unwrap();
        assert_eq!(plugins.len(), 2);

        let pipeline = registry.get_pipeline(crate::asset::AssetType::Fqdn);
        assert_eq!(pipeline.len(), 2);
        // CNAME resolution runs before address resolution.
        assert!(pipeline[0].priority <= pipeline[1].priority);
    }

    #[tokio::test]
    async fn test_double_load_fails_with_duplicate() {
        let registry = Registry::new();
        let deps = deps();
        load_and_start_plugins(&registry, &deps).await.unwrap();
        let err = load_and_start_plugins(&registry, &deps).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateHandler { .. }));
    }
}
