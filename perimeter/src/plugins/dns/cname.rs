//! CNAME discovery.
//!
//! For every in-scope FQDN event, resolves the CNAME chain one hop,
//! records the edge in the graph and the session cache, and feeds the
//! target back into the dispatcher as a new FQDN asset.

use crate::asset::{Asset, AssetType};
use crate::dispatcher::AssetEvent;
use crate::plugins::{Plugin, PluginDeps, MAX_HANDLER_INSTANCES};
use crate::registry::{
    Handler, HandlerCallback, HandlerContext, HandlerError, Registry, RegistryError,
};
use crate::resolver::ExtractedAnswer;
use async_trait::async_trait;
use hickory_proto::rr::RecordType;
use std::sync::Arc;
use tracing::{info, warn};

const PLUGIN_NAME: &str = "dns-cname";
const HANDLER_NAME: &str = "dns-cname-handler";

/// Plugin resolving CNAME records for FQDN assets.
pub struct CnamePlugin {
    deps: PluginDeps,
}

impl CnamePlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Plugin for CnamePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn start(&self, registry: &Registry) -> Result<(), RegistryError> {
        registry.register_handler(Handler {
            plugin: PLUGIN_NAME.to_string(),
            name: HANDLER_NAME.to_string(),
            event_type: AssetType::Fqdn,
            transforms: vec!["fqdn".to_string()],
            priority: 1,
            max_instances: MAX_HANDLER_INSTANCES,
            callback: Arc::new(CnameCallback {
                deps: self.deps.clone(),
            }),
        })
    }

    fn stop(&self) {
        info!(plugin = PLUGIN_NAME, "Plugin stopped");
    }
}

struct CnameCallback {
    deps: PluginDeps,
}

#[async_trait]
impl HandlerCallback for CnameCallback {
    async fn handle(&self, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let Asset::Fqdn { name } = &ctx.asset else {
            return Err(HandlerError::WrongAssetType {
                handler: HANDLER_NAME.to_string(),
            });
        };

        let matches = ctx
            .session
            .config()
            .check_transformations(AssetType::Fqdn, AssetType::Fqdn, "dns")
            .map_err(|err| HandlerError::failed(err.to_string()))?;
        if !matches.is_match("fqdn") {
            return Ok(());
        }
        if !ctx.session.config().is_domain_in_scope(name) || ctx.session.is_done() {
            return Ok(());
        }

        // NXDOMAIN and empty answers are ordinary outcomes here, not
        // handler failures.
        if let Ok(records) = self.deps.resolvers.perform_query(name, RecordType::CNAME).await {
            if !records.is_empty() {
                self.process_records(ctx, records);
            }
        }
        Ok(())
    }
}

impl CnameCallback {
    fn process_records(&self, ctx: &HandlerContext, records: Vec<ExtractedAnswer>) {
        for record in records {
            let session = Arc::clone(&ctx.session);
            let dispatcher = ctx.dispatcher.clone();

            self.deps.db.append(async move {
                let graph = session.graph();
                let target = match graph.upsert_cname(&record.name, &record.data).await {
                    Ok(target) => target,
                    Err(err) => {
                        warn!(
                            session_id = %session.id(),
                            from = %record.name,
                            error = %err,
                            "CNAME graph write failed"
                        );
                        return;
                    }
                };

                dispatcher.dispatch(AssetEvent::new(
                    record.data.clone(),
                    session.id(),
                    target.clone(),
                ));

                let source = Asset::fqdn(&record.name);
                if session.cache().get_asset(&source.key()).is_some() {
                    session.cache().set_relation(&source, &target, "cname_record");
                    info!(
                        session_id = %session.id(),
                        from = %record.name,
                        relation = "cname_record",
                        to = %record.data,
                        plugin = PLUGIN_NAME,
                        "Relationship discovered"
                    );
                }
            });
        }
    }
}
