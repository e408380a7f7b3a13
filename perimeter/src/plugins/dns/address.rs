//! Address discovery.
//!
//! Resolves A and AAAA records for in-scope FQDN assets and dispatches the
//! resulting IP addresses as new assets.

use crate::asset::{Asset, AssetType};
use crate::dispatcher::AssetEvent;
use crate::plugins::{Plugin, PluginDeps, MAX_HANDLER_INSTANCES};
use crate::registry::{
    Handler, HandlerCallback, HandlerContext, HandlerError, Registry, RegistryError,
};
use async_trait::async_trait;
use hickory_proto::rr::RecordType;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

const PLUGIN_NAME: &str = "dns-address";
const HANDLER_NAME: &str = "dns-address-handler";

/// Plugin resolving A/AAAA records for FQDN assets.
pub struct AddressPlugin {
    deps: PluginDeps,
}

impl AddressPlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Plugin for AddressPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn start(&self, registry: &Registry) -> Result<(), RegistryError> {
        registry.register_handler(Handler {
            plugin: PLUGIN_NAME.to_string(),
            name: HANDLER_NAME.to_string(),
            event_type: AssetType::Fqdn,
            transforms: vec!["ipaddress".to_string()],
            priority: 2,
            max_instances: MAX_HANDLER_INSTANCES,
            callback: Arc::new(AddressCallback {
                deps: self.deps.clone(),
            }),
        })
    }

    fn stop(&self) {
        info!(plugin = PLUGIN_NAME, "Plugin stopped");
    }
}

struct AddressCallback {
    deps: PluginDeps,
}

#[async_trait]
impl HandlerCallback for AddressCallback {
    async fn handle(&self, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let Asset::Fqdn { name } = &ctx.asset else {
            return Err(HandlerError::WrongAssetType {
                handler: HANDLER_NAME.to_string(),
            });
        };

        let matches = ctx
            .session
            .config()
            .check_transformations(AssetType::Fqdn, AssetType::IpAddress, "dns")
            .map_err(|err| HandlerError::failed(err.to_string()))?;
        if !matches.is_match("ipaddress") {
            return Ok(());
        }
        if !ctx.session.config().is_domain_in_scope(name) {
            return Ok(());
        }

        for qtype in [RecordType::A, RecordType::AAAA] {
            if ctx.session.is_done() {
                return Ok(());
            }
            if let Ok(records) = self.deps.resolvers.perform_query(name, qtype).await {
                for record in records {
                    let Ok(address) = record.data.parse::<IpAddr>() else {
                        continue;
                    };
                    self.record_address(ctx, record.name, address);
                }
            }
        }
        Ok(())
    }
}

impl AddressCallback {
    fn record_address(&self, ctx: &HandlerContext, fqdn: String, address: IpAddr) {
        let session = Arc::clone(&ctx.session);
        let dispatcher = ctx.dispatcher.clone();

        self.deps.db.append(async move {
            let graph = session.graph();
            let target = match graph.upsert_address(&fqdn, address).await {
                Ok(target) => target,
                Err(err) => {
                    warn!(
                        session_id = %session.id(),
                        fqdn = %fqdn,
                        error = %err,
                        "Address graph write failed"
                    );
                    return;
                }
            };

            dispatcher.dispatch(AssetEvent::new(
                address.to_string(),
                session.id(),
                target.clone(),
            ));

            let source = Asset::fqdn(&fqdn);
            if session.cache().get_asset(&source.key()).is_some() {
                let kind = if address.is_ipv4() { "a_record" } else { "aaaa_record" };
                session.cache().set_relation(&source, &target, kind);
                info!(
                    session_id = %session.id(),
                    from = %fqdn,
                    relation = kind,
                    to = %address,
                    plugin = PLUGIN_NAME,
                    "Relationship discovered"
                );
            }
        });
    }
}
