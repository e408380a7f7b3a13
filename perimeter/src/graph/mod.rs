//! Graph store seam and write serialization.
//!
//! The persistent asset graph is an external collaborator; this module
//! defines the contract the engine consumes ([`GraphStore`]), an in-memory
//! implementation used by tests and database-less sessions, and the
//! [`DbQueue`] that funnels every graph write through a single worker task
//! so the store never sees concurrent writers.

mod queue;

pub use queue::DbQueue;

use crate::asset::Asset;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by graph-store implementations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The write was rejected by the backing store.
    #[error("graph write failed: {0}")]
    WriteFailed(String),

    /// The referenced parent asset does not exist in the store.
    #[error("unknown parent asset: {0}")]
    UnknownParent(String),
}

/// Contract for the persistent asset graph.
///
/// All methods upsert: creating an entity that already exists returns the
/// stored asset unchanged.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts `asset` and, when `parent` is given, an edge
    /// `parent -[relation]-> asset`.
    async fn create(
        &self,
        parent: Option<&Asset>,
        relation: &str,
        asset: &Asset,
    ) -> Result<Asset, GraphError>;

    /// Upserts an FQDN vertex.
    async fn upsert_fqdn(&self, name: &str) -> Result<Asset, GraphError>;

    /// Upserts `from -[cname_record]-> to` between two FQDN vertices.
    async fn upsert_cname(&self, from: &str, to: &str) -> Result<Asset, GraphError>;

    /// Upserts `fqdn -[a_record|aaaa_record]-> address`.
    async fn upsert_address(&self, fqdn: &str, address: IpAddr) -> Result<Asset, GraphError>;
}

/// An edge stored by [`MemoryGraphStore`].
#[derive(Clone, Debug)]
pub struct StoredEdge {
    pub from_key: String,
    pub relation: String,
    pub to_key: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory [`GraphStore`] used by tests and sessions without a database.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    assets: DashMap<String, Asset>,
    edges: Mutex<Vec<StoredEdge>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_asset(&self, asset: &Asset) -> Asset {
        self.assets
            .entry(asset.key())
            .or_insert_with(|| asset.clone())
            .value()
            .clone()
    }

    fn insert_edge(&self, from: &Asset, relation: &str, to: &Asset) {
        let mut edges = self.edges.lock().expect("edge index poisoned");
        let exists = edges
            .iter()
            .any(|e| e.from_key == from.key() && e.relation == relation && e.to_key == to.key());
        if !exists {
            edges.push(StoredEdge {
                from_key: from.key(),
                relation: relation.to_string(),
                to_key: to.key(),
                created_at: Utc::now(),
            });
        }
    }

    /// Number of stored assets.
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Snapshot of the stored edges.
    pub fn edges(&self) -> Vec<StoredEdge> {
        self.edges.lock().expect("edge index poisoned").clone()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn create(
        &self,
        parent: Option<&Asset>,
        relation: &str,
        asset: &Asset,
    ) -> Result<Asset, GraphError> {
        let stored = self.insert_asset(asset);
        if let Some(parent) = parent {
            let parent = self.insert_asset(parent);
            self.insert_edge(&parent, relation, &stored);
        }
        Ok(stored)
    }

    async fn upsert_fqdn(&self, name: &str) -> Result<Asset, GraphError> {
        Ok(self.insert_asset(&Asset::fqdn(name)))
    }

    async fn upsert_cname(&self, from: &str, to: &str) -> Result<Asset, GraphError> {
        let source = self.insert_asset(&Asset::fqdn(from));
        let target = self.insert_asset(&Asset::fqdn(to));
        self.insert_edge(&source, "cname_record", &target);
        Ok(target)
    }

    async fn upsert_address(&self, fqdn: &str, address: IpAddr) -> Result<Asset, GraphError> {
        let relation = if address.is_ipv4() {
            "a_record"
        } else {
            "aaaa_record"
        };
        let source = self.insert_asset(&Asset::fqdn(fqdn));
        let target = self.insert_asset(&Asset::ip_address(address));
        self.insert_edge(&source, relation, &target);
        Ok(target)
    }
}
