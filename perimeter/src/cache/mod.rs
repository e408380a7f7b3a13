//! Per-session deduplication cache.
//!
//! The cache is authoritative for "have we dispatched this asset?" during a
//! session's lifetime. It holds the asset-seen set and the asset-to-asset
//! relation edges that handlers use to avoid redundant graph writes. Nothing
//! here persists; durable state lives in the graph store.
//!
//! Both indexes are sharded maps, so concurrent handlers touch disjoint
//! shards and a single-writer update is visible atomically per key.

use crate::asset::Asset;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// An in-memory relation edge between two cached assets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedRelation {
    /// Relation kind, e.g. `cname_record` or `a_record`.
    pub kind: String,
    /// Cache key of the source asset.
    pub from_key: String,
    /// Cache key of the target asset.
    pub to_key: String,
    /// When the edge was first recorded.
    pub created_at: DateTime<Utc>,
    /// When the edge was last observed.
    pub last_seen: DateTime<Utc>,
}

/// Session-scoped asset and relation cache.
#[derive(Debug, Default)]
pub struct SessionCache {
    assets: DashMap<String, Asset>,
    relations: DashMap<String, Vec<CachedRelation>>,
}

impl SessionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an asset by its canonical key.
    pub fn get_asset(&self, key: &str) -> Option<Asset> {
        self.assets.get(key).map(|entry| entry.value().clone())
    }

    /// Inserts an asset, returning `true` only on the first insert.
    ///
    /// The insert is idempotent: repeated calls with an equal asset leave
    /// the cache unchanged and return `false`.
    pub fn set_asset(&self, asset: &Asset) -> bool {
        let mut first = false;
        self.assets.entry(asset.key()).or_insert_with(|| {
            first = true;
            asset.clone()
        });
        first
    }

    /// Records a relation edge between two assets.
    ///
    /// A new `(kind, to)` pair is appended; an existing pair only has its
    /// `last_seen` timestamp refreshed.
    pub fn set_relation(&self, from: &Asset, to: &Asset, kind: &str) {
        let now = Utc::now();
        let from_key = from.key();
        let to_key = to.key();

        let mut edges = self.relations.entry(from_key.clone()).or_default();
        if let Some(existing) = edges
            .iter_mut()
            .find(|r| r.kind == kind && r.to_key == to_key)
        {
            existing.last_seen = now;
            return;
        }
        edges.push(CachedRelation {
            kind: kind.to_string(),
            from_key,
            to_key,
            created_at: now,
            last_seen: now,
        });
    }

    /// Returns the relation edges recorded for the given source asset key.
    pub fn get_relations(&self, from_key: &str) -> Vec<CachedRelation> {
        self.relations
            .get(from_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of distinct assets seen by this session.
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_asset_first_insert_wins() {
        let cache = SessionCache::new();
        let asset = Asset::fqdn("example.com");

        assert!(cache.set_asset(&asset));
        assert!(!cache.set_asset(&asset));
        assert_eq!(cache.asset_count(), 1);
    }

    #[test]
    fn test_get_asset_round_trip() {
        let cache = SessionCache::new();
        let asset = Asset::fqdn("www.example.com");
        cache.set_asset(&asset);

        let hit = cache.get_asset(&asset.key());
        assert_eq!(hit, Some(asset));
        assert_eq!(cache.get_asset("fqdn:other.example.com"), None);
    }

    #[test]
    fn test_set_relation_deduplicates_edges() {
        let cache = SessionCache::new();
        let from = Asset::fqdn("www.example.com");
        let to = Asset::fqdn("cdn.example.net");

        cache.set_relation(&from, &to, "cname_record");
        let first = cache.get_relations(&from.key());
        assert_eq!(first.len(), 1);

        cache.set_relation(&from, &to, "cname_record");
        let second = cache.get_relations(&from.key());
        assert_eq!(second.len(), 1);
        assert!(second[0].last_seen >= first[0].last_seen);
    }

    #[test]
    fn test_set_relation_distinct_kinds() {
        let cache = SessionCache::new();
        let from = Asset::fqdn("example.com");
        let to = Asset::ip_address("93.184.216.34".parse().unwrap());

        cache.set_relation(&from, &to, "a_record");
        cache.set_relation(&from, &to, "aaaa_record");
        assert_eq!(cache.get_relations(&from.key()).len(), 2);
    }
}
