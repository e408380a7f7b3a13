//! Session configuration snapshot.
//!
//! Scope rules, transformation policy, data-source credentials, and the
//! name-alteration feature flags. Loading this from disk belongs to the
//! outer application; the engine only consumes the snapshot.

use crate::asset::AssetType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors surfaced by session configuration lookups.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No transformation rule covers the requested source asset type.
    #[error("no transformations configured for {0}")]
    NoTransforms(AssetType),
}

/// A policy rule declaring that source asset type `from` may yield target
/// asset type `to` through the named data source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub from: AssetType,
    pub to: AssetType,
    /// Data-source filter; empty matches any source.
    #[serde(default)]
    pub source: String,
}

/// The transformation targets matched for one lookup.
#[derive(Clone, Debug, Default)]
pub struct Matches {
    to: HashSet<String>,
}

impl Matches {
    /// Returns `true` when the given target type tag was matched.
    pub fn is_match(&self, to: &str) -> bool {
        self.to.contains(to)
    }

    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
    }
}

/// Credentials for one data-source account.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub apikey: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Per-data-source configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(default)]
    pub creds: Vec<Credentials>,
}

/// Feature flags controlling name-alteration discovery.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiscoveryFlags {
    #[serde(default)]
    pub brute_forcing: bool,
    #[serde(default)]
    pub alterations: bool,
    #[serde(default)]
    pub flip_words: bool,
    #[serde(default)]
    pub flip_numbers: bool,
    #[serde(default)]
    pub add_numbers: bool,
    #[serde(default)]
    pub add_words: bool,
    #[serde(default)]
    pub edit_distance: usize,
    #[serde(default)]
    pub alt_wordlist: bool,
}

/// Immutable configuration owned by a session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// In-scope apex domains.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Transformation policy; empty permits every transformation.
    #[serde(default)]
    pub transforms: Vec<Transform>,
    /// Data-source credentials keyed by source name.
    #[serde(default)]
    pub data_sources: HashMap<String, DataSourceConfig>,
    #[serde(default)]
    pub flags: DiscoveryFlags,
}

impl SessionConfig {
    /// Convenience constructor scoping the session to the given apexes.
    pub fn in_scope<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            scope: domains
                .into_iter()
                .map(|d| d.as_ref().trim().trim_end_matches('.').to_lowercase())
                .collect(),
            ..Self::default()
        }
    }

    /// Returns the in-scope apex that `name` falls under, if any.
    pub fn which_domain(&self, name: &str) -> Option<String> {
        let name = name.trim().trim_end_matches('.').to_lowercase();
        self.scope
            .iter()
            .find(|apex| name == **apex || name.ends_with(&format!(".{apex}")))
            .cloned()
    }

    /// Returns `true` when `name` falls under an in-scope apex.
    pub fn is_domain_in_scope(&self, name: &str) -> bool {
        self.which_domain(name).is_some()
    }

    /// Evaluates the transformation policy for `from -> to` via `source`.
    ///
    /// With an empty policy every transformation is permitted. A policy
    /// that covers `from` but matches neither the target nor the source
    /// yields an empty match set; a policy that never mentions `from`
    /// is an error the caller treats as "handler disabled".
    pub fn check_transformations(
        &self,
        from: AssetType,
        to: AssetType,
        source: &str,
    ) -> Result<Matches, SessionError> {
        if self.transforms.is_empty() {
            let mut matched = HashSet::new();
            matched.insert(to.as_str().to_string());
            return Ok(Matches { to: matched });
        }

        let mut covered = false;
        let mut matched = HashSet::new();
        for rule in self.transforms.iter().filter(|r| r.from == from) {
            covered = true;
            let source_ok = rule.source.is_empty() || rule.source.eq_ignore_ascii_case(source);
            if rule.to == to && source_ok {
                matched.insert(rule.to.as_str().to_string());
            }
        }
        if !covered {
            return Err(SessionError::NoTransforms(from));
        }
        Ok(Matches { to: matched })
    }

    /// Looks up the configuration for a named data source.
    pub fn get_data_source_config(&self, name: &str) -> Option<&DataSourceConfig> {
        self.data_sources.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_which_domain_matches_subdomains() {
        let config = SessionConfig::in_scope(["Example.COM"]);
        assert_eq!(
            config.which_domain("foo.bar.example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(
            config.which_domain("example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(config.which_domain("notexample.com"), None);
        assert!(!config.is_domain_in_scope("example.org"));
    }

    #[test]
    fn test_empty_policy_permits_everything() {
        let config = SessionConfig::default();
        let matches = config
            .check_transformations(AssetType::Fqdn, AssetType::Fqdn, "dns")
            .unwrap();
        assert!(matches.is_match("fqdn"));
    }

    #[test]
    fn test_policy_filters_by_source() {
        let config = SessionConfig {
            transforms: vec![
                Transform {
                    from: AssetType::Fqdn,
                    to: AssetType::Fqdn,
                    source: "dns".to_string(),
                },
                Transform {
                    from: AssetType::Fqdn,
                    to: AssetType::IpAddress,
                    source: String::new(),
                },
            ],
            ..Default::default()
        };

        let dns = config
            .check_transformations(AssetType::Fqdn, AssetType::Fqdn, "dns")
            .unwrap();
        assert!(dns.is_match("fqdn"));

        let scrape = config
            .check_transformations(AssetType::Fqdn, AssetType::Fqdn, "scrape")
            .unwrap();
        assert!(!scrape.is_match("fqdn"));

        let any_source = config
            .check_transformations(AssetType::Fqdn, AssetType::IpAddress, "whatever")
            .unwrap();
        assert!(any_source.is_match("ipaddress"));
    }

    #[test]
    fn test_uncovered_source_type_is_an_error() {
        let config = SessionConfig {
            transforms: vec![Transform {
                from: AssetType::Fqdn,
                to: AssetType::Fqdn,
                source: String::new(),
            }],
            ..Default::default()
        };
        let result = config.check_transformations(AssetType::Asn, AssetType::Netblock, "bgp");
        assert!(matches!(result, Err(SessionError::NoTransforms(_))));
    }
}
