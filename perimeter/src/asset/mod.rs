//! Asset model.
//!
//! An asset is a discovered or seeded identity in the target attack surface:
//! a fully-qualified domain name, an IP address, a netblock, an autonomous
//! system, an email address, or a URL. Assets are value objects - once
//! constructed they are never mutated, and equality is defined by the
//! canonical key returned from [`Asset::key`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// The stable type tag carried by every asset.
///
/// Handlers register against an `AssetType`, and transformation rules in the
/// session configuration are expressed in terms of the lowercase string tag
/// returned by [`AssetType::as_str`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Fqdn,
    IpAddress,
    Netblock,
    Asn,
    EmailAddress,
    Url,
}

impl AssetType {
    /// Returns the stable lowercase tag for this asset type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fqdn => "fqdn",
            Self::IpAddress => "ipaddress",
            Self::Netblock => "netblock",
            Self::Asn => "asn",
            Self::EmailAddress => "emailaddress",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged asset variant.
///
/// Payloads are normalized at construction (lowercased, trimmed), so two
/// assets describing the same identity always compare equal and produce the
/// same cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    Fqdn { name: String },
    IpAddress { address: IpAddr },
    Netblock { cidr: String },
    Asn { number: u32 },
    EmailAddress { address: String },
    Url { raw: String },
}

impl Asset {
    /// Creates an FQDN asset, normalizing the name.
    pub fn fqdn(name: impl AsRef<str>) -> Self {
        Self::Fqdn {
            name: normalize(name.as_ref()),
        }
    }

    /// Creates an IP address asset.
    pub fn ip_address(address: IpAddr) -> Self {
        Self::IpAddress { address }
    }

    /// Creates a netblock asset from CIDR notation.
    pub fn netblock(cidr: impl AsRef<str>) -> Self {
        Self::Netblock {
            cidr: normalize(cidr.as_ref()),
        }
    }

    /// Creates an autonomous-system asset.
    pub fn asn(number: u32) -> Self {
        Self::Asn { number }
    }

    /// Creates an email address asset, normalizing the address.
    pub fn email_address(address: impl AsRef<str>) -> Self {
        Self::EmailAddress {
            address: normalize(address.as_ref()),
        }
    }

    /// Creates a URL asset.
    pub fn url(raw: impl AsRef<str>) -> Self {
        Self::Url {
            raw: raw.as_ref().trim().to_string(),
        }
    }

    /// Returns the type tag for this asset.
    pub fn asset_type(&self) -> AssetType {
        match self {
            Self::Fqdn { .. } => AssetType::Fqdn,
            Self::IpAddress { .. } => AssetType::IpAddress,
            Self::Netblock { .. } => AssetType::Netblock,
            Self::Asn { .. } => AssetType::Asn,
            Self::EmailAddress { .. } => AssetType::EmailAddress,
            Self::Url { .. } => AssetType::Url,
        }
    }

    /// Returns the canonical byte-key used for equality and cache lookup.
    ///
    /// The key is `"<type>:<payload>"` with a lowercase payload, e.g.
    /// `fqdn:www.example.com` or `asn:13335`.
    pub fn key(&self) -> String {
        let payload = match self {
            Self::Fqdn { name } => name.clone(),
            Self::IpAddress { address } => address.to_string(),
            Self::Netblock { cidr } => cidr.clone(),
            Self::Asn { number } => number.to_string(),
            Self::EmailAddress { address } => address.clone(),
            Self::Url { raw } => raw.to_lowercase(),
        };
        format!("{}:{}", self.asset_type(), payload)
    }
}

// Display carries the same identity the cache deduplicates on.
impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn normalize(s: &str) -> String {
    s.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqdn_normalization() {
        let a = Asset::fqdn("  WWW.Example.COM. ");
        assert_eq!(a, Asset::fqdn("www.example.com"));
        assert_eq!(a.key(), "fqdn:www.example.com");
    }

    #[test]
    fn test_asset_type_tags() {
        assert_eq!(AssetType::Fqdn.as_str(), "fqdn");
        assert_eq!(AssetType::IpAddress.as_str(), "ipaddress");
        assert_eq!(AssetType::EmailAddress.as_str(), "emailaddress");
    }

    #[test]
    fn test_ip_address_key() {
        let a = Asset::ip_address("93.184.216.34".parse().unwrap());
        assert_eq!(a.key(), "ipaddress:93.184.216.34");
        assert_eq!(a.asset_type(), AssetType::IpAddress);
    }

    #[test]
    fn test_equal_assets_share_a_key() {
        let a = Asset::email_address("Admin@Example.com");
        let b = Asset::email_address("admin@example.com");
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_asn_key() {
        assert_eq!(Asset::asn(13335).key(), "asn:13335");
    }
}
