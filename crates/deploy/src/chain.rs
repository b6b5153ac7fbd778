//! Chain registry: logical chain names, their domain identifiers and connection settings.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use alloy_core::primitives::Address;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::provider::Overrides;
use crate::topology::HubChains;

/// Default time to wait for a transaction to reach its confirmation count.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Domain identifiers of well-known chains.
///
/// Testnet and local test chains use the values the messaging layer assigns them; mainnets use
/// the ASCII encoding of a short chain tag.
const KNOWN_DOMAINS: &[(&str, u32)] = &[
    ("celo", 0x63656c6f),
    ("ethereum", 0x657468),
    ("avalanche", 0x61766178),
    ("polygon", 0x706f6c79),
    ("alfajores", 1000),
    ("kovan", 3000),
    ("goerli", 5),
    ("fuji", 43113),
    ("mumbai", 80001),
    ("bsctestnet", 0x62732d74),
    ("arbitrumrinkeby", 0x61722d72),
    ("optimismkovan", 0x6f702d6b),
    ("test1", 13371),
    ("test2", 13372),
    ("test3", 13373),
];

/// Look up the domain identifier of a well-known chain.
pub fn known_domain_id(name: &str) -> Option<u32> {
    KNOWN_DOMAINS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, domain)| *domain)
}

/// Logical name of a chain, e.g. `alfajores`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainName(String);

impl ChainName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChainName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ChainName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A value per chain, ordered by chain name.
pub type ChainMap<T> = BTreeMap<ChainName, T>;

/// How to reach a chain and how to submit transactions to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Account every transaction on this chain is sent from.
    pub signer: Address,
    /// Number of blocks a transaction must be buried under before it counts as confirmed.
    pub confirmations: u64,
    /// Gas and fee overrides applied to every transaction.
    pub overrides: Overrides,
    /// How long to wait for a transaction to be confirmed.
    pub receipt_timeout: Duration,
}

/// Everything the orchestration needs to know about a single chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub name: ChainName,
    pub domain_id: u32,
    pub connection: ConnectionConfig,
    /// Whether the chain belongs to the hub set.
    pub hub_eligible: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("chain {0} is registered twice")]
    DuplicateChain(ChainName),
    #[error("chains {first} and {second} share domain id {domain}")]
    DuplicateDomain {
        domain: u32,
        first: ChainName,
        second: ChainName,
    },
}

/// Immutable mapping from chain name to its descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainRegistry {
    chains: ChainMap<ChainDescriptor>,
}

impl ChainRegistry {
    /// Build a registry, rejecting duplicate names and domain ids.
    pub fn new(
        descriptors: impl IntoIterator<Item = ChainDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut chains = ChainMap::new();
        let mut domains: BTreeMap<u32, ChainName> = BTreeMap::new();

        for descriptor in descriptors {
            if let Some(first) = domains.get(&descriptor.domain_id) {
                return Err(RegistryError::DuplicateDomain {
                    domain: descriptor.domain_id,
                    first: first.clone(),
                    second: descriptor.name.clone(),
                });
            }
            if chains.contains_key(&descriptor.name) {
                return Err(RegistryError::DuplicateChain(descriptor.name));
            }
            domains.insert(descriptor.domain_id, descriptor.name.clone());
            chains.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self { chains })
    }

    pub fn get(&self, chain: &ChainName) -> Option<&ChainDescriptor> {
        self.chains.get(chain)
    }

    pub fn domain_id(&self, chain: &ChainName) -> Option<u32> {
        self.chains.get(chain).map(|c| c.domain_id)
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainName> {
        self.chains.keys()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// The set of chains flagged as hubs.
    pub fn hub_chains(&self) -> HubChains {
        self.chains
            .values()
            .filter(|c| c.hub_eligible)
            .map(|c| c.name.clone())
            .collect::<BTreeSet<_>>()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, domain_id: u32, hub: bool) -> ChainDescriptor {
        ChainDescriptor {
            name: name.into(),
            domain_id,
            connection: ConnectionConfig {
                rpc_url: Url::parse("http://localhost:8545").unwrap(),
                signer: Address::repeat_byte(0x11),
                confirmations: 1,
                overrides: Overrides::default(),
                receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            },
            hub_eligible: hub,
        }
    }

    #[test]
    fn test_known_domains() {
        assert_eq!(known_domain_id("alfajores"), Some(1000));
        assert_eq!(known_domain_id("goerli"), Some(5));
        assert_eq!(known_domain_id("test2"), Some(13372));
        assert_eq!(known_domain_id("nowhere"), None);
    }

    #[test]
    fn test_registry_lookups() {
        let registry = ChainRegistry::new([
            descriptor("test1", 13371, true),
            descriptor("test2", 13372, false),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.domain_id(&"test2".into()), Some(13372));
        assert!(registry.hub_chains().contains(&"test1".into()));
        assert!(!registry.hub_chains().contains(&"test2".into()));
    }

    #[test]
    fn test_registry_rejects_duplicate_domain() {
        let err = ChainRegistry::new([
            descriptor("test1", 7, false),
            descriptor("test2", 7, false),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            RegistryError::DuplicateDomain {
                domain: 7,
                first: "test1".into(),
                second: "test2".into(),
            }
        );
    }

    #[test]
    fn test_registry_rejects_duplicate_chain() {
        let err = ChainRegistry::new([
            descriptor("test1", 1, false),
            descriptor("test1", 2, false),
        ])
        .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateChain("test1".into()));
    }
}
