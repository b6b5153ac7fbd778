//! Persisted chain to contract-address mapping.

use std::path::Path;

use anyhow::{Context, Result};
use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainMap, ChainName};
use crate::contracts::ContractBundle;
use crate::deployer::DeploymentResult;

/// Contract addresses of every deployed chain, written as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct AddressBook(ChainMap<ContractBundle>);

impl AddressBook {
    /// Load an address book. A missing file is an empty book.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No address book, starting empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read address book from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse address book {}", path.display()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize address book")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        std::fs::write(path, json)
            .with_context(|| format!("Failed to write address book to {}", path.display()))?;

        tracing::info!(path = %path.display(), chains = self.0.len(), "Address book saved");
        Ok(())
    }

    /// Chains whose bundle is complete and must not be deployed again.
    pub fn complete_chains(&self) -> impl Iterator<Item = &ChainName> {
        self.0
            .iter()
            .filter(|(_, bundle)| bundle.is_complete())
            .map(|(chain, _)| chain)
    }

    pub fn is_complete(&self, chain: &ChainName) -> bool {
        self.0.get(chain).is_some_and(ContractBundle::is_complete)
    }

    /// Record the bundles of a deploy pass, replacing older entries for the same chains.
    pub fn merge(&mut self, contracts: DeploymentResult) {
        self.0.extend(contracts);
    }

    /// Record a bundle, complete or not.
    pub fn insert(&mut self, chain: ChainName, bundle: ContractBundle) {
        self.0.insert(chain, bundle);
    }

    /// Bundles of every complete chain.
    pub fn into_deployment(self) -> DeploymentResult {
        self.0
            .into_iter()
            .filter(|(_, bundle)| bundle.is_complete())
            .collect()
    }

    pub fn into_inner(self) -> ChainMap<ContractBundle> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{BridgeRouterContract, CustodianContract, RouterContract};
    use crate::topology::Topology;
    use alloy_core::primitives::Address;
    use tempdir::TempDir;

    fn bundle(seed: u8, topology: Option<Topology>) -> ContractBundle {
        ContractBundle {
            router: Some(RouterContract::at(Address::repeat_byte(seed))),
            bridge_router: Some(BridgeRouterContract::at(Address::repeat_byte(seed + 1))),
            custodian: Some(CustodianContract::at(Address::repeat_byte(seed + 2))),
            topology,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new("hyperswap-book").unwrap();
        let path = dir.path().join("nested").join("addresses.json");

        let mut book = AddressBook::default();
        book.insert("test1".into(), bundle(0x10, Some(Topology::Hub)));
        book.insert("test2".into(), bundle(0x20, None));
        book.save_to_file(&path).unwrap();

        let loaded = AddressBook::load_from_file(&path).unwrap();
        assert_eq!(loaded, book);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["test1"]["topology"], "hub");
        assert!(raw["test2"]["topology"].is_null());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new("hyperswap-book").unwrap();
        let book = AddressBook::load_from_file(&dir.path().join("addresses.json")).unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn test_complete_chains() {
        let mut book = AddressBook::default();
        book.insert("test1".into(), bundle(0x10, Some(Topology::Spoke)));
        book.insert("test2".into(), bundle(0x20, None));

        assert_eq!(
            book.complete_chains().collect::<Vec<_>>(),
            vec![&ChainName::from("test1")]
        );
        assert!(!book.is_complete(&"test2".into()));

        let deployment = book.into_deployment();
        assert_eq!(deployment.len(), 1);
    }

    #[test]
    fn test_merge_replaces_chain_entries() {
        let mut book = AddressBook::default();
        book.insert("test1".into(), bundle(0x10, None));

        let mut fresh = DeploymentResult::new();
        fresh.insert("test1".into(), bundle(0x40, Some(Topology::Hub)));
        book.merge(fresh);

        assert_eq!(book.len(), 1);
        assert!(book.is_complete(&"test1".into()));
    }
}
