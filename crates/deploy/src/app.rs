//! A deployed hyperswap instance: the registry, the per-chain contract bundles and the
//! connections needed to talk to them.

use std::sync::Arc;

use alloy_core::primitives::Address;

use crate::address_book::AddressBook;
use crate::chain::{ChainName, ChainRegistry};
use crate::contracts::ContractBundle;
use crate::deployer::DeploymentResult;
use crate::provider::{ChainConnection, ChainHandle, MultiProvider};
use crate::topology::Topology;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppError {
    #[error("no contracts deployed on chain {0}")]
    NotFound(ChainName),
    #[error("no connection to chain {0}")]
    NoConnection(ChainName),
}

/// Read-only view over the deployed contracts of every chain.
#[derive(Debug)]
pub struct HyperswapApp<C> {
    registry: ChainRegistry,
    contracts: DeploymentResult,
    multi_provider: Arc<MultiProvider<C>>,
}

impl<C: ChainConnection> HyperswapApp<C> {
    pub fn new(
        registry: ChainRegistry,
        contracts: DeploymentResult,
        multi_provider: Arc<MultiProvider<C>>,
    ) -> Self {
        Self {
            registry,
            contracts,
            multi_provider,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn contracts(&self) -> &DeploymentResult {
        &self.contracts
    }

    pub fn contracts_for(&self, chain: &ChainName) -> Result<&ContractBundle, AppError> {
        self.contracts
            .get(chain)
            .ok_or_else(|| AppError::NotFound(chain.clone()))
    }

    pub fn connection(&self, chain: &ChainName) -> Result<&ChainHandle<C>, AppError> {
        self.multi_provider
            .get(chain)
            .ok_or_else(|| AppError::NoConnection(chain.clone()))
    }

    /// Chains with a bundle.
    pub fn chains(&self) -> impl Iterator<Item = &ChainName> {
        self.contracts.keys()
    }

    /// Every chain with a bundle except `chain`.
    pub fn remote_chains<'a>(
        &'a self,
        chain: &'a ChainName,
    ) -> impl Iterator<Item = &'a ChainName> {
        self.chains().filter(move |c| *c != chain)
    }

    pub fn domain_id(&self, chain: &ChainName) -> Option<u32> {
        self.registry.domain_id(chain)
    }

    /// Router addresses of every other chain, keyed by domain id.
    pub fn remote_routers(&self, chain: &ChainName) -> Vec<(u32, Address)> {
        self.remote_chains(chain)
            .filter_map(|remote| {
                let domain = self.domain_id(remote)?;
                let router = self.contracts.get(remote)?.require_router().ok()?;
                Some((domain, router.address()))
            })
            .collect()
    }

    fn chains_with(&self, topology: Topology) -> Vec<ChainName> {
        self.contracts
            .iter()
            .filter(|(_, bundle)| bundle.topology == Some(topology))
            .map(|(chain, _)| chain.clone())
            .collect()
    }

    /// Chains whose router was initialized as a hub.
    pub fn hub_chains(&self) -> Vec<ChainName> {
        self.chains_with(Topology::Hub)
    }

    pub fn spoke_chains(&self) -> Vec<ChainName> {
        self.chains_with(Topology::Spoke)
    }

    pub fn address_book(&self) -> AddressBook {
        AddressBook::from(self.contracts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDeployment;

    #[tokio::test]
    async fn test_app_accessors() {
        let env = TestDeployment::new(&["test1", "test2", "test3"], &["test1"]);
        let contracts = env.deploy().await.into_result().unwrap();
        let app = env.app(contracts);

        let test1 = ChainName::from("test1");
        assert_eq!(app.chains().count(), 3);
        assert_eq!(
            app.remote_chains(&test1).cloned().collect::<Vec<_>>(),
            vec![ChainName::from("test2"), ChainName::from("test3")]
        );
        assert_eq!(app.domain_id(&test1), Some(13371));

        let remote = app.remote_routers(&test1);
        assert_eq!(remote.len(), 2);
        assert_eq!(remote[0].0, 13372);

        assert_eq!(app.hub_chains(), vec![test1.clone()]);
        assert_eq!(app.spoke_chains().len(), 2);
        assert!(app.connection(&test1).is_ok());
        assert_eq!(app.address_book().complete_chains().count(), 3);
    }

    #[tokio::test]
    async fn test_contracts_for_unknown_chain() {
        let env = TestDeployment::new(&["test1"], &[]);
        let app = env.app(DeploymentResult::new());
        assert_eq!(
            app.contracts_for(&"test1".into()).unwrap_err(),
            AppError::NotFound("test1".into())
        );
    }
}
