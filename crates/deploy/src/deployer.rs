//! Per-chain deployment and initialization of the hyperswap contracts.
//!
//! Every chain runs the same pipeline: router, bridge router, custodian, then one `initialize`
//! call on the router selecting the hub or spoke variant. Chains are deployed concurrently and
//! independently; a failure on one chain never touches the bundles of the others.

use std::collections::BTreeSet;

use derive_more::Display;
use futures::future::join_all;

use crate::chain::{ChainMap, ChainName, ChainRegistry};
use crate::config::RouterConfig;
use crate::contracts::{ContractBundle, ContractRole, RouterContract};
use crate::factories::{
    BridgeRouterArgs, ContractFactory, CustodianArgs, FactorySet, RouterArgs,
};
use crate::provider::{ChainConnection, MultiProvider, ProviderError};
use crate::topology::{HubChains, RouterInitialization};

/// Bundles of every chain that deployed successfully.
pub type DeploymentResult = ChainMap<ContractBundle>;

/// Step of the per-chain pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeployStage {
    #[display("deploy {_0}")]
    Deploy(ContractRole),
    #[display("initialize router")]
    Initialize,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("chain {0} is not in the registry")]
    UnknownChain(ChainName),
    #[error("no connection registered for chain {0}")]
    MissingConnection(ChainName),
    #[error("no router config for chain {0}")]
    MissingConfig(ChainName),
    #[error("{stage} on {chain} failed: {source}")]
    Transaction {
        chain: ChainName,
        stage: DeployStage,
        #[source]
        source: ProviderError,
        /// Everything deployed on the chain before the failure.
        partial: Box<ContractBundle>,
    },
}

impl DeployError {
    pub fn chain(&self) -> &ChainName {
        match self {
            Self::UnknownChain(chain) | Self::MissingConnection(chain) | Self::MissingConfig(chain) => {
                chain
            }
            Self::Transaction { chain, .. } => chain,
        }
    }

    pub fn stage(&self) -> Option<DeployStage> {
        match self {
            Self::Transaction { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The role whose deployment failed, if the failure happened while creating a contract.
    pub fn failed_role(&self) -> Option<ContractRole> {
        match self.stage() {
            Some(DeployStage::Deploy(role)) => Some(role),
            _ => None,
        }
    }

    pub fn partial(&self) -> Option<&ContractBundle> {
        match self {
            Self::Transaction { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Transaction { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Outcome of a multi-chain deploy pass.
#[derive(Debug, Default)]
pub struct DeploymentOutcome {
    /// Complete bundles, one per chain that succeeded.
    pub contracts: DeploymentResult,
    /// One error per chain that failed.
    pub failures: ChainMap<DeployError>,
}

impl DeploymentOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The deployment result, or the first failure in chain order.
    pub fn into_result(mut self) -> Result<DeploymentResult, DeployError> {
        match self.failures.pop_first() {
            Some((_, error)) => Err(error),
            None => Ok(self.contracts),
        }
    }
}

/// Deploys and wires the hyperswap contracts on a set of chains.
pub struct HyperswapDeployer<'a, C> {
    multi_provider: &'a MultiProvider<C>,
    registry: &'a ChainRegistry,
    factories: &'a FactorySet,
    configs: &'a ChainMap<RouterConfig>,
    hub_chains: HubChains,
}

impl<'a, C: ChainConnection> HyperswapDeployer<'a, C> {
    pub fn new(
        multi_provider: &'a MultiProvider<C>,
        registry: &'a ChainRegistry,
        factories: &'a FactorySet,
        configs: &'a ChainMap<RouterConfig>,
        hub_chains: HubChains,
    ) -> Self {
        Self {
            multi_provider,
            registry,
            factories,
            configs,
            hub_chains,
        }
    }

    /// Deploy on every configured chain.
    pub async fn deploy(&self) -> DeploymentOutcome {
        self.deploy_chains(self.configs.keys().cloned()).await
    }

    /// Deploy on the given chains concurrently.
    pub async fn deploy_chains(
        &self,
        chains: impl IntoIterator<Item = ChainName>,
    ) -> DeploymentOutcome {
        // Each chain gets exactly one pipeline per pass, however often it is listed.
        let chains: BTreeSet<ChainName> = chains.into_iter().collect();
        tracing::info!(chains = ?chains, "Starting deployment");

        let results = join_all(chains.into_iter().map(|chain| async move {
            let result = match self.configs.get(&chain) {
                Some(config) => self.deploy_contracts(&chain, config).await,
                None => Err(DeployError::MissingConfig(chain.clone())),
            };
            (chain, result)
        }))
        .await;

        let mut outcome = DeploymentOutcome::default();
        for (chain, result) in results {
            match result {
                Ok(bundle) => {
                    outcome.contracts.insert(chain, bundle);
                }
                Err(error) => {
                    tracing::error!(chain = %chain, error = %error, "Chain deployment failed");
                    outcome.failures.insert(chain, error);
                }
            }
        }

        tracing::info!(
            succeeded = outcome.contracts.len(),
            failed = outcome.failures.len(),
            "Deployment finished"
        );
        outcome
    }

    /// Deploy, wire and initialize the contracts of a single chain.
    pub async fn deploy_contracts(
        &self,
        chain: &ChainName,
        config: &RouterConfig,
    ) -> Result<ContractBundle, DeployError> {
        let domain_id = self
            .registry
            .domain_id(chain)
            .ok_or_else(|| DeployError::UnknownChain(chain.clone()))?;
        let handle = self
            .multi_provider
            .get(chain)
            .ok_or_else(|| DeployError::MissingConnection(chain.clone()))?;

        let mut bundle = ContractBundle::default();
        let fail = |stage: DeployStage, bundle: &ContractBundle| {
            let chain = chain.clone();
            let partial = Box::new(bundle.clone());
            move |source: ProviderError| DeployError::Transaction {
                chain,
                stage,
                source,
                partial,
            }
        };

        tracing::info!(chain = %chain, domain_id, "Deploying contracts");

        let router = self
            .factories
            .router
            .deploy(
                handle,
                RouterArgs {
                    interchain_gas_paymaster: config.interchain_gas_paymaster,
                },
            )
            .await
            .map_err(fail(DeployStage::Deploy(ContractRole::Router), &bundle))?;
        bundle.router = Some(router);

        let bridge_router = self
            .factories
            .bridge_router
            .deploy(
                handle,
                BridgeRouterArgs {
                    router: router.address(),
                    local_domain: domain_id,
                },
            )
            .await
            .map_err(fail(DeployStage::Deploy(ContractRole::BridgeRouter), &bundle))?;
        bundle.bridge_router = Some(bridge_router);

        let custodian = self
            .factories
            .custodian
            .deploy(
                handle,
                CustodianArgs {
                    router: router.address(),
                },
            )
            .await
            .map_err(fail(DeployStage::Deploy(ContractRole::Custodian), &bundle))?;
        bundle.custodian = Some(custodian);

        let topology = self.hub_chains.topology_for(chain);
        let init = RouterInitialization::new(
            topology,
            config.connection_manager,
            bridge_router.address(),
            custodian.address(),
        );

        tracing::info!(chain = %chain, topology = %topology, "Initializing router");

        let receipt = handle
            .send_and_confirm(
                Some(router.address()),
                RouterContract::initialize_calldata(&init),
            )
            .await
            .map_err(fail(DeployStage::Initialize, &bundle))?;
        bundle.topology = Some(topology);

        tracing::info!(
            chain = %chain,
            topology = %topology,
            tx_hash = %receipt.tx_hash,
            router = %router.address(),
            "Router initialized"
        );

        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, FaultKind, TestDeployment};
    use crate::topology::{SENTINEL, Topology};

    #[tokio::test]
    async fn test_single_chain_pipeline() {
        let env = TestDeployment::new(&["test1"], &["test1"]);
        let chain = ChainName::from("test1");
        let bundle = env
            .deployer()
            .deploy_contracts(&chain, &env.configs[&chain])
            .await
            .unwrap();

        assert!(bundle.is_complete());
        assert_eq!(bundle.topology, Some(Topology::Hub));

        // Three creations followed by one call to the router.
        let network = env.network(&chain);
        let txs = network.transactions();
        assert_eq!(txs.len(), 4);
        assert!(txs[..3].iter().all(|tx| tx.to.is_none()));
        assert_eq!(txs[3].to, Some(bundle.require_router().unwrap().address()));
    }

    #[tokio::test]
    async fn test_spoke_router_state() {
        let env = TestDeployment::new(&["test1", "test2"], &["test1"]);
        let chain = ChainName::from("test2");
        let bundle = env
            .deployer()
            .deploy_contracts(&chain, &env.configs[&chain])
            .await
            .unwrap();

        let state = env
            .network(&chain)
            .router_state(bundle.require_router().unwrap().address())
            .unwrap();
        assert!(!state.is_hub);
        assert_eq!(state.bridge_router, SENTINEL);
        assert_eq!(state.custodian, bundle.require_custodian().unwrap().address());
    }

    #[tokio::test]
    async fn test_custodian_revert_keeps_partial_bundle() {
        let env = TestDeployment::new(&["test1"], &[]);
        let chain = ChainName::from("test1");
        env.network(&chain).inject_fault(Fault::deploy(
            ContractRole::Custodian,
            FaultKind::Revert,
        ));

        let err = env
            .deployer()
            .deploy_contracts(&chain, &env.configs[&chain])
            .await
            .unwrap_err();

        assert_eq!(err.chain(), &chain);
        assert_eq!(err.failed_role(), Some(ContractRole::Custodian));
        assert!(err.provider_error().unwrap().is_transaction_failure());

        let partial = err.partial().unwrap();
        assert_eq!(partial.missing_roles(), vec![ContractRole::Custodian]);
        assert!(!partial.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_timeout_is_distinguishable() {
        let env = TestDeployment::new(&["test1"], &["test1"]);
        let chain = ChainName::from("test1");
        env.network(&chain)
            .inject_fault(Fault::initialize(FaultKind::Timeout));

        let err = env
            .deployer()
            .deploy_contracts(&chain, &env.configs[&chain])
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(DeployStage::Initialize));
        assert_eq!(err.failed_role(), None);
        let source = err.provider_error().unwrap();
        assert!(source.is_timeout());
        assert!(!source.is_transaction_failure());

        // Every contract exists, but the chain is not complete.
        let partial = err.partial().unwrap();
        assert!(partial.missing_roles().is_empty());
        assert!(!partial.is_complete());
    }

    #[tokio::test]
    async fn test_missing_config_is_reported_per_chain() {
        let env = TestDeployment::new(&["test1", "test2"], &[]);
        let outcome = env
            .deployer()
            .deploy_chains([ChainName::from("test1"), ChainName::from("test3")])
            .await;

        assert!(outcome.contracts.contains_key(&ChainName::from("test1")));
        assert!(matches!(
            outcome.failures[&ChainName::from("test3")],
            DeployError::MissingConfig(_)
        ));
        assert!(!outcome.is_success());
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test]
    async fn test_repeated_chain_is_deployed_once() {
        let env = TestDeployment::new(&["test1"], &["test1"]);
        let chain = ChainName::from("test1");
        let outcome = env
            .deployer()
            .deploy_chains([chain.clone(), chain.clone()])
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.contracts.len(), 1);
        assert_eq!(env.network(&chain).transactions().len(), 4);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(
            DeployStage::Deploy(ContractRole::BridgeRouter).to_string(),
            "deploy bridgeRouter"
        );
        assert_eq!(DeployStage::Initialize.to_string(), "initialize router");
    }
}
