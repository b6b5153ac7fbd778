//! Post-deployment verification of the multi-chain contract graph.
//!
//! The checker reads the live state of every chain once, then compares it with the intended
//! configuration and the deployed bundles. Discrepancies are accumulated as [`Violation`]s; a
//! single run reports every discrepancy rather than stopping at the first.

use std::fmt;

use alloy_core::primitives::Address;
use futures::future::join_all;
use serde::Serialize;

use crate::app::{AppError, HyperswapApp};
use crate::chain::{ChainMap, ChainName};
use crate::config::RouterConfig;
use crate::contracts::{
    BridgeRouterContract, ContractBundle, ContractRole, CustodianContract, RouterContract,
};
use crate::provider::{ChainConnection, ProviderError};
use crate::topology::{HubChains, SENTINEL, Topology};

/// Kind of drift between intended and on-chain state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ViolationCategory {
    /// Router owner or connection manager differs from the intended config.
    Ownership,
    /// A stored contract address does not point at the deployed contract.
    LinkAddress,
    /// Topology flag or domain differs from what was intended.
    ConfigMismatch,
}

/// A single discrepancy. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub chain: ChainName,
    pub category: ViolationCategory,
    /// What was compared, e.g. `router.owner`.
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl Violation {
    fn new(
        chain: &ChainName,
        category: ViolationCategory,
        field: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self {
            chain: chain.clone(),
            category,
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: expected {}, actual {}",
            self.chain, self.category, self.field, self.expected, self.actual
        )
    }
}

/// Why the state of a chain could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("{count} violation(s) found")]
    Violations { count: usize },
    #[error("could not read the state of {} chain(s)", .failures.len())]
    Unreadable { failures: ChainMap<ReadError> },
}

/// Addresses of a bundle whose three roles are all present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedAddresses {
    pub router: Address,
    pub bridge_router: Address,
    pub custodian: Address,
}

impl DeployedAddresses {
    fn from_bundle(bundle: &ContractBundle) -> Option<Self> {
        Some(Self {
            router: bundle.address(ContractRole::Router)?,
            bridge_router: bundle.address(ContractRole::BridgeRouter)?,
            custodian: bundle.address(ContractRole::Custodian)?,
        })
    }
}

/// Live state of one chain's contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainState {
    pub owner: Address,
    pub connection_manager: Address,
    pub custodian: Address,
    pub bridge_router: Address,
    pub is_hub: bool,
    /// `router()` of the bridge router.
    pub bridge_router_router: Address,
    pub bridge_router_domain: u32,
    /// `router()` of the custodian.
    pub custodian_router: Address,
}

async fn read_state<C: ChainConnection>(
    app: &HyperswapApp<C>,
    chain: &ChainName,
    deployed: DeployedAddresses,
) -> Result<OnChainState, ReadError> {
    let handle = app.connection(chain)?;
    let router = RouterContract::at(deployed.router);
    let bridge_router = BridgeRouterContract::at(deployed.bridge_router);
    let custodian = CustodianContract::at(deployed.custodian);

    let (
        owner,
        connection_manager,
        custodian_slot,
        bridge_router_slot,
        is_hub,
        bridge_router_router,
        bridge_router_domain,
        custodian_router,
    ) = tokio::try_join!(
        router.owner(handle),
        router.connection_manager(handle),
        router.custodian(handle),
        router.bridge_router(handle),
        router.is_hub(handle),
        bridge_router.router(handle),
        bridge_router.local_domain(handle),
        custodian.router(handle),
    )?;

    Ok(OnChainState {
        owner,
        connection_manager,
        custodian: custodian_slot,
        bridge_router: bridge_router_slot,
        is_hub,
        bridge_router_router,
        bridge_router_domain,
        custodian_router,
    })
}

/// Compare one chain's live state with its intended configuration.
///
/// `topology` is the variant the chain was meant to be initialized with.
pub fn evaluate(
    chain: &ChainName,
    domain_id: Option<u32>,
    intended: &RouterConfig,
    topology: Topology,
    deployed: &DeployedAddresses,
    state: &OnChainState,
) -> Vec<Violation> {
    use ViolationCategory::*;

    let mut violations = Vec::new();
    let mut compare = |category, field: &str, expected: Address, actual: Address| {
        if expected != actual {
            violations.push(Violation::new(chain, category, field, expected, actual));
        }
    };

    compare(Ownership, "router.owner", intended.owner, state.owner);
    compare(
        Ownership,
        "router.abacusConnectionManager",
        intended.connection_manager,
        state.connection_manager,
    );

    // Only the slot of the chain's own variant may hold the sentinel.
    let (expected_bridge_router, expected_custodian) = match topology {
        Topology::Hub => (deployed.bridge_router, SENTINEL),
        Topology::Spoke => (SENTINEL, deployed.custodian),
    };
    compare(
        LinkAddress,
        "router.bridgeRouter",
        expected_bridge_router,
        state.bridge_router,
    );
    compare(
        LinkAddress,
        "router.custodian",
        expected_custodian,
        state.custodian,
    );

    compare(
        LinkAddress,
        "bridgeRouter.router",
        deployed.router,
        state.bridge_router_router,
    );
    compare(
        LinkAddress,
        "custodian.router",
        deployed.router,
        state.custodian_router,
    );

    let on_chain = Topology::from_is_hub(state.is_hub);
    if on_chain != topology {
        violations.push(Violation::new(
            chain,
            ConfigMismatch,
            "router.isHub",
            topology,
            on_chain,
        ));
    }

    if domain_id != Some(state.bridge_router_domain) {
        violations.push(Violation::new(
            chain,
            ConfigMismatch,
            "bridgeRouter.localDomain",
            domain_id.map_or_else(|| "unregistered".to_string(), |d| d.to_string()),
            state.bridge_router_domain,
        ));
    }

    violations
}

/// Violations that can be derived from the bundle alone.
fn evaluate_bundle(
    chain: &ChainName,
    bundle: Option<&ContractBundle>,
    topology: Topology,
) -> Vec<Violation> {
    let Some(bundle) = bundle else {
        return [
            ContractRole::Router,
            ContractRole::BridgeRouter,
            ContractRole::Custodian,
        ]
        .into_iter()
        .map(|role| missing(chain, role))
        .collect();
    };

    let mut violations: Vec<Violation> = bundle
        .missing_roles()
        .into_iter()
        .map(|role| missing(chain, role))
        .collect();

    match bundle.require_topology() {
        Ok(recorded) if recorded == topology => {}
        Ok(recorded) => violations.push(Violation::new(
            chain,
            ViolationCategory::ConfigMismatch,
            "bundle.topology",
            topology,
            recorded,
        )),
        Err(_) => violations.push(Violation::new(
            chain,
            ViolationCategory::ConfigMismatch,
            "bundle.topology",
            topology,
            "uninitialized",
        )),
    }

    violations
}

fn missing(chain: &ChainName, role: ContractRole) -> Violation {
    Violation::new(
        chain,
        ViolationCategory::LinkAddress,
        role.to_string(),
        "deployed contract",
        "missing",
    )
}

/// Verifies a deployed [`HyperswapApp`] against the intended router configuration.
pub struct HyperswapChecker<'a, C> {
    app: &'a HyperswapApp<C>,
    configs: &'a ChainMap<RouterConfig>,
    hub_chains: HubChains,
    violations: Vec<Violation>,
}

impl<'a, C: ChainConnection> HyperswapChecker<'a, C> {
    pub fn new(
        app: &'a HyperswapApp<C>,
        configs: &'a ChainMap<RouterConfig>,
        hub_chains: HubChains,
    ) -> Self {
        Self {
            app,
            configs,
            hub_chains,
            violations: Vec::new(),
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Record one violation.
    pub fn record(&mut self, violation: Violation) {
        tracing::warn!(
            chain = %violation.chain,
            category = %violation.category,
            field = %violation.field,
            expected = %violation.expected,
            actual = %violation.actual,
            "Violation"
        );
        self.violations.push(violation);
    }

    /// Check every configured chain, replacing the violations of any previous run.
    ///
    /// Chains whose state could not be read are reported together as
    /// [`CheckError::Unreadable`] once every other chain has been checked; the violations found
    /// on the readable chains stay available through [`Self::violations`].
    pub async fn check(&mut self) -> Result<&[Violation], CheckError> {
        self.violations.clear();
        let app = self.app;

        for chain in app.chains().filter(|c| !self.configs.contains_key(*c)) {
            tracing::warn!(chain = %chain, "Deployed chain has no intended config, skipping");
        }

        tracing::info!(chains = self.configs.len(), "Checking deployment");

        let configs = self.configs;
        let mut pending = Vec::new();
        for (chain, intended) in configs {
            let topology = self.hub_chains.topology_for(chain);
            let bundle = app.contracts_for(chain).ok();
            for violation in evaluate_bundle(chain, bundle, topology) {
                self.record(violation);
            }
            if let Some(deployed) = bundle.and_then(DeployedAddresses::from_bundle) {
                pending.push((chain, intended, topology, deployed));
            }
        }

        let reads = join_all(pending.into_iter().map(
            |(chain, intended, topology, deployed)| async move {
                let state = read_state(app, chain, deployed).await;
                (chain, intended, topology, deployed, state)
            },
        ))
        .await;

        let mut failures = ChainMap::new();
        for (chain, intended, topology, deployed, state) in reads {
            match state {
                Ok(state) => {
                    let domain_id = app.domain_id(chain);
                    for violation in
                        evaluate(chain, domain_id, intended, topology, &deployed, &state)
                    {
                        self.record(violation);
                    }
                }
                Err(error) => {
                    tracing::error!(chain = %chain, error = %error, "Failed to read chain state");
                    failures.insert(chain.clone(), error);
                }
            }
        }

        tracing::info!(
            violations = self.violations.len(),
            unreadable = failures.len(),
            "Check finished"
        );

        if !failures.is_empty() {
            return Err(CheckError::Unreadable { failures });
        }
        Ok(&self.violations)
    }

    /// Fail if the last check recorded any violation.
    pub fn expect_empty(&self) -> Result<(), CheckError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(CheckError::Violations {
                count: self.violations.len(),
            })
        }
    }
}
