//! In-process chain simulator for tests.
//!
//! [`TestNetwork`] implements [`ChainConnection`] on top of a small model of the three hyperswap
//! contracts. Creation bytecode is recognised by a marker prefix ([`ROUTER_CODE`] and friends)
//! followed by the ABI-encoded constructor arguments, so the regular factories and calldata
//! encoders run unchanged against it. Faults can be injected per step and the router state can
//! be tampered with to exercise the checker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use url::Url;

use crate::abi::{self, Token};
use crate::app::HyperswapApp;
use crate::chain::{
    ChainDescriptor, ChainMap, ChainName, ChainRegistry, ConnectionConfig,
    DEFAULT_RECEIPT_TIMEOUT, known_domain_id,
};
use crate::config::RouterConfig;
use crate::contracts::{ContractRole, signatures};
use crate::deployer::{DeploymentOutcome, DeploymentResult, HyperswapDeployer};
use crate::factories::{BridgeRouterFactory, CustodianFactory, FactorySet, RouterFactory};
use crate::provider::{
    ChainConnection, ChainHandle, MultiProvider, Overrides, ProviderError, TransactionReceipt,
    TransactionRequest,
};
use crate::topology::HubChains;

/// Marker bytecode of the router.
pub const ROUTER_CODE: &[u8] = b"hyperswap:router";
/// Marker bytecode of the bridge router.
pub const BRIDGE_ROUTER_CODE: &[u8] = b"hyperswap:bridge-router";
/// Marker bytecode of the custodian.
pub const CUSTODIAN_CODE: &[u8] = b"hyperswap:custodian";

/// Account used as the signer of every test chain.
pub const TEST_SIGNER: Address = Address::repeat_byte(0x5a);

/// What an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTarget {
    Deploy(ContractRole),
    Initialize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Mined with a failed status. Consumes the nonce, changes nothing.
    Revert,
    /// Refused at broadcast.
    Reject,
    /// Accepted, then forgotten by the node.
    Drop,
    /// Never reaches the requested confirmation count.
    Timeout,
}

/// A one-shot fault, consumed by the first matching transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub target: FaultTarget,
    pub kind: FaultKind,
}

impl Fault {
    pub fn deploy(role: ContractRole, kind: FaultKind) -> Self {
        Self {
            target: FaultTarget::Deploy(role),
            kind,
        }
    }

    pub fn initialize(kind: FaultKind) -> Self {
        Self {
            target: FaultTarget::Initialize,
            kind,
        }
    }
}

/// Storage of a simulated router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterState {
    pub interchain_gas_paymaster: Address,
    pub owner: Address,
    pub connection_manager: Address,
    pub custodian: Address,
    pub bridge_router: Address,
    pub is_hub: bool,
    pub initialized: bool,
}

#[derive(Debug, Clone)]
enum Contract {
    Router(RouterState),
    BridgeRouter { router: Address, local_domain: u32 },
    Custodian { router: Address },
}

#[derive(Debug)]
enum Pending {
    Mined(TransactionReceipt),
    Dropped,
    Stuck,
}

#[derive(Debug, Default)]
struct NetworkState {
    block: u64,
    nonces: BTreeMap<Address, u64>,
    contracts: BTreeMap<Address, Contract>,
    pending: BTreeMap<B256, Pending>,
    transactions: Vec<TransactionRequest>,
    faults: Vec<Fault>,
    in_flight: usize,
    max_in_flight: usize,
    unreachable: bool,
}

/// A simulated chain. Clones share the same state.
#[derive(Debug, Clone)]
pub struct TestNetwork {
    domain_id: u32,
    state: Arc<Mutex<NetworkState>>,
}

fn reverted() -> ProviderError {
    ProviderError::Rpc("execution reverted".to_string())
}

impl TestNetwork {
    pub fn new(domain_id: u32) -> Self {
        Self {
            domain_id,
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Make every read-only call fail, as if the endpoint went away.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Every transaction broadcast so far, in order.
    pub fn transactions(&self) -> Vec<TransactionRequest> {
        self.lock().transactions.clone()
    }

    pub fn creation_count(&self) -> usize {
        self.lock()
            .transactions
            .iter()
            .filter(|tx| tx.to.is_none())
            .count()
    }

    /// Largest number of transactions that were awaiting confirmation at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn router_state(&self, router: Address) -> Option<RouterState> {
        match self.lock().contracts.get(&router) {
            Some(Contract::Router(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Mutate a router's storage directly.
    pub fn update_router(&self, router: Address, update: impl FnOnce(&mut RouterState)) {
        if let Some(Contract::Router(state)) = self.lock().contracts.get_mut(&router) {
            update(state);
        }
    }

    fn target_of(state: &NetworkState, tx: &TransactionRequest) -> Option<FaultTarget> {
        match tx.to {
            None => role_of(&tx.data).map(|(role, _)| FaultTarget::Deploy(role)),
            Some(to) => {
                let is_init = abi::split_selector(&tx.data)
                    .map(|(selector, _)| selector == abi::selector(signatures::INITIALIZE))
                    .unwrap_or(false);
                let is_router = matches!(state.contracts.get(&to), Some(Contract::Router(_)));
                (is_init && is_router).then_some(FaultTarget::Initialize)
            }
        }
    }

    fn submit(&self, tx: TransactionRequest) -> Result<B256, ProviderError> {
        let mut state = self.lock();
        state.transactions.push(tx.clone());

        let fault = Self::target_of(&state, &tx).and_then(|target| {
            let index = state.faults.iter().position(|f| f.target == target)?;
            Some(state.faults.remove(index).kind)
        });

        if fault == Some(FaultKind::Reject) {
            return Err(ProviderError::Rejected("nonce too low".to_string()));
        }

        let nonce = *state.nonces.get(&tx.from).unwrap_or(&0);
        let tx_hash = keccak256(
            [
                tx.from.as_slice(),
                &nonce.to_be_bytes()[..],
                &self.domain_id.to_be_bytes()[..],
                &tx.data[..],
            ]
            .concat(),
        );

        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);

        let pending = match fault {
            Some(FaultKind::Drop) => Pending::Dropped,
            Some(FaultKind::Timeout) => Pending::Stuck,
            _ => {
                state.nonces.insert(tx.from, nonce + 1);
                state.block += 1;
                let (success, contract_address) = if fault == Some(FaultKind::Revert) {
                    (false, None)
                } else {
                    match self.execute(&mut state, &tx, nonce) {
                        Some(created) => (true, created),
                        None => (false, None),
                    }
                };
                Pending::Mined(TransactionReceipt {
                    tx_hash,
                    block_number: state.block,
                    contract_address,
                    success,
                })
            }
        };
        state.pending.insert(tx_hash, pending);
        Ok(tx_hash)
    }

    /// Apply a transaction. `None` means it reverted; `Some(created)` carries the new contract
    /// address for creations.
    fn execute(
        &self,
        state: &mut NetworkState,
        tx: &TransactionRequest,
        nonce: u64,
    ) -> Option<Option<Address>> {
        match tx.to {
            None => {
                let (role, args) = role_of(&tx.data)?;
                let contract = match role {
                    ContractRole::Router => Contract::Router(RouterState {
                        interchain_gas_paymaster: abi::decode_address(args, 0).ok()?,
                        owner: Address::ZERO,
                        connection_manager: Address::ZERO,
                        custodian: Address::ZERO,
                        bridge_router: Address::ZERO,
                        is_hub: false,
                        initialized: false,
                    }),
                    ContractRole::BridgeRouter => Contract::BridgeRouter {
                        router: abi::decode_address(args, 0).ok()?,
                        local_domain: abi::decode_u32(args, 1).ok()?,
                    },
                    ContractRole::Custodian => Contract::Custodian {
                        router: abi::decode_address(args, 0).ok()?,
                    },
                };
                let address = Address::from_word(keccak256(
                    [
                        tx.from.as_slice(),
                        &nonce.to_be_bytes()[..],
                        &self.domain_id.to_be_bytes()[..],
                    ]
                    .concat(),
                ));
                state.contracts.insert(address, contract);
                Some(Some(address))
            }
            Some(to) => {
                let (selector, args) = abi::split_selector(&tx.data).ok()?;
                let Some(Contract::Router(router)) = state.contracts.get_mut(&to) else {
                    return None;
                };
                if selector != abi::selector(signatures::INITIALIZE) || router.initialized {
                    return None;
                }
                router.connection_manager = abi::decode_address(args, 0).ok()?;
                router.custodian = abi::decode_address(args, 1).ok()?;
                router.bridge_router = abi::decode_address(args, 2).ok()?;
                router.is_hub = abi::decode_bool(args, 3).ok()?;
                router.owner = tx.from;
                router.initialized = true;
                Some(None)
            }
        }
    }

    fn take_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>, ProviderError> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        match state.pending.remove(&tx_hash) {
            Some(Pending::Mined(receipt)) => Ok(Some(receipt)),
            Some(Pending::Stuck) => Ok(None),
            Some(Pending::Dropped) | None => Err(ProviderError::Dropped { tx_hash }),
        }
    }

    fn answer(&self, to: Address, data: &[u8]) -> Result<Bytes, ProviderError> {
        let state = self.lock();
        if state.unreachable {
            return Err(ProviderError::Rpc("connection refused".to_string()));
        }
        let Some(contract) = state.contracts.get(&to) else {
            // A call to an address without code returns nothing.
            return Ok(Bytes::new());
        };

        let (selector, _) = abi::split_selector(data)?;
        let is = |signature: &str| selector == abi::selector(signature);

        let token = match contract {
            Contract::Router(router) => {
                if is(signatures::OWNER) {
                    Token::Address(router.owner)
                } else if is(signatures::CONNECTION_MANAGER) {
                    Token::Address(router.connection_manager)
                } else if is(signatures::CUSTODIAN) {
                    Token::Address(router.custodian)
                } else if is(signatures::BRIDGE_ROUTER) {
                    Token::Address(router.bridge_router)
                } else if is(signatures::IS_HUB) {
                    Token::Bool(router.is_hub)
                } else {
                    return Err(reverted());
                }
            }
            Contract::BridgeRouter {
                router,
                local_domain,
            } => {
                if is(signatures::ROUTER) {
                    Token::Address(*router)
                } else if is(signatures::LOCAL_DOMAIN) {
                    Token::Uint(U256::from(*local_domain))
                } else {
                    return Err(reverted());
                }
            }
            Contract::Custodian { router } => {
                if is(signatures::ROUTER) {
                    Token::Address(*router)
                } else {
                    return Err(reverted());
                }
            }
        };

        Ok(abi::encode_params(&[token]).into())
    }
}

fn role_of(data: &[u8]) -> Option<(ContractRole, &[u8])> {
    [
        (ContractRole::Router, ROUTER_CODE),
        (ContractRole::BridgeRouter, BRIDGE_ROUTER_CODE),
        (ContractRole::Custodian, CUSTODIAN_CODE),
    ]
    .into_iter()
    .find_map(|(role, marker)| data.strip_prefix(marker).map(|args| (role, args)))
}

impl ChainConnection for TestNetwork {
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ProviderError> {
        self.submit(tx)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ProviderError> {
        // Give other chains' tasks a chance to run while this transaction is in flight.
        tokio::task::yield_now().await;

        match self.take_receipt(tx_hash)? {
            Some(receipt) => Ok(receipt),
            None => Err(ProviderError::ConfirmationTimeout {
                tx_hash,
                confirmations,
                elapsed: timeout,
            }),
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.answer(to, &data)
    }
}

/// Factories whose bytecode is the simulator's markers.
pub fn test_factories() -> FactorySet {
    FactorySet {
        router: RouterFactory {
            bytecode: Bytes::from_static(ROUTER_CODE),
        },
        bridge_router: BridgeRouterFactory {
            bytecode: Bytes::from_static(BRIDGE_ROUTER_CODE),
        },
        custodian: CustodianFactory {
            bytecode: Bytes::from_static(CUSTODIAN_CODE),
        },
    }
}

/// A set of simulated chains wired the way a real deployment is.
#[derive(Debug)]
pub struct TestDeployment {
    pub registry: ChainRegistry,
    pub multi_provider: Arc<MultiProvider<TestNetwork>>,
    pub factories: FactorySet,
    pub configs: ChainMap<RouterConfig>,
    pub hub_chains: HubChains,
    networks: ChainMap<TestNetwork>,
}

impl TestDeployment {
    /// Simulate `chains`, with `hubs` initialized as hubs.
    ///
    /// Well-known test chain names get their usual domain ids. Every router is configured to be
    /// owned by [`TEST_SIGNER`].
    pub fn new(chains: &[&str], hubs: &[&str]) -> Self {
        let descriptors: Vec<ChainDescriptor> = chains
            .iter()
            .enumerate()
            .map(|(i, name)| ChainDescriptor {
                name: ChainName::from(*name),
                domain_id: known_domain_id(name).unwrap_or(90_000 + i as u32),
                connection: ConnectionConfig {
                    rpc_url: Url::parse(&format!("http://{name}.invalid:8545"))
                        .expect("valid test url"),
                    signer: TEST_SIGNER,
                    confirmations: 1,
                    overrides: Overrides::default(),
                    receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
                },
                hub_eligible: hubs.contains(name),
            })
            .collect();
        let registry = ChainRegistry::new(descriptors).expect("distinct test chains");

        let mut multi_provider = MultiProvider::default();
        let mut networks = ChainMap::new();
        for descriptor in registry.descriptors() {
            let network = TestNetwork::new(descriptor.domain_id);
            multi_provider.insert(ChainHandle::new(descriptor, network.clone()));
            networks.insert(descriptor.name.clone(), network);
        }

        let configs = registry
            .chains()
            .enumerate()
            .map(|(i, name)| {
                let i = i as u8;
                let config = RouterConfig {
                    owner: TEST_SIGNER,
                    connection_manager: Address::repeat_byte(0xc0 + i),
                    interchain_gas_paymaster: Address::repeat_byte(0xd0 + i),
                };
                (name.clone(), config)
            })
            .collect();

        Self {
            hub_chains: registry.hub_chains(),
            registry,
            multi_provider: Arc::new(multi_provider),
            factories: test_factories(),
            configs,
            networks,
        }
    }

    pub fn network(&self, chain: &ChainName) -> &TestNetwork {
        self.networks
            .get(chain)
            .unwrap_or_else(|| panic!("no test network for {chain}"))
    }

    pub fn deployer(&self) -> HyperswapDeployer<'_, TestNetwork> {
        HyperswapDeployer::new(
            &self.multi_provider,
            &self.registry,
            &self.factories,
            &self.configs,
            self.hub_chains.clone(),
        )
    }

    pub async fn deploy(&self) -> DeploymentOutcome {
        self.deployer().deploy().await
    }

    pub fn app(&self, contracts: DeploymentResult) -> HyperswapApp<TestNetwork> {
        HyperswapApp::new(
            self.registry.clone(),
            contracts,
            Arc::clone(&self.multi_provider),
        )
    }
}
