//! hyperswap-deploy - Multi-chain deployment and verification of the hyperswap contracts.
//!
//! On every chain the [`HyperswapDeployer`] creates a router, a bridge router and a custodian,
//! then initializes the router as a hub or a spoke. The resulting bundles are wrapped in a
//! [`HyperswapApp`], and the [`HyperswapChecker`] verifies the live state of every chain against
//! the intended configuration.

pub mod abi;
pub mod rpc;

mod address_book;
pub use address_book::AddressBook;

mod app;
pub use app::{AppError, HyperswapApp};

mod chain;
pub use chain::{
    ChainDescriptor, ChainMap, ChainName, ChainRegistry, ConnectionConfig,
    DEFAULT_RECEIPT_TIMEOUT, RegistryError, known_domain_id,
};

mod checker;
pub use checker::{
    CheckError, DeployedAddresses, HyperswapChecker, OnChainState, ReadError, Violation,
    ViolationCategory, evaluate,
};

mod config;
pub use config::{
    ADDRESS_BOOK_FILENAME, CONFIG_FILENAME, ChainConfig, HyperswapConfig, RouterConfig,
};

mod contracts;
pub use contracts::{
    BridgeRouterContract, BundleError, ContractBundle, ContractRole, CustodianContract,
    RouterContract, signatures,
};

mod deployer;
pub use deployer::{
    DeployError, DeployStage, DeploymentOutcome, DeploymentResult, HyperswapDeployer,
};

mod factories;
pub use factories::{
    BRIDGE_ROUTER_ARTIFACT, BridgeRouterArgs, BridgeRouterFactory, CUSTODIAN_ARTIFACT,
    ContractFactory, CustodianArgs, CustodianFactory, FactorySet, ROUTER_ARTIFACT, RouterArgs,
    RouterFactory,
};

mod provider;
pub use provider::{
    ChainConnection, ChainHandle, MultiProvider, Overrides, ProviderError, TransactionReceipt,
    TransactionRequest,
};

mod topology;
pub use topology::{HubChains, RouterInitialization, SENTINEL, Topology};

pub use rpc::JsonRpcConnection;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
