//! Contract factories: one strategy per [`ContractRole`].
//!
//! A factory knows the creation bytecode of its contract, how to append the constructor
//! arguments, and how to bind a deployed address to the typed handle.

use std::path::Path;

use alloy_core::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::abi::{self, Token};
use crate::contracts::{BridgeRouterContract, ContractRole, CustodianContract, RouterContract};
use crate::provider::{ChainConnection, ChainHandle, ProviderError};

/// Deploys and binds a single contract type.
pub trait ContractFactory: Send + Sync {
    const ROLE: ContractRole;

    /// Constructor arguments.
    type Args: Send;

    /// Typed handle of the deployed contract.
    type Contract: Send;

    /// Bytecode plus ABI-encoded constructor arguments.
    fn creation_code(&self, args: &Self::Args) -> Bytes;

    fn bind(&self, address: Address) -> Self::Contract;

    /// Create the contract on `chain` and bind the resulting address.
    fn deploy<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
        args: Self::Args,
    ) -> impl std::future::Future<Output = Result<Self::Contract, ProviderError>> + Send {
        let creation_code = self.creation_code(&args);
        async move {
            let (address, receipt) = chain.deploy_contract(creation_code).await?;
            tracing::info!(
                chain = %chain.name,
                role = %Self::ROLE,
                address = %address,
                tx_hash = %receipt.tx_hash,
                "Contract deployed"
            );
            Ok(self.bind(address))
        }
    }
}

/// Router constructor arguments. Only chain-global parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterArgs {
    pub interchain_gas_paymaster: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeRouterArgs {
    pub router: Address,
    pub local_domain: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodianArgs {
    pub router: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterFactory {
    pub bytecode: Bytes,
}

impl ContractFactory for RouterFactory {
    const ROLE: ContractRole = ContractRole::Router;
    type Args = RouterArgs;
    type Contract = RouterContract;

    fn creation_code(&self, args: &RouterArgs) -> Bytes {
        abi::encode_constructor(
            &self.bytecode,
            &[Token::Address(args.interchain_gas_paymaster)],
        )
    }

    fn bind(&self, address: Address) -> RouterContract {
        RouterContract::at(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRouterFactory {
    pub bytecode: Bytes,
}

impl ContractFactory for BridgeRouterFactory {
    const ROLE: ContractRole = ContractRole::BridgeRouter;
    type Args = BridgeRouterArgs;
    type Contract = BridgeRouterContract;

    fn creation_code(&self, args: &BridgeRouterArgs) -> Bytes {
        abi::encode_constructor(
            &self.bytecode,
            &[
                Token::Address(args.router),
                Token::Uint(U256::from(args.local_domain)),
            ],
        )
    }

    fn bind(&self, address: Address) -> BridgeRouterContract {
        BridgeRouterContract::at(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodianFactory {
    pub bytecode: Bytes,
}

impl ContractFactory for CustodianFactory {
    const ROLE: ContractRole = ContractRole::Custodian;
    type Args = CustodianArgs;
    type Contract = CustodianContract;

    fn creation_code(&self, args: &CustodianArgs) -> Bytes {
        abi::encode_constructor(&self.bytecode, &[Token::Address(args.router)])
    }

    fn bind(&self, address: Address) -> CustodianContract {
        CustodianContract::at(address)
    }
}

/// Artifact file names, as emitted by the contract build.
pub const ROUTER_ARTIFACT: &str = "HyperswapRouter.json";
pub const BRIDGE_ROUTER_ARTIFACT: &str = "HyperswapBridgeRouter.json";
pub const CUSTODIAN_ARTIFACT: &str = "HyperswapCustodian.json";

/// The subset of a hardhat artifact needed to deploy a contract.
#[derive(Debug, Deserialize)]
struct Artifact {
    bytecode: Bytes,
}

/// The factories of every role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorySet {
    pub router: RouterFactory,
    pub bridge_router: BridgeRouterFactory,
    pub custodian: CustodianFactory,
}

impl FactorySet {
    /// Load the three contract artifacts from a directory.
    pub fn from_artifacts(dir: &Path) -> Result<Self> {
        Ok(Self {
            router: RouterFactory {
                bytecode: load_bytecode(&dir.join(ROUTER_ARTIFACT))?,
            },
            bridge_router: BridgeRouterFactory {
                bytecode: load_bytecode(&dir.join(BRIDGE_ROUTER_ARTIFACT))?,
            },
            custodian: CustodianFactory {
                bytecode: load_bytecode(&dir.join(CUSTODIAN_ARTIFACT))?,
            },
        })
    }
}

fn load_bytecode(path: &Path) -> Result<Bytes> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let artifact: Artifact = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

    if artifact.bytecode.is_empty() {
        anyhow::bail!("Artifact {} has empty bytecode", path.display());
    }

    Ok(artifact.bytecode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_bridge_router_creation_code() {
        let factory = BridgeRouterFactory {
            bytecode: Bytes::from_static(&[0xfe]),
        };
        let router = Address::repeat_byte(0xaa);
        let code = factory.creation_code(&BridgeRouterArgs {
            router,
            local_domain: 1000,
        });

        assert_eq!(code.len(), 1 + 2 * abi::WORD);
        assert_eq!(abi::decode_address(&code[1..], 0).unwrap(), router);
        assert_eq!(abi::decode_u32(&code[1..], 1).unwrap(), 1000);
    }

    #[test]
    fn test_load_artifacts() {
        let dir = TempDir::new("hyperswap-artifacts").unwrap();
        for (name, code) in [
            (ROUTER_ARTIFACT, "0x6001"),
            (BRIDGE_ROUTER_ARTIFACT, "0x6002"),
            (CUSTODIAN_ARTIFACT, "0x6003"),
        ] {
            let artifact = serde_json::json!({
                "contractName": name,
                "abi": [],
                "bytecode": code,
            });
            std::fs::write(dir.path().join(name), artifact.to_string()).unwrap();
        }

        let factories = FactorySet::from_artifacts(dir.path()).unwrap();
        assert_eq!(factories.router.bytecode, Bytes::from_static(&[0x60, 0x01]));
        assert_eq!(
            factories.custodian.bytecode,
            Bytes::from_static(&[0x60, 0x03])
        );
    }

    #[test]
    fn test_missing_artifact_is_an_error() {
        let dir = TempDir::new("hyperswap-artifacts").unwrap();
        let err = FactorySet::from_artifacts(dir.path()).unwrap_err();
        assert!(err.to_string().contains(ROUTER_ARTIFACT));
    }

    #[test]
    fn test_empty_bytecode_is_rejected() {
        let dir = TempDir::new("hyperswap-artifacts").unwrap();
        let path = dir.path().join(ROUTER_ARTIFACT);
        std::fs::write(&path, r#"{"bytecode":"0x"}"#).unwrap();
        assert!(load_bytecode(&path).is_err());
    }
}
