//! Contract roles, typed contract handles and the per-chain contract bundle.

use alloy_core::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::abi::{self, Token};
use crate::provider::{ChainConnection, ChainHandle, ProviderError};
use crate::topology::{RouterInitialization, Topology};

/// Function signatures of the hyperswap contracts.
pub mod signatures {
    pub const INITIALIZE: &str = "initialize(address,address,address,bool)";
    pub const OWNER: &str = "owner()";
    pub const CONNECTION_MANAGER: &str = "abacusConnectionManager()";
    pub const CUSTODIAN: &str = "custodian()";
    pub const BRIDGE_ROUTER: &str = "bridgeRouter()";
    pub const IS_HUB: &str = "isHub()";
    pub const ROUTER: &str = "router()";
    pub const LOCAL_DOMAIN: &str = "localDomain()";
}

/// The contracts deployed on every chain, in deployment order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ContractRole {
    Router,
    BridgeRouter,
    Custodian,
}

async fn view<C: ChainConnection>(
    chain: &ChainHandle<C>,
    to: Address,
    signature: &str,
) -> Result<Bytes, ProviderError> {
    chain.call(to, abi::encode_call(signature, &[])).await
}

/// Message-passing entrypoint. Holds the hub/spoke flag and the bridge links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterContract(Address);

impl RouterContract {
    pub fn at(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    pub fn initialize_calldata(init: &RouterInitialization) -> Bytes {
        abi::encode_call(
            signatures::INITIALIZE,
            &[
                Token::Address(init.connection_manager),
                Token::Address(init.custodian),
                Token::Address(init.bridge_router),
                Token::Bool(init.is_hub),
            ],
        )
    }

    pub async fn owner<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::OWNER).await?;
        Ok(abi::decode_address(&data, 0)?)
    }

    pub async fn connection_manager<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::CONNECTION_MANAGER).await?;
        Ok(abi::decode_address(&data, 0)?)
    }

    pub async fn custodian<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::CUSTODIAN).await?;
        Ok(abi::decode_address(&data, 0)?)
    }

    pub async fn bridge_router<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::BRIDGE_ROUTER).await?;
        Ok(abi::decode_address(&data, 0)?)
    }

    pub async fn is_hub<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<bool, ProviderError> {
        let data = view(chain, self.0, signatures::IS_HUB).await?;
        Ok(abi::decode_bool(&data, 0)?)
    }
}

/// Cross-chain asset router, bound to the local router and domain at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeRouterContract(Address);

impl BridgeRouterContract {
    pub fn at(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    pub async fn router<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::ROUTER).await?;
        Ok(abi::decode_address(&data, 0)?)
    }

    pub async fn local_domain<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<u32, ProviderError> {
        let data = view(chain, self.0, signatures::LOCAL_DOMAIN).await?;
        Ok(abi::decode_u32(&data, 0)?)
    }
}

/// Asset-holding contract, bound to the local router at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustodianContract(Address);

impl CustodianContract {
    pub fn at(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    pub async fn router<C: ChainConnection>(
        &self,
        chain: &ChainHandle<C>,
    ) -> Result<Address, ProviderError> {
        let data = view(chain, self.0, signatures::ROUTER).await?;
        Ok(abi::decode_address(&data, 0)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    #[error("bundle has no {0} contract")]
    Incomplete(ContractRole),
    #[error("router has not been initialized")]
    Uninitialized,
}

/// The contracts deployed on one chain.
///
/// Roles are filled in deployment order. `topology` is only set once the router's initialization
/// transaction has been confirmed, so a bundle with all three contracts but no topology is a
/// deployed-but-uninitialized chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_router: Option<BridgeRouterContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custodian: Option<CustodianContract>,
    #[serde(default)]
    pub topology: Option<Topology>,
}

impl ContractBundle {
    /// Address of a role, ignoring unset and zero entries.
    pub fn address(&self, role: ContractRole) -> Option<Address> {
        let address = match role {
            ContractRole::Router => self.router.map(|c| c.address()),
            ContractRole::BridgeRouter => self.bridge_router.map(|c| c.address()),
            ContractRole::Custodian => self.custodian.map(|c| c.address()),
        };
        address.filter(|a| !a.is_zero())
    }

    pub fn missing_roles(&self) -> Vec<ContractRole> {
        use strum::IntoEnumIterator;

        ContractRole::iter()
            .filter(|role| self.address(*role).is_none())
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.topology.is_some()
    }

    /// All three contracts are deployed at non-zero addresses and the router is initialized.
    pub fn is_complete(&self) -> bool {
        self.missing_roles().is_empty() && self.is_initialized()
    }

    pub fn require_router(&self) -> Result<RouterContract, BundleError> {
        self.address(ContractRole::Router)
            .map(RouterContract::at)
            .ok_or(BundleError::Incomplete(ContractRole::Router))
    }

    pub fn require_bridge_router(&self) -> Result<BridgeRouterContract, BundleError> {
        self.address(ContractRole::BridgeRouter)
            .map(BridgeRouterContract::at)
            .ok_or(BundleError::Incomplete(ContractRole::BridgeRouter))
    }

    pub fn require_custodian(&self) -> Result<CustodianContract, BundleError> {
        self.address(ContractRole::Custodian)
            .map(CustodianContract::at)
            .ok_or(BundleError::Incomplete(ContractRole::Custodian))
    }

    pub fn require_topology(&self) -> Result<Topology, BundleError> {
        self.topology.ok_or(BundleError::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_bundle() -> ContractBundle {
        ContractBundle {
            router: Some(RouterContract::at(Address::repeat_byte(1))),
            bridge_router: Some(BridgeRouterContract::at(Address::repeat_byte(2))),
            custodian: Some(CustodianContract::at(Address::repeat_byte(3))),
            topology: Some(Topology::Hub),
        }
    }

    #[test]
    fn test_empty_bundle_is_missing_every_role() {
        let bundle = ContractBundle::default();
        assert_eq!(
            bundle.missing_roles(),
            vec![
                ContractRole::Router,
                ContractRole::BridgeRouter,
                ContractRole::Custodian
            ]
        );
        assert!(!bundle.is_complete());
        assert_eq!(
            bundle.require_router(),
            Err(BundleError::Incomplete(ContractRole::Router))
        );
    }

    #[test]
    fn test_full_bundle_is_complete() {
        let bundle = full_bundle();
        assert!(bundle.missing_roles().is_empty());
        assert!(bundle.is_complete());
        assert_eq!(
            bundle.require_custodian().unwrap().address(),
            Address::repeat_byte(3)
        );
    }

    #[test]
    fn test_uninitialized_bundle_is_not_complete() {
        let bundle = ContractBundle {
            topology: None,
            ..full_bundle()
        };
        assert!(bundle.missing_roles().is_empty());
        assert!(!bundle.is_complete());
        assert_eq!(bundle.require_topology(), Err(BundleError::Uninitialized));
    }

    #[test]
    fn test_zero_address_counts_as_missing() {
        let bundle = ContractBundle {
            custodian: Some(CustodianContract::at(Address::ZERO)),
            ..full_bundle()
        };
        assert_eq!(bundle.missing_roles(), vec![ContractRole::Custodian]);
        assert!(!bundle.is_complete());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(ContractRole::BridgeRouter.to_string(), "bridgeRouter");
        assert_eq!(
            "custodian".parse::<ContractRole>().unwrap(),
            ContractRole::Custodian
        );
    }

    #[test]
    fn test_bundle_json_shape() {
        let json = serde_json::to_value(full_bundle()).unwrap();
        assert_eq!(
            json["bridgeRouter"],
            "0x0202020202020202020202020202020202020202"
        );
        assert_eq!(json["topology"], "hub");

        let partial: ContractBundle = serde_json::from_value(serde_json::json!({
            "router": "0x0101010101010101010101010101010101010101"
        }))
        .unwrap();
        assert_eq!(
            partial.missing_roles(),
            vec![ContractRole::BridgeRouter, ContractRole::Custodian]
        );
        assert!(!partial.is_initialized());
    }
}
