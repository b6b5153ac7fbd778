//! Hub/spoke topology assignment.
//!
//! Every chain is initialized with exactly one of two variants. A hub links its router to the
//! local bridge router and leaves the custodian slot at the zero sentinel; a spoke does the
//! opposite. The sentinel means "not applicable for this variant" and is never dereferenced.

use std::collections::BTreeSet;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::ChainName;

/// Address stored in the router slot that does not apply to the chain's variant.
pub const SENTINEL: Address = Address::ZERO;

/// Initialization variant of a chain's router.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Topology {
    Hub,
    Spoke,
}

impl Topology {
    pub fn from_is_hub(is_hub: bool) -> Self {
        if is_hub { Self::Hub } else { Self::Spoke }
    }
}

/// Chains initialized as hubs. Every other chain is a spoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubChains(BTreeSet<ChainName>);

impl HubChains {
    pub fn contains(&self, chain: &ChainName) -> bool {
        self.0.contains(chain)
    }

    pub fn topology_for(&self, chain: &ChainName) -> Topology {
        Topology::from_is_hub(self.contains(chain))
    }
}

impl From<BTreeSet<ChainName>> for HubChains {
    fn from(chains: BTreeSet<ChainName>) -> Self {
        Self(chains)
    }
}

impl<T: Into<ChainName>> FromIterator<T> for HubChains {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Arguments of the router's `initialize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterInitialization {
    pub connection_manager: Address,
    pub custodian: Address,
    pub bridge_router: Address,
    pub is_hub: bool,
}

impl RouterInitialization {
    /// Select the variant arguments: the inactive slot is filled with [`SENTINEL`].
    pub fn new(
        topology: Topology,
        connection_manager: Address,
        bridge_router: Address,
        custodian: Address,
    ) -> Self {
        match topology {
            Topology::Hub => Self {
                connection_manager,
                custodian: SENTINEL,
                bridge_router,
                is_hub: true,
            },
            Topology::Spoke => Self {
                connection_manager,
                custodian,
                bridge_router: SENTINEL,
                is_hub: false,
            },
        }
    }

    pub fn topology(&self) -> Topology {
        Topology::from_is_hub(self.is_hub)
    }
}
