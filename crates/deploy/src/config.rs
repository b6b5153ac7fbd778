//! Deployment configuration.
//!
//! The configuration lives in a `Hyperswap.toml` file. Values can be overridden through
//! `HYPERSWAP_`-prefixed environment variables, with `__` separating nested keys
//! (e.g. `HYPERSWAP_CHAINS__ALFAJORES__RPC_URL`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chain::{
    ChainDescriptor, ChainMap, ChainName, ChainRegistry, ConnectionConfig,
    DEFAULT_RECEIPT_TIMEOUT, known_domain_id,
};
use crate::provider::Overrides;
use crate::topology::HubChains;

/// The default name for the hyperswap configuration file.
pub const CONFIG_FILENAME: &str = "Hyperswap.toml";

/// The default name of the address book written by a deployment.
pub const ADDRESS_BOOK_FILENAME: &str = "addresses.json";

const ENV_PREFIX: &str = "HYPERSWAP_";

/// Intended router configuration of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Expected owner of the router. The router is owned by whoever initializes it, so this is
    /// normally the chain's signer.
    pub owner: Address,
    /// Connection manager the router is initialized with.
    pub connection_manager: Address,
    /// Gas paymaster passed to the router constructor.
    pub interchain_gas_paymaster: Address,
}

/// Configuration of a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the chain.
    pub rpc_url: Url,
    /// Unlocked account that sends every transaction on this chain.
    pub signer: Address,
    /// Number of confirmations to wait for.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Domain id of the chain. Defaults to the built-in value for well-known chain names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<u32>,
    /// Maximum time to wait for a transaction to be confirmed, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub overrides: Overrides,
    pub router: RouterConfig,
}

fn default_confirmations() -> u64 {
    1
}

/// Top-level deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperswapConfig {
    /// Directory holding the contract artifacts.
    pub artifacts: PathBuf,
    /// Where the address book is written to and read from.
    #[serde(default = "default_address_book")]
    pub address_book: PathBuf,
    /// Chains initialized as hubs. Every other chain is a spoke.
    #[serde(default)]
    pub hub_chains: BTreeSet<ChainName>,
    pub chains: ChainMap<ChainConfig>,
}

fn default_address_book() -> PathBuf {
    PathBuf::from(ADDRESS_BOOK_FILENAME)
}

impl HyperswapConfig {
    /// Load the configuration from a TOML file, merged with environment overrides.
    ///
    /// If `path` is a directory, `Hyperswap.toml` inside it is used.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file or directory not found: {}",
                path.display()
            );
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

        config.validate()?;
        tracing::info!(path = %config_path.display(), chains = config.chains.len(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Check that hub chains are configured and every chain resolves a domain id.
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("No chains configured");
        }

        for hub in &self.hub_chains {
            if !self.chains.contains_key(hub) {
                anyhow::bail!("Hub chain {} is not a configured chain", hub);
            }
        }

        for name in self.chains.keys() {
            self.domain_id(name)?;
        }

        Ok(())
    }

    fn domain_id(&self, name: &ChainName) -> Result<u32> {
        self.chains
            .get(name)
            .and_then(|c| c.domain_id)
            .or_else(|| known_domain_id(name.as_str()))
            .with_context(|| {
                format!(
                    "Chain {} has no domain_id and is not a well-known chain",
                    name
                )
            })
    }

    pub fn hub_chains(&self) -> HubChains {
        self.hub_chains.clone().into()
    }

    /// Build the chain registry from the configured chains.
    pub fn registry(&self) -> Result<ChainRegistry> {
        let descriptors = self
            .chains
            .iter()
            .map(|(name, chain)| {
                Ok(ChainDescriptor {
                    name: name.clone(),
                    domain_id: self.domain_id(name)?,
                    connection: ConnectionConfig {
                        rpc_url: chain.rpc_url.clone(),
                        signer: chain.signer,
                        confirmations: chain.confirmations,
                        overrides: chain.overrides,
                        receipt_timeout: chain
                            .receipt_timeout_secs
                            .map(Duration::from_secs)
                            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT),
                    },
                    hub_eligible: self.hub_chains.contains(name),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ChainRegistry::new(descriptors).context("Invalid chain configuration")
    }

    /// The intended router configuration of every chain.
    pub fn router_configs(&self) -> ChainMap<RouterConfig> {
        self.chains
            .iter()
            .map(|(name, chain)| (name.clone(), chain.router))
            .collect()
    }
}
