//! Per-chain transaction submission.
//!
//! [`ChainConnection`] is the transport: broadcast a transaction, wait for its receipt, run a
//! read-only call. [`ChainHandle`] wraps a connection with the chain's signer, confirmation count
//! and overrides, and serializes every transaction sent through it so the signer's nonces are
//! consumed in order. [`MultiProvider`] holds one handle per chain.

use std::future::Future;
use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::abi::AbiError;
use crate::chain::{ChainDescriptor, ChainMap, ChainName, ChainRegistry};

/// Gas and fee overrides applied to every transaction of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u64>,
}

/// A transaction ready to be broadcast. `to == None` creates a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub overrides: Overrides,
}

/// The parts of a mined transaction's receipt the orchestration looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    /// `false` if the transaction was mined but reverted.
    pub success: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Mined, but execution reverted.
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    /// The node refused the transaction at broadcast.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The transaction disappeared from the node before being mined.
    #[error("transaction {tx_hash} was dropped before inclusion")]
    Dropped { tx_hash: B256 },
    #[error(
        "timed out after {elapsed:?} waiting for {confirmations} confirmation(s) of {tx_hash}"
    )]
    ConfirmationTimeout {
        tx_hash: B256,
        confirmations: u64,
        elapsed: Duration,
    },
    #[error("receipt of {tx_hash} carries no contract address")]
    MissingContractAddress { tx_hash: B256 },
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("failed to decode call result: {0}")]
    Abi(#[from] AbiError),
}

impl ProviderError {
    /// The transaction reached the chain, or was refused by it, and will not succeed as sent.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            Self::Reverted { .. } | Self::Rejected(_) | Self::Dropped { .. }
        )
    }

    /// The outcome of the transaction is unknown; the caller may choose to wait longer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }
}

/// Transport to a single chain.
pub trait ChainConnection: Send + Sync + 'static {
    /// Broadcast a transaction and return its hash.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<B256, ProviderError>> + Send;

    /// Wait until the transaction is mined and buried under `confirmations` blocks.
    ///
    /// A mined-but-reverted transaction is returned as a receipt with `success == false`.
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> impl Future<Output = Result<TransactionReceipt, ProviderError>> + Send;

    /// Execute a read-only call against the latest block.
    fn call(&self, to: Address, data: Bytes)
    -> impl Future<Output = Result<Bytes, ProviderError>> + Send;
}

/// A chain connection bound to the chain's signer and transaction settings.
#[derive(Debug)]
pub struct ChainHandle<C> {
    pub name: ChainName,
    pub signer: Address,
    pub confirmations: u64,
    pub overrides: Overrides,
    pub receipt_timeout: Duration,
    connection: C,
    tx_lock: Mutex<()>,
}

impl<C: ChainConnection> ChainHandle<C> {
    pub fn new(descriptor: &ChainDescriptor, connection: C) -> Self {
        let settings = &descriptor.connection;
        Self {
            name: descriptor.name.clone(),
            signer: settings.signer,
            confirmations: settings.confirmations,
            overrides: settings.overrides,
            receipt_timeout: settings.receipt_timeout,
            connection,
            tx_lock: Mutex::new(()),
        }
    }

    /// Send a transaction from the chain's signer and wait for it to be confirmed.
    ///
    /// Holds the chain's transaction lock from broadcast to confirmation, so concurrent callers
    /// on the same chain never race for the signer's nonce.
    pub async fn send_and_confirm(
        &self,
        to: Option<Address>,
        data: Bytes,
    ) -> Result<TransactionReceipt, ProviderError> {
        let _guard = self.tx_lock.lock().await;

        let tx_hash = self
            .connection
            .send_transaction(TransactionRequest {
                from: self.signer,
                to,
                data,
                overrides: self.overrides,
            })
            .await?;

        tracing::debug!(
            chain = %self.name,
            tx_hash = %tx_hash,
            confirmations = self.confirmations,
            "Transaction broadcast, waiting for confirmation"
        );

        let receipt = self
            .connection
            .wait_for_receipt(tx_hash, self.confirmations, self.receipt_timeout)
            .await?;

        if !receipt.success {
            return Err(ProviderError::Reverted { tx_hash });
        }

        tracing::debug!(
            chain = %self.name,
            tx_hash = %tx_hash,
            block = receipt.block_number,
            "Transaction confirmed"
        );

        Ok(receipt)
    }

    /// Create a contract and return its address.
    pub async fn deploy_contract(
        &self,
        creation_code: Bytes,
    ) -> Result<(Address, TransactionReceipt), ProviderError> {
        let receipt = self.send_and_confirm(None, creation_code).await?;
        let address = receipt
            .contract_address
            .ok_or(ProviderError::MissingContractAddress {
                tx_hash: receipt.tx_hash,
            })?;
        Ok((address, receipt))
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.connection.call(to, data).await
    }
}

/// One [`ChainHandle`] per chain.
#[derive(Debug)]
pub struct MultiProvider<C> {
    chains: ChainMap<ChainHandle<C>>,
}

impl<C> Default for MultiProvider<C> {
    fn default() -> Self {
        Self {
            chains: ChainMap::new(),
        }
    }
}

impl<C: ChainConnection> MultiProvider<C> {
    /// Open a connection to every chain in the registry.
    pub fn from_registry<F, E>(registry: &ChainRegistry, mut connect: F) -> Result<Self, E>
    where
        F: FnMut(&ChainDescriptor) -> Result<C, E>,
    {
        let mut provider = Self::default();
        for descriptor in registry.descriptors() {
            let connection = connect(descriptor)?;
            provider.insert(ChainHandle::new(descriptor, connection));
        }
        Ok(provider)
    }

    pub fn insert(&mut self, handle: ChainHandle<C>) {
        self.chains.insert(handle.name.clone(), handle);
    }

    pub fn get(&self, chain: &ChainName) -> Option<&ChainHandle<C>> {
        self.chains.get(chain)
    }
}
