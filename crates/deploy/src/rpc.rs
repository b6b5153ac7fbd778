//! JSON-RPC transport to an Ethereum-compatible node.
//!
//! Transactions are submitted with `eth_sendTransaction`, so the configured signer must be an
//! account the node can sign for (a local dev node, or a node fronted by a signing proxy).

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::provider::{ChainConnection, ProviderError, TransactionReceipt, TransactionRequest};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between polls for a transaction receipt.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive polls in which the node must not know a transaction before it counts as dropped.
/// Load-balanced endpoints may briefly miss a transaction right after broadcast.
const DROP_THRESHOLD: u32 = 3;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// A `null` result deserializes into `Option::None` when `T` is an option.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, ProviderError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| ProviderError::Rpc(format!("failed to send {method} request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Rpc(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        return Err(if method == "eth_sendTransaction" {
            ProviderError::Rejected(message)
        } else {
            ProviderError::Rpc(message)
        });
    }

    decode_result(method, result.get("result").cloned().unwrap_or(Value::Null))
}

fn decode_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T, ProviderError> {
    serde_json::from_value(result)
        .map_err(|e| ProviderError::Rpc(format!("failed to deserialize {method} result: {e}")))
}

/// Deserialize a u64 from a hex quantity (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn serialize_quantity<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(v) => serializer.serialize_str(&format!("0x{:x}", v)),
        None => serializer.serialize_none(),
    }
}

/// `eth_sendTransaction` parameter object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTransactionParams {
    from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<Address>,
    data: Bytes,
    #[serde(
        rename = "gas",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_quantity"
    )]
    gas_limit: Option<u64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_quantity"
    )]
    max_fee_per_gas: Option<u64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_quantity"
    )]
    max_priority_fee_per_gas: Option<u64>,
}

impl From<TransactionRequest> for SendTransactionParams {
    fn from(tx: TransactionRequest) -> Self {
        Self {
            from: tx.from,
            to: tx.to,
            data: tx.data,
            gas_limit: tx.overrides.gas_limit,
            max_fee_per_gas: tx.overrides.max_fee_per_gas,
            max_priority_fee_per_gas: tx.overrides.max_priority_fee_per_gas,
        }
    }
}

/// Receipt fields returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    contract_address: Option<Address>,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
}

impl From<RpcReceipt> for TransactionReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            success: receipt.status == 1,
        }
    }
}

/// Number of blocks including and above `mined_at`, given the current head.
fn confirmations_at(head: u64, mined_at: u64) -> u64 {
    head.saturating_sub(mined_at) + 1
}

/// Result of a single receipt poll.
#[derive(Debug)]
enum ReceiptPoll {
    Confirmed(TransactionReceipt),
    /// Known to the node but not mined, or mined without enough confirmations.
    Pending,
    /// Neither a receipt nor a pending transaction.
    Unknown,
}

/// [`ChainConnection`] backed by an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcConnection {
    client: reqwest::Client,
    url: Url,
    poll_interval: Duration,
}

impl JsonRpcConnection {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ProviderError> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let head: String = self.request("eth_blockNumber", vec![]).await?;
        u64::from_str_radix(head.trim_start_matches("0x"), 16)
            .map_err(|e| ProviderError::Rpc(format!("invalid block number {head}: {e}")))
    }

    async fn poll_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<ReceiptPoll, ProviderError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;

        let Some(receipt) = receipt else {
            let pending: Option<Value> = self
                .request("eth_getTransactionByHash", vec![serde_json::json!(tx_hash)])
                .await?;
            return Ok(match pending {
                Some(_) => ReceiptPoll::Pending,
                None => ReceiptPoll::Unknown,
            });
        };

        let head = self.block_number().await?;
        if confirmations_at(head, receipt.block_number) < confirmations {
            tracing::trace!(tx_hash = %tx_hash, head, mined_at = receipt.block_number, "Waiting for more confirmations");
            return Ok(ReceiptPoll::Pending);
        }

        Ok(ReceiptPoll::Confirmed(receipt.into()))
    }
}

impl ChainConnection for JsonRpcConnection {
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ProviderError> {
        let params = serde_json::to_value(SendTransactionParams::from(tx))
            .map_err(|e| ProviderError::Rpc(format!("failed to encode transaction: {e}")))?;
        self.request("eth_sendTransaction", vec![params]).await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ProviderError> {
        let start = Instant::now();
        let mut misses = 0;

        loop {
            match self.poll_receipt(tx_hash, confirmations).await {
                Ok(ReceiptPoll::Confirmed(receipt)) => return Ok(receipt),
                Ok(ReceiptPoll::Pending) => misses = 0,
                Ok(ReceiptPoll::Unknown) => {
                    misses += 1;
                    if misses >= DROP_THRESHOLD {
                        return Err(ProviderError::Dropped { tx_hash });
                    }
                    tracing::trace!(tx_hash = %tx_hash, misses, "Transaction unknown to the node");
                }
                Err(ProviderError::Rpc(e)) => {
                    tracing::trace!(error = %e, tx_hash = %tx_hash, "Receipt poll failed, retrying...");
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() > timeout {
                return Err(ProviderError::ConfirmationTimeout {
                    tx_hash,
                    confirmations,
                    elapsed: start.elapsed(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.request(
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::provider::Overrides;

    const TX_HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

    /// Answers each method with a fixed result and records the methods it was asked for.
    #[derive(Clone, Default)]
    struct StubNode {
        results: Arc<HashMap<&'static str, Value>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl StubNode {
        fn new(results: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
            Self {
                results: Arc::new(results.into_iter().collect()),
                calls: Arc::default(),
            }
        }

        fn count(&self, method: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|m| *m == method)
                .count()
        }
    }

    async fn handle(State(node): State<StubNode>, Json(request): Json<Value>) -> Json<Value> {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let result = node.results.get(method.as_str()).cloned().unwrap_or(Value::Null);
        node.calls.lock().unwrap().push(method);
        Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
    }

    async fn serve(node: StubNode) -> JsonRpcConnection {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(handle)).with_state(node);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let url = Url::parse(&format!("http://{addr}")).unwrap();
        JsonRpcConnection {
            poll_interval: Duration::from_millis(10),
            ..JsonRpcConnection::new(url).unwrap()
        }
    }

    fn node_receipt() -> Value {
        json!({
            "transactionHash": TX_HASH,
            "blockNumber": "0x1b4",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x1",
            "gasUsed": "0x5208",
            "logs": []
        })
    }

    #[test]
    fn test_send_params_encoding() {
        let tx = TransactionRequest {
            from: Address::repeat_byte(0x11),
            to: None,
            data: Bytes::from_static(&[0x60, 0x80]),
            overrides: Overrides {
                gas_limit: Some(3_000_000),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(SendTransactionParams::from(tx)).unwrap();
        assert_eq!(json["gas"], "0x2dc6c0");
        assert_eq!(json["data"], "0x6080");
        assert!(json.get("to").is_none());
        assert!(json.get("maxFeePerGas").is_none());
    }

    #[test]
    fn test_receipt_decoding() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "blockNumber": "0x1b4",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x0",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        let receipt = TransactionReceipt::from(receipt);
        assert_eq!(receipt.block_number, 436);
        assert!(!receipt.success);
        assert!(receipt.contract_address.is_some());
    }

    #[test]
    fn test_receipt_result_decoding() {
        let receipt: Option<RpcReceipt> =
            decode_result("eth_getTransactionReceipt", node_receipt()).unwrap();
        let receipt = TransactionReceipt::from(receipt.unwrap());
        assert_eq!(receipt.block_number, 436);
        assert!(receipt.success);

        let pending: Option<RpcReceipt> =
            decode_result("eth_getTransactionReceipt", Value::Null).unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_confirmed_receipt() {
        let node = StubNode::new([
            ("eth_getTransactionReceipt", node_receipt()),
            ("eth_blockNumber", json!("0x1b5")),
        ]);
        let connection = serve(node).await;

        let receipt = connection
            .wait_for_receipt(TX_HASH.parse().unwrap(), 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, 436);
        assert!(receipt.success);
        assert!(receipt.contract_address.is_some());
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_dropped_after_repeated_misses() {
        let node = StubNode::default();
        let connection = serve(node.clone()).await;

        let err = connection
            .wait_for_receipt(TX_HASH.parse().unwrap(), 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Dropped { .. }));
        assert_eq!(
            node.count("eth_getTransactionReceipt"),
            DROP_THRESHOLD as usize
        );
    }

    #[tokio::test]
    async fn test_pending_transaction_times_out() {
        let node = StubNode::new([("eth_getTransactionByHash", json!({ "hash": TX_HASH }))]);
        let connection = serve(node).await;

        let err = connection
            .wait_for_receipt(TX_HASH.parse().unwrap(), 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_confirmations_keep_polling() {
        let node = StubNode::new([
            ("eth_getTransactionReceipt", node_receipt()),
            ("eth_blockNumber", json!("0x1b4")),
        ]);
        let connection = serve(node.clone()).await;

        let err = connection
            .wait_for_receipt(TX_HASH.parse().unwrap(), 3, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(node.count("eth_blockNumber") > 1);
    }

    #[test]
    fn test_confirmation_count() {
        assert_eq!(confirmations_at(10, 10), 1);
        assert_eq!(confirmations_at(12, 10), 3);
        // A head behind the receipt (re-org or lagging node) still counts the mined block.
        assert_eq!(confirmations_at(9, 10), 1);
    }
}
