//! Chain client: the faucet's view of the blockchain node

use crate::address::Address;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by node: {0}")]
    Rejected(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Block tag for account queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Pending,
}

impl BlockTag {
    fn as_str(&self) -> &'static str {
        match self {
            BlockTag::Pending => "pending",
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> ChainResult<u64>;

    async fn balance(&self, address: &Address) -> ChainResult<u128>;

    /// Number of transactions sent from `address`, i.e. its next nonce
    async fn transaction_count(&self, address: &Address, tag: BlockTag) -> ChainResult<u64>;

    /// Broadcast a signed transaction; returns the node's transaction hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<String>;
}

/// JSON-RPC client for an Ethereum-compatible node
pub struct JsonRpcChainClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> ChainResult<Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        debug!("RPC call: {}", method);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChainError::Network(format!("Request failed: {}", e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Network(format!("Invalid response: {}", e)))?;

        if let Some(error) = json.get("error") {
            return Err(classify_rpc_error(error));
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| ChainError::Network(format!("{} returned no result", method)))
    }
}

/// Map a JSON-RPC error object onto the faucet's failure classes
pub fn classify_rpc_error(error: &Value) -> ChainError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    if message.to_lowercase().contains("insufficient funds") {
        ChainError::InsufficientFunds(message)
    } else {
        ChainError::Rejected(message)
    }
}

fn parse_quantity(value: &Value) -> ChainResult<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Network(format!("Expected hex quantity, got {}", value)))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Network(format!("Invalid quantity {}: {}", s, e)))
}

fn parse_u64_quantity(value: &Value) -> ChainResult<u64> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity)
        .map_err(|_| ChainError::Network(format!("Quantity {} overflows u64", quantity)))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn chain_id(&self) -> ChainResult<u64> {
        let result = self.call("eth_chainId", serde_json::json!([])).await?;
        parse_u64_quantity(&result)
    }

    async fn balance(&self, address: &Address) -> ChainResult<u128> {
        let result = self
            .call("eth_getBalance", serde_json::json!([address.to_hex(), "latest"]))
            .await?;
        parse_quantity(&result)
    }

    async fn transaction_count(&self, address: &Address, tag: BlockTag) -> ChainResult<u64> {
        let result = self
            .call(
                "eth_getTransactionCount",
                serde_json::json!([address.to_hex(), tag.as_str()]),
            )
            .await?;
        parse_u64_quantity(&result)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<String> {
        let result = self
            .call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Network(format!("Unexpected tx hash: {}", result)))
    }
}
