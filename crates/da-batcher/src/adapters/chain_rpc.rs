//! Ethereum JSON-RPC chain client.
//!
//! Reads the head and receipts, and submits batch confirmations as signed
//! legacy transactions to the confirmation contract.

use async_trait::async_trait;
use primitive_types::{H160, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use shared_crypto::Secp256k1KeyPair;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::tx::{confirm_batch_calldata, LegacyTransaction};
use crate::config::ChainConfig;
use crate::error::{BatcherError, ConfigError, Result};
use crate::ports::{ChainClient, ConfirmBatchCall, SentTx, TxHash, TxReceipt};

#[derive(Debug, Deserialize)]
struct JsonResponseBody {
    #[serde(default)]
    error: Option<JsonError>,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

/// Failure of a single RPC round trip.
enum RpcFailure {
    /// The node answered with a JSON-RPC error object
    Server { code: i64, message: String },
    /// Transport, HTTP status or decoding failure
    Transport(String),
}

impl From<RpcFailure> for BatcherError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Server { code, message } => {
                BatcherError::Chain(format!("server error {code}: {message}"))
            }
            RpcFailure::Transport(message) => BatcherError::Chain(message),
        }
    }
}

/// Chain client speaking Ethereum JSON-RPC over HTTP
pub struct JsonRpcChainClient {
    url: String,
    client: reqwest::Client,
    signer: Arc<Secp256k1KeyPair>,
    sender: [u8; 20],
    chain_id: u64,
    contract: [u8; 20],
    gas_limit: u64,
    /// Serializes nonce lookup and broadcast
    nonce_lock: Mutex<()>,
}

impl JsonRpcChainClient {
    pub fn new(config: &ChainConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let signer = config.signer()?;
        let sender = signer
            .address()
            .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            url: config.rpc_url.trim().to_string(),
            client: reqwest::Client::new(),
            signer: Arc::new(signer),
            sender,
            chain_id: config.chain_id,
            contract: config.contract()?,
            gas_limit: config.gas_limit,
            nonce_lock: Mutex::new(()),
        })
    }

    /// Address transactions are sent from.
    pub fn sender(&self) -> [u8; 20] {
        self.sender
    }

    async fn rpc_request<D: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<D, RpcFailure> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RpcFailure::Transport(format!("{method}: {e}")))?;
        let body: JsonResponseBody = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{method}: malformed response: {e}")))?;

        if let Some(JsonError { code, message }) = body.error {
            Err(RpcFailure::Server { code, message })
        } else {
            serde_json::from_value(body.result)
                .map_err(|e| RpcFailure::Transport(format!("{method}: unexpected result: {e}")))
        }
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> Result<U256> {
        let value: String = self.rpc_request(method, params).await?;
        parse_quantity(&value)
    }
}

fn parse_quantity(value: &str) -> Result<U256> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);
    U256::from_str_radix(hex_str, 16)
        .map_err(|e| BatcherError::Chain(format!("bad quantity {value:?}: {e}")))
}

fn parse_u64(value: &str) -> Result<u64> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(hex_str, 16)
        .map_err(|e| BatcherError::Chain(format!("bad quantity {value:?}: {e}")))
}

/// Nodes only accept a same-nonce replacement priced at least 10% higher.
fn replacement_gas_price(previous: u128) -> U256 {
    let previous = U256::from(previous);
    previous + previous / 10 + 1
}

fn parse_hash(value: &str) -> Result<TxHash> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| BatcherError::Chain(format!("bad transaction hash {value:?}")))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn block_number(&self) -> Result<u64> {
        let value: String = self.rpc_request("eth_blockNumber", json!([])).await?;
        parse_u64(&value)
    }

    async fn submit_confirmation(
        &self,
        call: &ConfirmBatchCall,
        replacing: Option<&SentTx>,
    ) -> Result<SentTx> {
        let data = confirm_batch_calldata(call)?;
        let _guard = self.nonce_lock.lock().await;

        let market = self.quantity("eth_gasPrice", json!([])).await?;
        let (nonce, gas_price) = match replacing {
            Some(previous) => (
                U256::from(previous.nonce),
                market.max(replacement_gas_price(previous.gas_price)),
            ),
            None => {
                let sender = format!("0x{}", hex::encode(self.sender));
                let nonce = self
                    .quantity("eth_getTransactionCount", json!([sender, "pending"]))
                    .await?;
                (nonce, market)
            }
        };
        if nonce.bits() > 64 || gas_price.bits() > 128 {
            return Err(BatcherError::Chain(format!(
                "nonce {nonce} or gas price {gas_price} out of range"
            )));
        }

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: U256::from(self.gas_limit),
            to: H160::from(self.contract),
            value: U256::zero(),
            data,
        };
        let (raw, tx_hash) = tx.sign(&self.signer, self.chain_id)?;
        debug!(
            nonce = %nonce,
            gas_price = %gas_price,
            bytes = raw.len(),
            replacement = replacing.is_some(),
            "[chain] Broadcasting confirmation"
        );

        let returned: String = self
            .rpc_request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await
            .map_err(|failure| match failure {
                RpcFailure::Server { message, .. } => BatcherError::TransactionRejected(message),
                other => other.into(),
            })?;

        if parse_hash(&returned)? != tx_hash {
            return Err(BatcherError::Chain(format!(
                "node reported hash {returned}, expected 0x{}",
                hex::encode(tx_hash)
            )));
        }
        info!(tx = %returned, nonce = %nonce, "[chain] Confirmation submitted");
        Ok(SentTx {
            tx_hash,
            nonce: nonce.low_u64(),
            gas_price: gas_price.low_u128(),
        })
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc_request(
                "eth_getTransactionReceipt",
                json!([format!("0x{}", hex::encode(tx_hash))]),
            )
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Pending receipts on some nodes carry no block yet
        let Some(block) = receipt.block_number else {
            return Ok(None);
        };
        Ok(Some(TxReceipt {
            tx_hash: parse_hash(&receipt.transaction_hash)?,
            block_number: parse_u64(&block)?,
            success: receipt.status.as_deref() == Some("0x1"),
        }))
    }
}
