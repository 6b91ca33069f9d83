//! Outbound ports (driven side - SPI)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{BlobAttestation, Hash};
use std::time::Duration;

use crate::domain::{
    BatchHeader, BlobHeader, EncodedBlob, EncodedChunk, EncodingParams, Operator, OperatorState,
};
use crate::error::Result;

/// Transaction hash
pub type TxHash = Hash;

/// Port: external encoding service
#[async_trait]
pub trait EncoderClient: Send + Sync {
    /// Encode `data` into chunks per quorum.
    ///
    /// Implementations must give up after `timeout` and report
    /// `BatcherError::Timeout`.
    async fn encode(
        &self,
        data: &[u8],
        params: &[EncodingParams],
        timeout: Duration,
    ) -> Result<EncodedBlob>;
}

/// Port: on-chain operator registry
#[async_trait]
pub trait OperatorRegistry: Send + Sync {
    /// Operator set as of `block_number`.
    async fn operator_state(&self, block_number: u64) -> Result<OperatorState>;
}

/// Chunks of one blob sent to an operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobChunks {
    pub blob_header: BlobHeader,
    pub chunks: Vec<EncodedChunk>,
}

/// Request to store chunks of a batch on one operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChunksRequest {
    pub batch_header: BatchHeader,
    pub blobs: Vec<BlobChunks>,
    /// Batcher signature over `keccak(batch_header_hash || operator_id)`.
    pub signature: Vec<u8>,
}

/// Node reply: one signature per blob of the request, in request order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChunksReply {
    pub signatures: Vec<Vec<u8>>,
}

/// Port: storage node transport
#[async_trait]
pub trait StorageNodeClient: Send + Sync {
    async fn store_chunks(
        &self,
        operator: &Operator,
        request: StoreChunksRequest,
    ) -> Result<StoreChunksReply>;
}

/// Payload of the batch confirmation transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmBatchCall {
    pub header: BatchHeader,
    pub blob_header_hashes: Vec<Hash>,
    /// Attestations per blob, same order as `blob_header_hashes`.
    pub attestations: Vec<Vec<BlobAttestation>>,
}

/// Mined transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// `false` if execution reverted.
    pub success: bool,
}

/// A broadcast confirmation transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentTx {
    pub tx_hash: TxHash,
    pub nonce: u64,
    pub gas_price: u128,
}

/// Port: chain access
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Sign and broadcast the confirmation transaction.
    ///
    /// With `replacing` set, the transaction reuses that nonce at a higher
    /// gas price so at most one of the two can be mined.
    async fn submit_confirmation(
        &self,
        call: &ConfirmBatchCall,
        replacing: Option<&SentTx>,
    ) -> Result<SentTx>;

    /// `None` while the transaction is pending or unknown.
    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>>;
}
