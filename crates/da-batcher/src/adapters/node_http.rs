//! HTTP transport to storage nodes: `POST {socket}/v1/store_chunks`.

use async_trait::async_trait;

use crate::domain::Operator;
use crate::error::{BatcherError, Result};
use crate::ports::{StorageNodeClient, StoreChunksReply, StoreChunksRequest};

/// Storage node client over HTTP/JSON. Per-call deadlines are applied by the dispatcher.
#[derive(Clone, Default)]
pub struct HttpStorageNodeClient {
    client: reqwest::Client,
}

impl HttpStorageNodeClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageNodeClient for HttpStorageNodeClient {
    async fn store_chunks(
        &self,
        operator: &Operator,
        request: StoreChunksRequest,
    ) -> Result<StoreChunksReply> {
        let url = format!("{}/v1/store_chunks", operator.socket.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BatcherError::Dispatch(format!("{}: {e}", operator.id.short())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BatcherError::Dispatch(format!(
                "{} returned {status}: {text}",
                operator.id.short()
            )));
        }

        response
            .json::<StoreChunksReply>()
            .await
            .map_err(|e| BatcherError::Dispatch(format!("{}: malformed reply: {e}", operator.id.short())))
    }
}
