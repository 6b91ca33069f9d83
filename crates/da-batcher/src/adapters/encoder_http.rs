//! HTTP client for the external encoding service.
//!
//! `POST {socket}/v1/encode` with the payload and per-quorum parameters;
//! byte fields travel hex-encoded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::domain::{EncodedBlob, EncodedChunk, EncodingParams};
use crate::error::{BatcherError, ConfigError, Result, Stage};
use crate::ports::EncoderClient;

#[derive(Serialize)]
struct EncodeRequest<'a> {
    data: String,
    params: &'a [EncodingParams],
}

#[derive(Serialize, Deserialize)]
pub(crate) struct WireChunk {
    pub quorum_id: u8,
    pub index: u32,
    pub data: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct EncodeResponse {
    pub commitment: String,
    pub data_length: u64,
    pub chunks: Vec<WireChunk>,
}

impl EncodeResponse {
    fn into_encoded(self) -> Result<EncodedBlob> {
        let commitment = decode_hex(&self.commitment)?
            .try_into()
            .map_err(|_| BatcherError::Encoder("commitment must be 32 bytes".into()))?;
        let chunks = self
            .chunks
            .into_iter()
            .map(|c| {
                Ok(EncodedChunk {
                    quorum_id: c.quorum_id,
                    index: c.index,
                    data: decode_hex(&c.data)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EncodedBlob {
            commitment,
            data_length: self.data_length,
            chunks,
        })
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| BatcherError::Encoder(format!("malformed hex in response: {e}")))
}

/// Encoder reached over HTTP
pub struct HttpEncoderClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpEncoderClient {
    /// An empty socket is a configuration error, never a runtime fallback.
    pub fn new(socket: &str) -> std::result::Result<Self, ConfigError> {
        let socket = socket.trim();
        if socket.is_empty() {
            return Err(ConfigError::MissingEncoderSocket);
        }
        let base = if socket.contains("://") {
            socket.to_string()
        } else {
            format!("http://{socket}")
        };
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::Invalid(format!("encoder http client: {e}")))?;
        Ok(Self {
            endpoint: format!("{}/v1/encode", base.trim_end_matches('/')),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, data: &[u8], params: &[EncodingParams], timeout: Duration) -> Result<EncodedBlob> {
        let body = EncodeRequest {
            data: hex::encode(data),
            params,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BatcherError::Timeout {
                        stage: Stage::Encode,
                        after: timeout,
                    }
                } else {
                    BatcherError::Encoder(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BatcherError::Encoder(format!("encoder returned {status}: {text}")));
        }

        let decoded: EncodeResponse = response
            .json()
            .await
            .map_err(|e| BatcherError::Encoder(format!("malformed response: {e}")))?;
        decoded.into_encoded()
    }
}

#[async_trait]
impl EncoderClient for HttpEncoderClient {
    async fn encode(
        &self,
        data: &[u8],
        params: &[EncodingParams],
        timeout: Duration,
    ) -> Result<EncodedBlob> {
        debug!(bytes = data.len(), quorums = params.len(), "[encoder] Encoding blob");
        tokio::time::timeout(timeout, self.post(data, params, timeout))
            .await
            .map_err(|_| BatcherError::Timeout {
                stage: Stage::Encode,
                after: timeout,
            })?
    }
}
