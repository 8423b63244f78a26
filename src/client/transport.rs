//! Wire layer between the upload client and the chunk endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server responded with HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Server did not acknowledge the chunk: {0}")]
    Rejected(String),
}

/// One chunk on its way to the server.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

/// Artifact details returned with the completing chunk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteArtifact {
    pub file_name: String,
    pub path: String,
    pub size: u64,
}

/// Body of a successful chunk response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReply {
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    pub chunk_index: Option<u32>,
    pub total_chunks: Option<u32>,
    pub data: Option<RemoteArtifact>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Turns a raw HTTP status and body into a reply, treating non-2xx statuses
/// and bodies without `success: true` as failures.
pub fn interpret_response(status: u16, body: &[u8]) -> Result<ChunkReply, TransportError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        return Err(TransportError::Status { status, message });
    }

    let reply: ChunkReply = serde_json::from_slice(body)
        .map_err(|e| TransportError::Rejected(format!("unreadable response body: {e}")))?;

    match reply.success {
        Some(true) => Ok(reply),
        Some(false) => Err(TransportError::Rejected(
            reply
                .message
                .unwrap_or_else(|| "success flag was false".to_string()),
        )),
        None => Err(TransportError::Rejected(
            "response is missing the success flag".to_string(),
        )),
    }
}

#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkReply, TransportError>;
}

/// Sends chunks as `multipart/form-data` POSTs.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkReply, TransportError> {
        let payload_part = || {
            Part::stream_with_length(request.payload.clone(), request.payload.len() as u64)
                .file_name(request.file_name.clone())
        };
        // An unparsable mime type is sent without a part content type
        let part = payload_part()
            .mime_str(&request.file_type)
            .unwrap_or_else(|_| payload_part());

        let form = Form::new()
            .part("chunk", part)
            .text("chunkIndex", request.chunk_index.to_string())
            .text("totalChunks", request.total_chunks.to_string())
            .text("fileName", request.file_name)
            .text("fileType", request.file_type)
            .text("uploadId", request.upload_id);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        interpret_response(status, &body)
    }
}
