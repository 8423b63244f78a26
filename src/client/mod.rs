//! Client-side orchestration of chunked uploads.
//!
//! [`ChunkUploadClient::upload`] splits a source into fixed-size ranges and
//! sends them one at a time. A chunk is only dispatched after the previous
//! chunk's response arrived, so the server sees indices in order in the
//! common case. Each chunk is retried per [`RetryPolicy`]; if any chunk runs
//! out of attempts the whole upload fails.

pub mod retry;
pub mod source;
pub mod transport;

use crate::config::ClientConfig;
use crate::services::splitter::{self, SplitError};
use retry::RetryPolicy;
use source::UploadSource;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use transport::{ChunkReply, ChunkRequest, ChunkTransport, HttpTransport, RemoteArtifact, TransportError};
use uuid::Uuid;

pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;
pub type ChunkCompleteFn = Box<dyn Fn(u32, u32) + Send + Sync>;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload failed: chunk {chunk_index} of {total_chunks} never arrived after {attempts} attempts: {source}")]
    UploadFailed {
        chunk_index: u32,
        total_chunks: u32,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Upload cancelled before chunk {next_chunk} of {total_chunks}")]
    Cancelled { next_chunk: u32, total_chunks: u32 },

    #[error("Server accepted all {total_chunks} chunks but returned no artifact")]
    Incomplete { total_chunks: u32 },

    #[error("Failed to read chunk {chunk_index} from source: {source}")]
    Source {
        chunk_index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid upload options: {0}")]
    InvalidOptions(#[from] SplitError),
}

/// True when a file of `size` bytes must take the chunked path.
pub fn needs_chunking(size: u64, threshold: u64) -> bool {
    size > threshold
}

/// Per-call knobs for [`ChunkUploadClient::upload`].
pub struct UploadOptions {
    pub chunk_size: u64,
    pub retry: RetryPolicy,
    on_progress: Option<ProgressFn>,
    on_chunk_complete: Option<ChunkCompleteFn>,
    cancel: Option<CancellationToken>,
}

impl UploadOptions {
    pub fn new(chunk_size: u64, retry: RetryPolicy) -> Self {
        Self {
            chunk_size,
            retry,
            on_progress: None,
            on_chunk_complete: None,
            cancel: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.chunk_size, config.retry.clone())
    }

    /// Called with the completed percentage (0-100) after each chunk.
    pub fn on_progress(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called with `(index, total)` once per successfully sent chunk.
    pub fn on_chunk_complete(mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.on_chunk_complete = Some(Box::new(f));
        self
    }

    /// Checked before each chunk is dispatched.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub upload_id: String,
    pub file_name: String,
    pub total_chunks: u32,
    /// `None` for an empty source, which is a no-op
    pub artifact: Option<RemoteArtifact>,
}

impl UploadOutcome {
    pub fn final_path(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.path.as_str())
    }
}

pub struct ChunkUploadClient {
    transport: Arc<dyn ChunkTransport>,
    config: ClientConfig,
}

impl ChunkUploadClient {
    pub fn new(transport: Arc<dyn ChunkTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Client posting to `config.endpoint` over HTTP.
    pub fn http(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// [`needs_chunking`] with the configured threshold.
    pub fn needs_chunking(&self, source: &dyn UploadSource) -> bool {
        needs_chunking(source.size(), self.config.chunking_threshold)
    }

    pub async fn upload(
        &self,
        source: &dyn UploadSource,
        options: UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        let ranges = splitter::split(source.size(), options.chunk_size)?;
        let total_chunks = ranges.len() as u32;
        let upload_id = Uuid::new_v4().to_string();

        if ranges.is_empty() {
            tracing::info!("{} is empty, nothing to upload", source.name());
            return Ok(UploadOutcome {
                upload_id,
                file_name: source.name().to_string(),
                total_chunks: 0,
                artifact: None,
            });
        }

        tracing::info!(
            "Uploading {} ({} bytes) in {} chunks as {}",
            source.name(),
            source.size(),
            total_chunks,
            upload_id
        );

        let mut last_reply = None;
        for range in ranges {
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                tracing::warn!("Upload {} cancelled before chunk {}", upload_id, range.index);
                return Err(UploadError::Cancelled {
                    next_chunk: range.index,
                    total_chunks,
                });
            }

            let payload = source
                .read_range(range)
                .await
                .map_err(|source| UploadError::Source {
                    chunk_index: range.index,
                    source,
                })?;

            let request = ChunkRequest {
                upload_id: upload_id.clone(),
                file_name: source.name().to_string(),
                file_type: source.mime_type().to_string(),
                chunk_index: range.index,
                total_chunks,
                payload,
            };
            let reply = self.send_with_retry(request, &options.retry).await?;

            let done = range.index + 1;
            if let Some(on_progress) = &options.on_progress {
                on_progress(done as f64 * 100.0 / total_chunks as f64);
            }
            if let Some(on_chunk_complete) = &options.on_chunk_complete {
                on_chunk_complete(range.index, total_chunks);
            }
            last_reply = Some(reply);
        }

        let artifact = last_reply
            .and_then(|r| r.data)
            .ok_or(UploadError::Incomplete { total_chunks })?;

        tracing::info!(
            "Upload {} complete: {} ({} bytes)",
            upload_id,
            artifact.path,
            artifact.size
        );

        Ok(UploadOutcome {
            upload_id,
            file_name: source.name().to_string(),
            total_chunks,
            artifact: Some(artifact),
        })
    }

    async fn send_with_retry(
        &self,
        request: ChunkRequest,
        policy: &RetryPolicy,
    ) -> Result<ChunkReply, UploadError> {
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            match self.transport.send_chunk(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt >= attempts => {
                    tracing::error!(
                        "Chunk {} of {} failed after {} attempts: {}",
                        request.chunk_index,
                        request.total_chunks,
                        attempt,
                        e
                    );
                    return Err(UploadError::UploadFailed {
                        chunk_index: request.chunk_index,
                        total_chunks: request.total_chunks,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        "Chunk {} attempt {}/{} failed: {}; retrying in {:?}",
                        request.chunk_index,
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
