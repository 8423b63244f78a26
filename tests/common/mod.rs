#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chunked_upload::client::transport::{
    ChunkReply, ChunkRequest, ChunkTransport, TransportError, interpret_response,
};
use chunked_upload::config::ServerConfig;
use chunked_upload::{AppState, create_app};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------chunkboundary";

pub struct TestServer {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestServer {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::development(dir.path());
        let state = AppState::new(config);
        let app = create_app(state.clone());
        Self { dir, state, app }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.state.config.staging_root()
    }

    pub fn staging_dir(&self, key: &str) -> PathBuf {
        self.staging_root().join(key)
    }

    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.state.config.uploads_dir().join(file_name)
    }

    /// Names of the chunk files staged under `key`, sorted.
    pub fn staged_files(&self, key: &str) -> Vec<String> {
        list_dir(&self.staging_dir(key))
    }

    /// Keys with a staging directory.
    pub fn staged_keys(&self) -> Vec<String> {
        list_dir(&self.staging_root())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn post_chunk(&self, form: ChunkForm) -> (StatusCode, Value) {
        self.send(form.into_request()).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn list_dir(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(path) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// A multipart chunk request; `None` fields are left out of the form.
#[derive(Clone, Default)]
pub struct ChunkForm {
    pub chunk: Option<Vec<u8>>,
    pub chunk_index: Option<String>,
    pub total_chunks: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub upload_id: Option<String>,
}

impl ChunkForm {
    pub fn new(upload_id: &str, file_name: &str, index: u32, total: u32, chunk: &[u8]) -> Self {
        Self {
            chunk: Some(chunk.to_vec()),
            chunk_index: Some(index.to_string()),
            total_chunks: Some(total.to_string()),
            file_name: Some(file_name.to_string()),
            file_type: Some("application/octet-stream".to_string()),
            upload_id: Some(upload_id.to_string()),
        }
    }

    pub fn into_request(self) -> Request<Body> {
        let mut body = Vec::new();
        let text_fields = [
            ("chunkIndex", self.chunk_index),
            ("totalChunks", self.total_chunks),
            ("fileName", self.file_name),
            ("fileType", self.file_type),
            ("uploadId", self.upload_id),
        ];
        for (name, value) in text_fields {
            if let Some(value) = value {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                    )
                    .as_bytes(),
                );
            }
        }
        if let Some(chunk) = self.chunk {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&chunk);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload-chunked")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }
}

/// What the in-process transport does with the next attempt for a chunk.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail without reaching the server
    Drop,
    /// Deliver to the server, then lose the reply
    LoseReply,
}

/// Routes chunk requests straight into the router, with scripted faults.
pub struct InProcessTransport {
    app: Router,
    faults: Mutex<HashMap<u32, Vec<Fault>>>,
    attempts: Mutex<HashMap<u32, u32>>,
}

impl InProcessTransport {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            faults: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Queues faults for the next attempts at chunk `index`, in order.
    pub fn with_faults(self, index: u32, faults: Vec<Fault>) -> Self {
        self.faults.lock().unwrap().insert(index, faults);
        self
    }

    pub fn attempts_for(&self, index: u32) -> u32 {
        self.attempts.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    fn next_fault(&self, index: u32) -> Option<Fault> {
        *self.attempts.lock().unwrap().entry(index).or_insert(0) += 1;
        let mut faults = self.faults.lock().unwrap();
        let queue = faults.get_mut(&index)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

#[async_trait]
impl ChunkTransport for InProcessTransport {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkReply, TransportError> {
        let fault = self.next_fault(request.chunk_index);
        if let Some(Fault::Drop) = fault {
            return Err(TransportError::Status {
                status: 503,
                message: "connection reset".to_string(),
            });
        }

        let form = ChunkForm {
            chunk: Some(request.payload.to_vec()),
            chunk_index: Some(request.chunk_index.to_string()),
            total_chunks: Some(request.total_chunks.to_string()),
            file_name: Some(request.file_name.clone()),
            file_type: Some(request.file_type.clone()),
            upload_id: Some(request.upload_id.clone()),
        };
        let response = self.app.clone().oneshot(form.into_request()).await.unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        if let Some(Fault::LoseReply) = fault {
            return Err(TransportError::Rejected("reply lost".to_string()));
        }
        interpret_response(status, &bytes)
    }
}

/// Deterministic, non-repeating-per-chunk test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
