use crate::client::retry::{Backoff, RetryPolicy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default size above which the client switches to the chunked path (4.5 MB).
pub const DEFAULT_CHUNKING_THRESHOLD: u64 = 4_718_592;

/// Default chunk size used by the client (4 MB).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Server-side configuration for the chunk receiver
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root for in-flight chunks; staging lives under `{temp_root}/chunks`
    pub temp_root: PathBuf,

    /// Root for published artifacts; files land in `{public_root}/uploads`
    pub public_root: PathBuf,

    /// Request body limit for a single chunk request (default: 8 MB)
    pub max_chunk_bytes: usize,

    /// Idle staging directories older than this are swept (default: 24)
    pub staging_ttl_hours: u64,

    /// How often the sweeper runs in seconds (default: 3600)
    pub sweep_interval_secs: u64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            temp_root: env::temp_dir(),
            public_root: PathBuf::from("public"),
            max_chunk_bytes: 8 * 1024 * 1024,
            staging_ttl_hours: 24,
            sweep_interval_secs: 3600,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            temp_root: env::var("TEMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.temp_root),

            public_root: env::var("PUBLIC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.public_root),

            max_chunk_bytes: env::var("MAX_CHUNK_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_bytes),

            staging_ttl_hours: env::var("STAGING_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_ttl_hours),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.sweep_interval_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Config rooted in a scratch directory, used by tests and local runs
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            temp_root: root.join("tmp"),
            public_root: root.join("public"),
            max_chunk_bytes: 64 * 1024 * 1024,
            staging_ttl_hours: 1,
            sweep_interval_secs: 60,
            ..Self::default()
        }
    }

    /// Directory holding one subdirectory per upload key
    pub fn staging_root(&self) -> PathBuf {
        self.temp_root.join("chunks")
    }

    /// Directory holding reassembled artifacts
    pub fn uploads_dir(&self) -> PathBuf {
        self.public_root.join("uploads")
    }

    pub fn staging_ttl(&self) -> Duration {
        Duration::from_secs(self.staging_ttl_hours * 3600)
    }
}

/// Client-side configuration for [`crate::client::ChunkUploadClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the chunk endpoint
    pub endpoint: String,

    /// Bytes per chunk (default: 4 MB)
    pub chunk_size: u64,

    /// Files strictly larger than this take the chunked path (default: 4.5 MB)
    pub chunking_threshold: u64,

    /// Retry policy applied to each chunk
    pub retry: RetryPolicy,

    /// Per-request timeout in seconds (default: 120)
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/upload-chunked".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunking_threshold: DEFAULT_CHUNKING_THRESHOLD,
            retry: RetryPolicy::default(),
            request_timeout_secs: 120,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let backoff = match env::var("RETRY_BACKOFF")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Ok("exponential") => Backoff::ExponentialJitter,
            Ok("linear") => Backoff::Linear,
            _ => default.retry.backoff,
        };

        Self {
            endpoint: env::var("UPLOAD_ENDPOINT").unwrap_or(default.endpoint),

            chunk_size: env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_size),

            chunking_threshold: env::var("CHUNKING_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunking_threshold),

            retry: RetryPolicy {
                max_retries: env::var("MAX_RETRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.retry.max_retries),
                base_delay: env::var("RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(default.retry.base_delay),
                backoff,
                ..default.retry
            },

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_timeout_secs),
        }
    }

    /// Create config for local development (short retry delays)
    pub fn development(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(10),
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}
