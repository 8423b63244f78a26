//! Filesystem-backed staging for in-flight chunks.
//!
//! Layout: `{root}/{key}/chunk-{index}`. Writes to the same `(key, index)` are
//! not locked and resolve last-write-wins.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

const CHUNK_PREFIX: &str = "chunk-";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Chunk {index} not found in staging for {key}")]
    ChunkNotFound { key: String, index: u32 },

    #[error("No staging directory for {0}")]
    SessionNotFound(String),

    #[error("Staging I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// A staging directory seen on disk, used by the sweeper.
#[derive(Debug, Clone)]
pub struct StagedSession {
    pub key: String,
    pub modified: SystemTime,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn create_directory(&self, key: &str) -> Result<(), StagingError>;
    async fn write_chunk(&self, key: &str, index: u32, data: &[u8]) -> Result<(), StagingError>;
    async fn read_chunk(&self, key: &str, index: u32) -> Result<Vec<u8>, StagingError>;
    async fn has_chunk(&self, key: &str, index: u32) -> Result<bool, StagingError>;
    /// Indices present for `key`, ascending. Empty when the directory is absent.
    async fn list_chunks(&self, key: &str) -> Result<Vec<u32>, StagingError>;
    async fn exists(&self, key: &str) -> Result<bool, StagingError>;
    async fn delete_all(&self, key: &str) -> Result<(), StagingError>;
    async fn list_sessions(&self) -> Result<Vec<StagedSession>, StagingError>;
}

pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn chunk_path(&self, key: &str, index: u32) -> PathBuf {
        self.session_dir(key).join(format!("{CHUNK_PREFIX}{index}"))
    }
}

fn parse_chunk_index(file_name: &str) -> Option<u32> {
    file_name.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn create_directory(&self, key: &str) -> Result<(), StagingError> {
        let dir = self.session_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StagingError::io(format!("creating {}", dir.display()), e))
    }

    async fn write_chunk(&self, key: &str, index: u32, data: &[u8]) -> Result<(), StagingError> {
        let path = self.chunk_path(key, index);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StagingError::io(format!("writing {}", path.display()), e))?;
        tracing::debug!("Staged chunk {} for {} ({} bytes)", index, key, data.len());
        Ok(())
    }

    async fn read_chunk(&self, key: &str, index: u32) -> Result<Vec<u8>, StagingError> {
        let path = self.chunk_path(key, index);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StagingError::ChunkNotFound {
                key: key.to_string(),
                index,
            }),
            Err(e) => Err(StagingError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn has_chunk(&self, key: &str, index: u32) -> Result<bool, StagingError> {
        let path = self.chunk_path(key, index);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StagingError::io(format!("checking {}", path.display()), e))
    }

    async fn list_chunks(&self, key: &str) -> Result<Vec<u32>, StagingError> {
        let dir = self.session_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StagingError::io(format!("listing {}", dir.display()), e)),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagingError::io(format!("listing {}", dir.display()), e))?
        {
            if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_index) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    async fn exists(&self, key: &str) -> Result<bool, StagingError> {
        tokio::fs::try_exists(self.session_dir(key))
            .await
            .map_err(|e| StagingError::io(format!("checking staging for {key}"), e))
    }

    async fn delete_all(&self, key: &str) -> Result<(), StagingError> {
        let dir = self.session_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StagingError::SessionNotFound(key.to_string()))
            }
            Err(e) => Err(StagingError::io(format!("removing {}", dir.display()), e)),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<StagedSession>, StagingError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StagingError::io(
                    format!("listing {}", self.root.display()),
                    e,
                ));
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagingError::io("listing staging root", e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            sessions.push(StagedSession { key, modified });
        }
        Ok(sessions)
    }
}
