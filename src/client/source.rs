//! File-like inputs the upload client can slice.

use crate::services::splitter::ChunkRange;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Anything exposing a name, size, mime type and byte-range reads.
#[async_trait]
pub trait UploadSource: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    fn mime_type(&self) -> &str;
    async fn read_range(&self, range: ChunkRange) -> std::io::Result<Bytes>;
}

/// An upload held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read_range(&self, range: ChunkRange) -> std::io::Result<Bytes> {
        let (start, end) = (range.start as usize, range.end as usize);
        if end > self.data.len() || start > end {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside {} bytes", self.data.len()),
            ));
        }
        Ok(self.data.slice(start..end))
    }
}

/// A file on local disk, read one range at a time.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    mime_type: String,
    size: u64,
}

impl FileSource {
    /// Opens `path`, sniffing the mime type from its leading bytes unless one
    /// is given.
    pub async fn open(path: impl AsRef<Path>, mime_type: Option<String>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let mime_type = match mime_type {
            Some(m) => m,
            None => sniff_mime_type(&path).await?,
        };

        Ok(Self {
            path,
            name,
            mime_type,
            size: metadata.len(),
        })
    }
}

async fn sniff_mime_type(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; 512];
    let n = file.read(&mut header).await?;
    Ok(infer::get(&header[..n])
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()))
}

#[async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read_range(&self, range: ChunkRange) -> std::io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
