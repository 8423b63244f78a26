use crate::services::staging::{StagingError, StagingStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum ReassemblyError {
    #[error("Reassembly could not find chunk {index} of {total} for upload {key}")]
    MissingChunk { key: String, index: u32, total: u32 },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Failed while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ReassemblyError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// The published result of a completed upload.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalArtifact {
    pub file_name: String,
    /// Public path, e.g. `/uploads/video.mp4`
    pub path: String,
    pub size: u64,
    #[serde(skip)]
    pub disk_path: PathBuf,
}

pub struct Reassembler {
    staging: Arc<dyn StagingStore>,
    uploads_dir: PathBuf,
}

impl Reassembler {
    pub fn new(staging: Arc<dyn StagingStore>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Concatenates `chunk-0..chunk-{total-1}` of `key` into `uploads/{file_name}`.
    ///
    /// On success the staging directory is removed. On failure it is left
    /// untouched for inspection and nothing is published.
    pub async fn reassemble(
        &self,
        key: &str,
        file_name: &str,
        total_chunks: u32,
    ) -> Result<FinalArtifact, ReassemblyError> {
        let present = self.staging.list_chunks(key).await?;
        if let Some(index) = (0..total_chunks).find(|i| present.binary_search(i).is_err()) {
            tracing::error!(
                "Reassembly of {} aborted: chunk {} of {} missing",
                key,
                index,
                total_chunks
            );
            return Err(ReassemblyError::MissingChunk {
                key: key.to_string(),
                index,
                total: total_chunks,
            });
        }

        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .map_err(|e| ReassemblyError::io("creating uploads directory", e))?;

        let final_path = self.uploads_dir.join(file_name);
        let part_path = self.uploads_dir.join(format!(".{key}.part"));

        let size = match self.write_parts(key, total_chunks, &part_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(ReassemblyError::io(
                format!("publishing {}", final_path.display()),
                e,
            ));
        }

        // The artifact is already published; a leftover directory is swept later.
        if let Err(e) = self.staging.delete_all(key).await {
            tracing::warn!("Failed to clean staging for {}: {}", key, e);
        }

        tracing::info!(
            "Reassembled {} chunks into {} ({} bytes)",
            total_chunks,
            final_path.display(),
            size
        );

        Ok(FinalArtifact {
            file_name: file_name.to_string(),
            path: format!("/uploads/{file_name}"),
            size,
            disk_path: final_path,
        })
    }

    async fn write_parts(
        &self,
        key: &str,
        total_chunks: u32,
        part_path: &Path,
    ) -> Result<u64, ReassemblyError> {
        let mut out = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| ReassemblyError::io(format!("creating {}", part_path.display()), e))?;

        let mut size = 0u64;
        for index in 0..total_chunks {
            let data = self
                .staging
                .read_chunk(key, index)
                .await
                .map_err(|e| match e {
                    StagingError::ChunkNotFound { .. } => ReassemblyError::MissingChunk {
                        key: key.to_string(),
                        index,
                        total: total_chunks,
                    },
                    other => other.into(),
                })?;
            out.write_all(&data)
                .await
                .map_err(|e| ReassemblyError::io(format!("appending chunk {index}"), e))?;
            size += data.len() as u64;
        }

        out.flush()
            .await
            .map_err(|e| ReassemblyError::io("flushing artifact", e))?;
        out.sync_all()
            .await
            .map_err(|e| ReassemblyError::io("syncing artifact", e))?;

        Ok(size)
    }
}
