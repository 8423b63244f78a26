use crate::api::error::AppError;
use crate::services::reassembler::{FinalArtifact, Reassembler};
use crate::services::session::{SessionRegistry, SessionState, UploadSession};
use crate::services::staging::{StagingError, StagingStore};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One validated chunk as received from a client.
#[derive(Debug, Clone)]
pub struct IncomingChunk {
    pub key: String,
    pub file_name: String,
    pub file_type: Option<String>,
    pub index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
    /// The key is a client-generated upload id rather than the file name, so
    /// it never names a later, different upload.
    pub opaque_key: bool,
}

#[derive(Debug)]
pub enum ReceiveOutcome {
    Stored {
        index: u32,
        total_chunks: u32,
        received: usize,
    },
    Completed(FinalArtifact),
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub key: String,
    pub file_name: Option<String>,
    pub total_chunks: Option<u32>,
    pub received: Vec<u32>,
    pub state: Option<SessionState>,
}

impl SessionStatus {
    pub fn is_complete(&self) -> bool {
        self.total_chunks
            .is_some_and(|total| self.received.len() as u32 == total)
    }
}

pub struct ChunkReceiver {
    staging: Arc<dyn StagingStore>,
    reassembler: Reassembler,
    sessions: SessionRegistry,
}

impl ChunkReceiver {
    pub fn new(staging: Arc<dyn StagingStore>, reassembler: Reassembler) -> Self {
        Self {
            staging,
            reassembler,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Persists one chunk and reassembles once every index is present.
    pub async fn receive(&self, chunk: IncomingChunk) -> Result<ReceiveOutcome, AppError> {
        if chunk.total_chunks == 0 {
            return Err(AppError::BadRequest(
                "totalChunks must be at least 1".to_string(),
            ));
        }
        if chunk.index >= chunk.total_chunks {
            return Err(AppError::BadRequest(format!(
                "chunkIndex {} is out of range for {} chunks",
                chunk.index, chunk.total_chunks
            )));
        }

        if let Some(existing) = self.sessions.get(&chunk.key) {
            check_total(&existing, chunk.total_chunks)?;
        } else if let Some(artifact) = self.replay_completed(&chunk)? {
            return Ok(ReceiveOutcome::Completed(artifact));
        }

        self.stage(&chunk).await?;

        let _guard = self.sessions.lock(&chunk.key).await;

        // Another request may have finished this upload while we waited
        if self.sessions.get(&chunk.key).is_none() {
            if let Some(artifact) = self.replay_completed(&chunk)? {
                if let Err(e) = self.staging.delete_all(&chunk.key).await {
                    if !matches!(e, StagingError::SessionNotFound(_)) {
                        tracing::warn!("Failed to clean staging for {}: {}", chunk.key, e);
                    }
                }
                return Ok(ReceiveOutcome::Completed(artifact));
            }
        }

        // Reassembly by a concurrent request removes staged files
        if !self.staging.has_chunk(&chunk.key, chunk.index).await? {
            tracing::debug!(
                "Chunk {} for {} vanished before it was recorded, restaging",
                chunk.index,
                chunk.key
            );
            self.stage(&chunk).await?;
        }

        // A failed session is resynced from disk before it is trusted again
        let mut session = match self.sessions.get(&chunk.key) {
            Some(session) if session.state != SessionState::Failed => session,
            _ => self.rebuild_session(&chunk).await?,
        };
        check_total(&session, chunk.total_chunks)?;
        session.record(chunk.index);

        if !session.is_complete() {
            let received = session.received.len();
            tracing::debug!(
                "Chunk {}/{} stored for {} ({} received, waiting on {:?})",
                chunk.index + 1,
                chunk.total_chunks,
                chunk.key,
                received,
                session.missing()
            );
            self.sessions.insert(session);
            return Ok(ReceiveOutcome::Stored {
                index: chunk.index,
                total_chunks: chunk.total_chunks,
                received,
            });
        }

        session.state = SessionState::Reassembling;
        let file_name = session.file_name.clone();
        self.sessions.insert(session);

        tracing::info!(
            "All {} chunks received for {}, reassembling {}",
            chunk.total_chunks,
            chunk.key,
            file_name
        );

        match self
            .reassembler
            .reassemble(&chunk.key, &file_name, chunk.total_chunks)
            .await
        {
            Ok(artifact) => {
                self.sessions.remove(&chunk.key);
                if chunk.opaque_key {
                    self.sessions
                        .mark_completed(&chunk.key, chunk.total_chunks, artifact.clone());
                }
                Ok(ReceiveOutcome::Completed(artifact))
            }
            Err(e) => {
                self.sessions
                    .update(&chunk.key, |s| s.state = SessionState::Failed);
                Err(e.into())
            }
        }
    }

    async fn stage(&self, chunk: &IncomingChunk) -> Result<(), AppError> {
        self.staging.create_directory(&chunk.key).await?;
        self.staging
            .write_chunk(&chunk.key, chunk.index, &chunk.payload)
            .await?;
        Ok(())
    }

    /// The artifact of an already finished upload, for a chunk re-sent after
    /// its reply was lost.
    fn replay_completed(&self, chunk: &IncomingChunk) -> Result<Option<FinalArtifact>, AppError> {
        if !chunk.opaque_key {
            return Ok(None);
        }
        let Some(done) = self.sessions.completed(&chunk.key) else {
            return Ok(None);
        };
        if done.total_chunks != chunk.total_chunks {
            return Err(AppError::BadRequest(format!(
                "totalChunks {} does not match {} recorded for completed upload {}",
                chunk.total_chunks, done.total_chunks, chunk.key
            )));
        }
        tracing::info!(
            "Chunk {} for completed upload {} re-sent, replaying result",
            chunk.index,
            chunk.key
        );
        Ok(Some(done.artifact))
    }

    /// Rebuilds a session for a key absent from the registry, seeding the
    /// received set from chunk files already staged.
    async fn rebuild_session(&self, chunk: &IncomingChunk) -> Result<UploadSession, AppError> {
        let mut session = UploadSession::new(
            chunk.key.clone(),
            chunk.file_name.clone(),
            chunk.file_type.clone(),
            chunk.total_chunks,
        );
        let present = self.staging.list_chunks(&chunk.key).await?;
        if present.iter().any(|&i| i != chunk.index) {
            tracing::info!(
                "Resuming {} from {} staged chunks",
                chunk.key,
                present.len()
            );
        } else {
            tracing::info!(
                "New upload session {} for {} ({} chunks)",
                chunk.key,
                chunk.file_name,
                chunk.total_chunks
            );
        }
        for index in present {
            session.record(index);
        }
        Ok(session)
    }

    pub async fn status(&self, key: &str) -> Result<SessionStatus, AppError> {
        let present = self.staging.list_chunks(key).await?;
        match self.sessions.get(key) {
            Some(session) => Ok(SessionStatus {
                key: session.key,
                file_name: Some(session.file_name),
                total_chunks: Some(session.total_chunks),
                received: present,
                state: Some(session.state),
            }),
            None if self.staging.exists(key).await? => Ok(SessionStatus {
                key: key.to_string(),
                file_name: None,
                total_chunks: None,
                received: present,
                state: None,
            }),
            None => Err(AppError::NotFound(format!("No upload session for {key}"))),
        }
    }

    /// Drops a session and its staging directory.
    pub async fn abort(&self, key: &str) -> Result<(), AppError> {
        let _guard = self.sessions.lock(key).await;
        let had_session = self.sessions.remove(key).is_some();

        match self.staging.delete_all(key).await {
            Ok(()) => {}
            Err(StagingError::SessionNotFound(_)) if had_session => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Aborted upload session {}", key);
        Ok(())
    }

    /// Deletes staging directories idle longer than `ttl`. Returns how many
    /// were removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> Result<usize, AppError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for staged in self.staging.list_sessions().await? {
            let idle = now.duration_since(staged.modified).unwrap_or_default();
            if idle < ttl {
                continue;
            }

            let _guard = self.sessions.lock(&staged.key).await;
            if let Some(session) = self.sessions.get(&staged.key) {
                let active = Utc::now()
                    .signed_duration_since(session.last_activity)
                    .to_std()
                    .unwrap_or_default();
                if active < ttl {
                    continue;
                }
            }

            match self.staging.delete_all(&staged.key).await {
                Ok(()) | Err(StagingError::SessionNotFound(_)) => {
                    self.sessions.remove(&staged.key);
                    removed += 1;
                    tracing::info!(
                        "Swept stale staging for {} (idle {:?})",
                        staged.key,
                        idle
                    );
                }
                Err(e) => tracing::error!("Failed to sweep {}: {}", staged.key, e),
            }
        }

        let forgotten = self.sessions.evict_completed(ttl);
        if forgotten > 0 {
            tracing::debug!("Forgot {} completed uploads", forgotten);
        }

        self.sessions.compact_locks();
        Ok(removed)
    }
}

fn check_total(session: &UploadSession, total_chunks: u32) -> Result<(), AppError> {
    if session.total_chunks != total_chunks {
        return Err(AppError::BadRequest(format!(
            "totalChunks {} does not match {} recorded for upload {}",
            total_chunks, session.total_chunks, session.key
        )));
    }
    Ok(())
}
