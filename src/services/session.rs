//! In-memory registry of upload sessions.
//!
//! Sessions are not persisted. When a key is missing from the registry but its
//! staging directory exists, the receiver rebuilds the session from the chunk
//! files on disk.

use crate::services::reassembler::FinalArtifact;
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::OwnedMutexGuard;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Receiving,
    Reassembling,
    Failed,
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub key: String,
    pub file_name: String,
    pub file_type: Option<String>,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        key: impl Into<String>,
        file_name: impl Into<String>,
        file_type: Option<String>,
        total_chunks: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            file_name: file_name.into(),
            file_type,
            total_chunks,
            received: BTreeSet::new(),
            state: SessionState::Receiving,
            created_at: now,
            last_activity: now,
        }
    }

    /// Records `index` as present. Indices outside `[0, total_chunks)` are ignored.
    pub fn record(&mut self, index: u32) {
        if index < self.total_chunks {
            self.received.insert(index);
        }
        self.last_activity = Utc::now();
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}

/// A finished upload remembered so a re-sent terminal chunk gets the same answer.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub total_chunks: u32,
    pub artifact: FinalArtifact,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, UploadSession>,
    completed: DashMap<String, CompletedUpload>,
    locks: KeyedMutex,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-key guard held while a session is inspected and updated.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    pub fn get(&self, key: &str) -> Option<UploadSession> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    pub fn insert(&self, session: UploadSession) {
        self.sessions.insert(session.key.clone(), session);
    }

    /// Applies `f` to the session under `key`, if any.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut UploadSession) -> R) -> Option<R> {
        self.sessions.get_mut(key).map(|mut s| f(s.value_mut()))
    }

    pub fn remove(&self, key: &str) -> Option<UploadSession> {
        self.sessions.remove(key).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn mark_completed(&self, key: &str, total_chunks: u32, artifact: FinalArtifact) {
        self.completed.insert(
            key.to_string(),
            CompletedUpload {
                total_chunks,
                artifact,
                completed_at: Utc::now(),
            },
        );
    }

    pub fn completed(&self, key: &str) -> Option<CompletedUpload> {
        self.completed.get(key).map(|c| c.value().clone())
    }

    /// Forgets completions older than `ttl`. Returns how many were dropped.
    pub fn evict_completed(&self, ttl: std::time::Duration) -> usize {
        let before = self.completed.len();
        let now = Utc::now();
        self.completed.retain(|_, c| {
            now.signed_duration_since(c.completed_at)
                .to_std()
                .unwrap_or_default()
                < ttl
        });
        before - self.completed.len()
    }

    /// Releases lock entries for keys nobody is using.
    pub fn compact_locks(&self) {
        self.locks.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_tracks_received_set() {
        let mut session = UploadSession::new("k", "a.bin", None, 3);
        session.record(2);
        session.record(0);
        assert!(!session.is_complete());
        assert_eq!(session.missing(), vec![1]);

        session.record(2);
        session.record(1);
        assert!(session.is_complete());
        assert!(session.missing().is_empty());
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let mut session = UploadSession::new("k", "a.bin", None, 2);
        session.record(5);
        assert!(session.received.is_empty());
    }

    #[test]
    fn test_registry_update_and_remove() {
        let registry = SessionRegistry::new();
        registry.insert(UploadSession::new("k", "a.bin", Some("video/mp4".into()), 2));

        let complete = registry.update("k", |s| {
            s.record(0);
            s.record(1);
            s.is_complete()
        });
        assert_eq!(complete, Some(true));
        assert!(registry.update("other", |_| ()).is_none());

        let removed = registry.remove("k").unwrap();
        assert_eq!(removed.file_type.as_deref(), Some("video/mp4"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_completed_uploads_expire() {
        let registry = SessionRegistry::new();
        let artifact = FinalArtifact {
            file_name: "a.bin".to_string(),
            path: "/uploads/a.bin".to_string(),
            size: 3,
            disk_path: "/tmp/a.bin".into(),
        };
        registry.mark_completed("k", 2, artifact);

        let done = registry.completed("k").unwrap();
        assert_eq!(done.total_chunks, 2);
        assert_eq!(done.artifact.path, "/uploads/a.bin");

        assert_eq!(registry.evict_completed(std::time::Duration::from_secs(60)), 0);
        assert_eq!(registry.evict_completed(std::time::Duration::ZERO), 1);
        assert!(registry.completed("k").is_none());
    }
}
