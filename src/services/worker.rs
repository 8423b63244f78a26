use crate::services::receiver::ChunkReceiver;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes staging directories abandoned by their clients.
pub struct BackgroundWorker {
    receiver: Arc<ChunkReceiver>,
    ttl: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        receiver: Arc<ChunkReceiver>,
        ttl: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            receiver,
            ttl,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Staging sweeper started (ttl {:?}, every {:?})",
            self.ttl,
            self.interval
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    pub async fn perform_cleanup(&self) -> usize {
        tracing::debug!("🧹 Sweeping stale staging directories...");

        match self.receiver.sweep_expired(self.ttl).await {
            Ok(0) => 0,
            Ok(removed) => {
                tracing::info!("✅ Removed {} stale upload sessions", removed);
                removed
            }
            Err(e) => {
                tracing::error!("Staging sweep failed: {}", e);
                0
            }
        }
    }
}
