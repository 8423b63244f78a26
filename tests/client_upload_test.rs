mod common;

use chunked_upload::client::source::{FileSource, MemorySource, UploadSource};
use chunked_upload::client::{ChunkUploadClient, UploadError, UploadOptions, needs_chunking};
use chunked_upload::config::{ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNKING_THRESHOLD};
use common::{Fault, InProcessTransport, TestServer, pattern};
use std::sync::{Arc, Mutex};

const MB: usize = 1024 * 1024;

fn client_for(transport: Arc<InProcessTransport>) -> ChunkUploadClient {
    ChunkUploadClient::new(transport, ClientConfig::development("in-process"))
}

#[tokio::test]
async fn test_twelve_megabytes_in_three_chunks() {
    let server = TestServer::new();
    let transport = Arc::new(InProcessTransport::new(server.app.clone()));
    let client = client_for(transport.clone());

    let data = pattern(12 * MB);
    let source = MemorySource::new("movie.mp4", "video/mp4", data.clone());
    assert!(client.needs_chunking(&source));

    let indices = Arc::new(Mutex::new(Vec::new()));
    let seen = indices.clone();
    let options = UploadOptions::from_config(client.config())
        .on_chunk_complete(move |index, total| seen.lock().unwrap().push((index, total)));

    let outcome = client.upload(&source, options).await.unwrap();

    assert_eq!(outcome.total_chunks, 3);
    assert_eq!(outcome.final_path(), Some("/uploads/movie.mp4"));
    assert_eq!(outcome.artifact.as_ref().unwrap().size, (12 * MB) as u64);
    assert_eq!(*indices.lock().unwrap(), vec![(0, 3), (1, 3), (2, 3)]);

    let written = std::fs::read(server.artifact_path("movie.mp4")).unwrap();
    assert_eq!(written.len(), 12 * MB);
    assert!(written == data);
    assert!(server.staged_keys().is_empty());
}

#[tokio::test]
async fn test_five_megabytes_splits_unevenly() {
    let server = TestServer::new();
    let transport = Arc::new(InProcessTransport::new(server.app.clone()));
    let client = client_for(transport.clone());

    let data = pattern(5 * MB);
    let source = MemorySource::new("photo.raw", "application/octet-stream", data.clone());

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let options = UploadOptions::from_config(client.config())
        .on_progress(move |pct| seen.lock().unwrap().push(pct));

    let outcome = client.upload(&source, options).await.unwrap();

    assert_eq!(outcome.total_chunks, 2);
    assert_eq!(*progress.lock().unwrap(), vec![50.0, 100.0]);
    assert_eq!(transport.attempts_for(0), 1);
    assert_eq!(transport.attempts_for(1), 1);

    let written = std::fs::read(server.artifact_path("photo.raw")).unwrap();
    assert_eq!(written.len(), 5 * MB);
    assert!(written[..4 * MB] == data[..4 * MB]);
    assert!(written[4 * MB..] == data[4 * MB..]);
}

#[tokio::test]
async fn test_transient_failures_still_produce_identical_artifact() {
    let server = TestServer::new();
    let transport = Arc::new(
        InProcessTransport::new(server.app.clone())
            .with_faults(0, vec![Fault::Drop])
            .with_faults(1, vec![Fault::LoseReply, Fault::Drop]),
    );
    let client = client_for(transport.clone());

    let data = pattern(10 * MB);
    let source = MemorySource::new("retry.bin", "application/octet-stream", data.clone());

    let completions = Arc::new(Mutex::new(0u32));
    let counter = completions.clone();
    let options = UploadOptions::from_config(client.config())
        .on_chunk_complete(move |_, _| *counter.lock().unwrap() += 1);

    let outcome = client.upload(&source, options).await.unwrap();

    assert_eq!(outcome.total_chunks, 3);
    assert_eq!(transport.attempts_for(0), 2);
    assert_eq!(transport.attempts_for(1), 3);
    assert_eq!(transport.attempts_for(2), 1);
    assert_eq!(*completions.lock().unwrap(), 3);

    let written = std::fs::read(server.artifact_path("retry.bin")).unwrap();
    assert!(written == data);
}

#[tokio::test]
async fn test_exhausted_retries_abort_the_upload() {
    let server = TestServer::new();
    let transport = Arc::new(
        InProcessTransport::new(server.app.clone())
            .with_faults(2, vec![Fault::Drop, Fault::Drop, Fault::Drop]),
    );
    let client = client_for(transport.clone());

    let data = pattern(4 * MB * 3 + 10);
    let source = MemorySource::new("doomed.bin", "application/octet-stream", data);

    let err = client
        .upload(&source, UploadOptions::from_config(client.config()))
        .await
        .unwrap_err();

    match err {
        UploadError::UploadFailed {
            chunk_index,
            total_chunks,
            attempts,
            ..
        } => {
            assert_eq!(chunk_index, 2);
            assert_eq!(total_chunks, 4);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(transport.attempts_for(2), 3);
    assert_eq!(transport.attempts_for(3), 0);
    assert!(!server.artifact_path("doomed.bin").exists());

    let keys = server.staged_keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(server.staged_files(&keys[0]), vec!["chunk-0", "chunk-1"]);
}

#[tokio::test]
async fn test_file_source_round_trip() {
    let server = TestServer::new();
    let transport = Arc::new(InProcessTransport::new(server.app.clone()));
    let mut config = ClientConfig::development("in-process");
    config.chunk_size = 64 * 1024;
    let client = ChunkUploadClient::new(transport, config);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.dat");
    let data = pattern(200 * 1024);
    tokio::fs::write(&path, &data).await.unwrap();

    let source = FileSource::open(&path, None).await.unwrap();
    let outcome = client
        .upload(&source, UploadOptions::from_config(client.config()))
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 4);
    assert_eq!(source.name(), "archive.dat");
    assert_eq!(std::fs::read(server.artifact_path("archive.dat")).unwrap(), data);
}

#[tokio::test]
async fn test_empty_source_sends_nothing() {
    let server = TestServer::new();
    let transport = Arc::new(InProcessTransport::new(server.app.clone()));
    let client = client_for(transport.clone());

    let source = MemorySource::new("empty.txt", "text/plain", Vec::new());
    let outcome = client
        .upload(&source, UploadOptions::from_config(client.config()))
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 0);
    assert!(outcome.final_path().is_none());
    assert_eq!(transport.attempts_for(0), 0);
    assert!(server.staged_keys().is_empty());
}

#[test]
fn test_chunking_threshold_defaults() {
    assert_eq!(DEFAULT_CHUNK_SIZE, 4 * MB as u64);
    assert!(!needs_chunking(DEFAULT_CHUNKING_THRESHOLD, DEFAULT_CHUNKING_THRESHOLD));
    assert!(needs_chunking(DEFAULT_CHUNKING_THRESHOLD + 1, DEFAULT_CHUNKING_THRESHOLD));
    assert!(!needs_chunking(4 * MB as u64, DEFAULT_CHUNKING_THRESHOLD));
}

#[tokio::test]
async fn test_lost_final_reply_still_succeeds() {
    let server = TestServer::new();
    let transport = Arc::new(
        InProcessTransport::new(server.app.clone()).with_faults(1, vec![Fault::LoseReply]),
    );
    let client = client_for(transport.clone());

    let data = pattern(6 * MB);
    let source = MemorySource::new("final.bin", "application/octet-stream", data.clone());

    let outcome = client
        .upload(&source, UploadOptions::from_config(client.config()))
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 2);
    assert_eq!(transport.attempts_for(1), 2);
    assert_eq!(outcome.final_path(), Some("/uploads/final.bin"));
    assert_eq!(outcome.artifact.as_ref().unwrap().size, (6 * MB) as u64);

    let written = std::fs::read(server.artifact_path("final.bin")).unwrap();
    assert!(written == data);
    assert!(server.staged_keys().is_empty());
}
