use chunked_upload::client::retry::Backoff;
use chunked_upload::client::source::{FileSource, UploadSource};
use chunked_upload::client::{ChunkUploadClient, UploadOptions};
use chunked_upload::config::ClientConfig;
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload a file to a chunked upload endpoint", long_about = None)]
struct Args {
    /// File to upload
    path: PathBuf,

    /// Chunk endpoint URL (overrides UPLOAD_ENDPOINT)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Bytes per chunk (overrides CHUNK_SIZE)
    #[arg(short, long)]
    chunk_size: Option<u64>,

    /// Total attempts per chunk (overrides MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Retry backoff: linear or exponential (overrides RETRY_BACKOFF)
    #[arg(long)]
    backoff: Option<String>,

    /// Mime type to send instead of the sniffed one
    #[arg(long)]
    mime: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunked_upload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 1. Resolve configuration
    let mut config = ClientConfig::from_env();
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    match args.backoff.as_deref() {
        Some("linear") => config.retry.backoff = Backoff::Linear,
        Some("exponential") => config.retry.backoff = Backoff::ExponentialJitter,
        Some(other) => anyhow::bail!("Unknown backoff '{}', expected linear or exponential", other),
        None => {}
    }

    // 2. Open source
    let source = FileSource::open(&args.path, args.mime).await?;
    info!(
        "📄 {} ({} bytes, {})",
        source.name(),
        source.size(),
        source.mime_type()
    );

    let client = ChunkUploadClient::http(config)?;
    if !client.needs_chunking(&source) {
        warn!(
            "File is below the chunking threshold ({} bytes); sending it as a single chunk",
            client.config().chunking_threshold
        );
    }

    // 3. Upload, cancelling cleanly on Ctrl+C
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⌨️  Ctrl+C received, stopping after the current chunk...");
            watcher.cancel();
        }
    });

    let started = std::time::Instant::now();
    let mut options = UploadOptions::from_config(client.config())
        .on_progress(|pct| info!("⏳ {:.1}%", pct))
        .cancel_token(cancel);
    if !client.needs_chunking(&source) {
        options.chunk_size = source.size().max(1);
    }

    let outcome = client.upload(&source, options).await?;
    let elapsed: Duration = started.elapsed();

    match outcome.final_path() {
        Some(path) => info!(
            "✅ Uploaded {} in {} chunks ({:?}): {}",
            outcome.file_name, outcome.total_chunks, elapsed, path
        ),
        None => info!("Nothing to upload, {} is empty", outcome.file_name),
    }

    Ok(())
}
