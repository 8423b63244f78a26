pub mod api;
pub mod client;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::ServerConfig;
use crate::services::reassembler::Reassembler;
use crate::services::receiver::ChunkReceiver;
use crate::services::staging::LocalStagingStore;
use crate::api::middleware::request_id::REQUEST_ID_HEADER;
use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, Response},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Allowance on top of the chunk limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_chunk,
        api::handlers::upload::upload_status,
        api::handlers::upload::abort_upload,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::ChunkUploadForm,
            api::handlers::upload::ChunkAcceptedResponse,
            api::handlers::upload::UploadCompleteResponse,
            api::handlers::upload::SessionStatusResponse,
            services::reassembler::FinalArtifact,
            services::session::SessionState,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Chunked upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<ChunkReceiver>,
    pub config: ServerConfig,
}

impl AppState {
    /// Wires the local staging store and reassembler from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let staging = Arc::new(LocalStagingStore::new(config.staging_root()));
        let reassembler = Reassembler::new(staging.clone(), config.uploads_dir());
        Self {
            receiver: Arc::new(ChunkReceiver::new(staging, reassembler)),
            config,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(origins)
}

fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

pub fn create_app(state: AppState) -> Router {
    let chunk_limit = state.config.max_chunk_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload-chunked",
            post(api::handlers::upload::upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route(
            "/upload-chunked/:upload_id",
            get(api::handlers::upload::upload_status).delete(api::handlers::upload::abort_upload),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_request(|request: &Request<Body>, _span: &Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(|response: &Response<Body>, latency: Duration, _span: &Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                }),
        )
        // Outside the trace layer so spans see the generated id
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_request_span_carries_generated_id() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let app = create_app(AppState::new(ServerConfig::development(dir.path())));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let generated = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains(&format!("request_id={generated}")), "{output}");
        assert!(!output.contains("request_id=unknown"), "{output}");
    }
}
