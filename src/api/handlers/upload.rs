use crate::AppState;
use crate::api::error::AppError;
use crate::services::reassembler::FinalArtifact;
use crate::services::receiver::{IncomingChunk, ReceiveOutcome};
use crate::services::session::SessionState;
use crate::utils::validation::{sanitize_filename, staging_key, validate_staging_key};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Multipart form accepted by `POST /upload-chunked`.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub chunk: Vec<u8>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub file_type: Option<String>,
    /// Opaque id keying the staging directory; falls back to `fileName`
    pub upload_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAcceptedResponse {
    pub success: bool,
    pub message: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompleteResponse {
    pub success: bool,
    pub message: String,
    pub data: FinalArtifact,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub success: bool,
    pub upload_id: String,
    pub file_name: Option<String>,
    pub total_chunks: Option<u32>,
    pub received_chunks: Vec<u32>,
    pub state: Option<SessionState>,
    pub complete: bool,
}

/// Text fields after parsing, before they are trusted.
#[derive(Debug, Validate)]
struct ChunkFields {
    chunk_index: u32,
    #[validate(range(min = 1, message = "totalChunks must be at least 1"))]
    total_chunks: u32,
    #[validate(length(min = 1, max = 1024, message = "fileName must be 1 to 1024 bytes"))]
    file_name: String,
    file_type: Option<String>,
    upload_id: Option<String>,
}

fn parse_count(field: &str, value: Option<String>) -> Result<u32, AppError> {
    let value = value.ok_or_else(|| AppError::BadRequest(format!("Missing {field}")))?;
    value
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{field} must be a non-negative integer")))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed form field: {e}")))
}

#[utoipa::path(
    post,
    path = "/upload-chunked",
    request_body(content = ChunkUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk stored; the completing chunk returns UploadCompleteResponse instead", body = ChunkAcceptedResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 500, description = "Staging or reassembly failure")
    ),
    tag = "upload"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut chunk: Option<Bytes> = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut file_name = None;
    let mut file_type = None;
    let mut upload_id = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("length limit exceeded") {
            AppError::PayloadTooLarge("Chunk exceeds the maximum allowed request size".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunk" => {
                let data = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read chunk payload: {e}"))
                })?;
                chunk = Some(data);
            }
            "chunkIndex" => chunk_index = Some(read_text(field).await?),
            "totalChunks" => total_chunks = Some(read_text(field).await?),
            "fileName" => file_name = non_empty(read_text(field).await?),
            "fileType" => file_type = non_empty(read_text(field).await?),
            "uploadId" => upload_id = non_empty(read_text(field).await?),
            other => tracing::debug!("Ignoring unknown form field: {}", other),
        }
    }

    let payload = chunk.ok_or_else(|| AppError::BadRequest("Missing chunk payload".to_string()))?;
    let file_name = file_name.ok_or_else(|| AppError::BadRequest("Missing fileName".to_string()))?;

    let fields = ChunkFields {
        chunk_index: parse_count("chunkIndex", chunk_index)?,
        total_chunks: parse_count("totalChunks", total_chunks)?,
        file_name,
        file_type,
        upload_id,
    };
    fields.validate()?;

    let file_name = sanitize_filename(&fields.file_name)?;
    let key = staging_key(fields.upload_id.as_deref(), &file_name)?;
    let opaque_key = fields.upload_id.is_some();

    let outcome = state
        .receiver
        .receive(IncomingChunk {
            key,
            file_name,
            file_type: fields.file_type,
            index: fields.chunk_index,
            total_chunks: fields.total_chunks,
            payload,
            opaque_key,
        })
        .await?;

    let response = match outcome {
        ReceiveOutcome::Stored {
            index,
            total_chunks,
            ..
        } => Json(ChunkAcceptedResponse {
            success: true,
            message: format!("Chunk {} of {} received", index + 1, total_chunks),
            chunk_index: index,
            total_chunks,
        })
        .into_response(),
        ReceiveOutcome::Completed(artifact) => Json(UploadCompleteResponse {
            success: true,
            message: "File uploaded successfully".to_string(),
            data: artifact,
        })
        .into_response(),
    };

    Ok(response)
}

#[utoipa::path(
    get,
    path = "/upload-chunked/{upload_id}",
    params(
        ("upload_id" = String, Path, description = "Upload id (staging key)")
    ),
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse),
        (status = 404, description = "No such session")
    ),
    tag = "upload"
)]
pub async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    validate_staging_key(&upload_id)?;
    let status = state.receiver.status(&upload_id).await?;
    let complete = status.is_complete();

    Ok(Json(SessionStatusResponse {
        success: true,
        upload_id: status.key,
        file_name: status.file_name,
        total_chunks: status.total_chunks,
        received_chunks: status.received,
        state: status.state,
        complete,
    }))
}

#[utoipa::path(
    delete,
    path = "/upload-chunked/{upload_id}",
    params(
        ("upload_id" = String, Path, description = "Upload id (staging key)")
    ),
    responses(
        (status = 204, description = "Upload aborted"),
        (status = 404, description = "No such session")
    ),
    tag = "upload"
)]
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<StatusCode, AppError> {
    validate_staging_key(&upload_id)?;
    state.receiver.abort(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
