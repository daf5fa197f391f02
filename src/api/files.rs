//! File upload and download endpoints

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::Multipart;
use tokio_stream::StreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{
        binary_file::{BinaryFile, BinaryFileQuery, ReconcileReport},
        PaginatedResponse,
    },
    AppState,
};

/// Multipart upload form
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// List stored files
#[utoipa::path(
    get,
    path = "/files",
    tag = "files",
    security(("bearer_auth" = [])),
    params(BinaryFileQuery),
    responses(
        (status = 200, description = "List of files", body = PaginatedResponse<BinaryFile>)
    )
)]
pub async fn list_files(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<BinaryFileQuery>,
) -> AppResult<Json<PaginatedResponse<BinaryFile>>> {
    let (files, total) = state.services.files.list(&ctx, &query).await?;
    Ok(Json(PaginatedResponse::new(files, total, query.paging())))
}

/// Upload a file (multipart field `file`)
#[utoipa::path(
    post,
    path = "/files",
    tag = "files",
    security(("bearer_auth" = [])),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File stored", body = BinaryFile),
        (status = 400, description = "Missing file field or file too large")
    )
)]
pub async fn upload_file(
    State(state): State<AppState>,
    ctx: RequestContext,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<BinaryFile>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });
        let mut reader = StreamReader::new(Box::pin(stream));

        let stored = state
            .services
            .files
            .upload(&ctx, &mut reader, &file_name, content_type.as_deref())
            .await?;
        return Ok((StatusCode::CREATED, Json(stored)));
    }

    Err(AppError::Validation("Multipart field 'file' is missing".to_string()))
}

/// Get file metadata
#[utoipa::path(
    get,
    path = "/files/{id}",
    tag = "files",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "File ID")),
    responses(
        (status = 200, description = "File metadata", body = BinaryFile),
        (status = 404, description = "File not found")
    )
)]
pub async fn get_file(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<Json<BinaryFile>> {
    let file = state.services.files.get_by_id(&ctx, id).await?;
    Ok(Json(file))
}

/// Download file content
#[utoipa::path(
    get,
    path = "/files/{id}/content",
    tag = "files",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "File ID")),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 404, description = "File not found")
    )
)]
pub async fn download_file(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    let (file, payload) = state.services.files.open(&ctx, id).await?;

    let headers = [
        (header::CONTENT_TYPE, file.content_type.clone()),
        (header::CONTENT_LENGTH, payload.size.to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(&file.file_name)),
    ];
    let body = Body::from_stream(ReaderStream::new(payload.reader));
    Ok((headers, body).into_response())
}

/// Delete a file no book refers to
#[utoipa::path(
    delete,
    path = "/files/{id}",
    tag = "files",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "File ID")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "File not found"),
        (status = 409, description = "File is attached to a book")
    )
)]
pub async fn delete_file(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.files.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sweep leaked payloads and report files whose payload is missing
#[utoipa::path(
    post,
    path = "/files/reconcile",
    tag = "files",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Consistency report", body = ReconcileReport),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn reconcile_files(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<ReconcileReport>> {
    let report = state.services.files.reconcile(&ctx).await?;
    Ok(Json(report))
}

/// `attachment` disposition with an ASCII fallback and the UTF-8 name
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String = file_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}
