use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    CurrentUser, FileListResponse, FileRecordResponse, ListQuery, UpdateFileRequest,
    UploadResponse, Visibility,
};
use crate::services::{ContentService, FileService, UserService};
use crate::AppState;

/// Upload a file
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>> {
    let mut payload: Option<Bytes> = None;
    let mut display_name: Option<String> = None;
    let mut folder_id: Option<String> = None;
    let mut visibility = Visibility::Private;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                display_name = field.file_name().map(|s| s.to_string());
                payload = Some(field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file data: {}", e))
                })?);
            }
            "folder_id" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    folder_id = Some(text);
                }
            }
            "visibility" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    visibility = Visibility::from_str(&text).ok_or_else(|| {
                        AppError::BadRequest(format!("Invalid visibility: {}", text))
                    })?;
                }
            }
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let display_name =
        display_name.ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let user = UserService::get_user(&state.db, &current_user.id).await?;

    let result = FileService::upload(
        &state.db,
        &state.events,
        &user,
        display_name,
        folder_id,
        visibility,
        payload,
    )
    .await?;

    Ok(Json(ApiResponse::success(result)))
}

/// List the caller's files
/// GET /api/v1/files?folder_id=xxx&visibility=xxx&name=xxx&sort=xxx&order=xxx&limit=n&offset=n
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FileListResponse>>> {
    let files = FileService::list_by_owner(&state.db, &current_user.id, &query).await?;
    Ok(Json(ApiResponse::success(FileListResponse { files })))
}

/// List public files across all owners
/// GET /api/v1/files/public
pub async fn list_public_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FileListResponse>>> {
    let files = FileService::list_public(&state.db, &query).await?;
    Ok(Json(ApiResponse::success(FileListResponse { files })))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileRecordResponse>>> {
    let file = FileService::get_response(&state.db, &id).await?;

    if file.owner_id != current_user.id && !file.is_public() {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }

    Ok(Json(ApiResponse::success(file)))
}

/// Rename / move / change visibility
/// PATCH /api/v1/files/:id
pub async fn update_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFileRequest>,
) -> Result<Json<ApiResponse<FileRecordResponse>>> {
    let file = FileService::update(&state.db, &current_user.id, &id, req).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Delete a file record; removes the content blob when the last reference
/// goes away
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    FileService::delete(&state.db, &state.events, &current_user.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let file = FileService::get_response(&state.db, &id).await?;

    if file.owner_id != current_user.id && !file.is_public() {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }

    let data = ContentService::fetch_payload(&state.db, &file.hash).await?;
    FileService::increment_download_count(&state.db, &id).await?;

    let fallback_name = file.display_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&file.display_name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.mime_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}
