use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::errors::{AppError, AppResult};
use crate::types::Attachment;

use super::SharedState;

pub async fn get_one(State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<Response> {
    let attachment = state.store.get_attachment(id).await?;
    let bytes = tokio::fs::read(&attachment.file_path).await.map_err(|e| {
        AppError::Storage(crate::errors::StorageError::new(
            crate::errors::StorageErrorKind::Io,
            e.to_string(),
        ))
    })?;

    let mut headers = HeaderMap::new();
    let content_type = attachment
        .mime_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if let Ok(v) = content_type.parse() {
        headers.insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = format!("inline; filename=\"{}\"", attachment.filename).parse() {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }

    Ok((StatusCode::OK, headers, Bytes::from(bytes)).into_response())
}

/// Multipart upload; `draft_id` associates the file with an existing draft
/// message immediately (attachments always belong to a message row).
pub async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> AppResult<Json<Attachment>> {
    let mut draft_id: Option<i64> = None;
    let mut filename = String::new();
    let mut mime_type: Option<String> = None;
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "draft_id" => {
                let text = field.text().await.map_err(|e| AppError::Validation(e.to_string()))?;
                draft_id = text.parse().ok();
            }
            "file" => {
                filename = field.file_name().unwrap_or("upload.bin").to_string();
                mime_type = field.content_type().map(|s| s.to_string());
                bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?
                    .to_vec();
            }
            _ => {}
        }
    }

    let draft_id = draft_id.ok_or_else(|| AppError::Validation("missing draft_id".to_string()))?;
    if bytes.len() as u64 > state.config.max_attachment_size {
        return Err(AppError::Validation("attachment exceeds max size".to_string()));
    }

    let mime_type = mime_type.unwrap_or_else(|| {
        mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    let dir = state.config.uploads_dir();
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        AppError::Storage(crate::errors::StorageError::new(
            crate::errors::StorageErrorKind::Io,
            e.to_string(),
        ))
    })?;
    let ext = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let stored_name = format!("{}{ext}", uuid::Uuid::new_v4());
    let path = dir.join(&stored_name);
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        AppError::Storage(crate::errors::StorageError::new(
            crate::errors::StorageErrorKind::Io,
            e.to_string(),
        ))
    })?;

    let attachment = state
        .store
        .insert_attachment(
            draft_id,
            &filename,
            Some(&mime_type),
            Some(bytes.len() as i64),
            &path.to_string_lossy(),
            None,
            false,
        )
        .await?;
    Ok(Json(attachment))
}
