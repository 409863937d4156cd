use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::types::Message;

use super::SharedState;

#[derive(Deserialize)]
pub struct CreateDraft {
    thread_id: Option<i64>,
    subject: String,
    content_text: String,
    content_html: Option<String>,
    in_reply_to: Option<String>,
    #[serde(default = "default_folder")]
    folder: String,
}

fn default_folder() -> String {
    "drafts".to_string()
}

pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateDraft>,
) -> AppResult<Json<Message>> {
    let identity = state
        .store
        .default_identity()
        .await?
        .ok_or_else(|| AppError::Validation("no default sending identity configured".to_string()))?;

    let draft = state
        .store
        .create_draft(
            body.thread_id,
            identity.id,
            &body.subject,
            &body.content_text,
            body.content_html.as_deref(),
            body.in_reply_to.as_deref(),
            &body.folder,
        )
        .await?;
    Ok(Json(draft))
}

#[derive(Deserialize)]
pub struct UpdateDraft {
    subject: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateDraft>,
) -> AppResult<Json<Message>> {
    let draft = state
        .store
        .update_draft(
            id,
            body.subject.as_deref(),
            body.content_text.as_deref(),
            body.content_html.as_deref(),
        )
        .await?;
    Ok(Json(draft))
}

pub async fn destroy(State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<()> {
    state.store.delete_draft(id).await
}

pub async fn send(State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<Json<Message>> {
    state.store.queue_message(id).await?;
    Ok(Json(state.store.get_message(id).await?))
}
