use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::types::{now, Bucket, Message, Thread};

use super::SharedState;

#[derive(Deserialize)]
pub struct MarkReadRequest {
    message_ids: Vec<i64>,
}

pub async fn mark_read_bulk(
    State(state): State<SharedState>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .store
        .mark_messages_read_bulk(&body.message_ids, now())
        .await?;
    Ok(Json(serde_json::json!({ "updated": body.message_ids.len() })))
}

#[derive(Serialize)]
pub struct UnreadCounts {
    counts: HashMap<String, i64>,
}

pub async fn unread_counts(State(state): State<SharedState>) -> AppResult<Json<UnreadCounts>> {
    let counts = state.store.unread_counts().await?.into_iter().collect();
    Ok(Json(UnreadCounts { counts }))
}

pub async fn notifications_pending(
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(state.store.list_pending_notifications(50).await?))
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn feed(
    State(state): State<SharedState>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<Thread>>> {
    Ok(Json(
        state
            .store
            .list_threads_by_creator_bucket(Bucket::Feed, q.limit, q.offset)
            .await?,
    ))
}

pub async fn set_aside_list(
    State(state): State<SharedState>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<Thread>>> {
    Ok(Json(state.store.list_set_aside_threads(q.limit, q.offset).await?))
}
