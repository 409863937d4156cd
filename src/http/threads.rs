use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::types::{now, Thread};

use super::SharedState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_bucket")]
    bucket: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_bucket() -> String {
    "inbox".to_string()
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct ThreadSummary {
    #[serde(flatten)]
    thread: Thread,
    participants: Vec<String>,
    snippet: String,
    message_count: i64,
    unread_count: i64,
}

#[derive(Serialize)]
pub struct ThreadDetail {
    #[serde(flatten)]
    thread: Thread,
    messages: Vec<crate::types::Message>,
}

pub async fn list(
    State(state): State<SharedState>,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Vec<ThreadSummary>>> {
    let threads = state
        .store
        .list_threads_by_folder(&q.bucket, q.limit, q.offset)
        .await?;

    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        let messages = state.store.list_messages_by_thread(thread.id).await?;
        let unread_count = messages.iter().filter(|m| m.read_at.is_none()).count() as i64;
        let snippet = messages
            .last()
            .map(|m| m.content_text.chars().take(200).collect())
            .unwrap_or_default();

        let mut participants = Vec::new();
        for (contact_id, _) in state
            .store
            .list_message_contacts(messages.last().map(|m| m.id).unwrap_or(thread.id))
            .await
            .unwrap_or_default()
        {
            if let Ok(contact) = state.store.get_contact(contact_id).await {
                participants.push(contact.name.unwrap_or(contact.email));
            }
        }

        out.push(ThreadSummary {
            message_count: messages.len() as i64,
            unread_count,
            snippet,
            participants,
            thread,
        });
    }
    Ok(Json(out))
}

pub async fn get_one(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ThreadDetail>> {
    let thread = state.store.get_thread(id).await?;
    let messages = state.store.list_messages_by_thread(id).await?;

    let at = now();
    for message in &messages {
        if message.read_at.is_none() {
            state.store.mark_message_read(message.id, at).await?;
        }
    }
    let messages = state.store.list_messages_by_thread(id).await?;

    Ok(Json(ThreadDetail { thread, messages }))
}

#[derive(Deserialize)]
pub struct FlagToggle {
    #[serde(default)]
    value: bool,
}

pub async fn reply_later(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<FlagToggle>,
) -> AppResult<Json<Thread>> {
    state
        .store
        .set_thread_reply_later(id, body.value.then(now))
        .await?;
    Ok(Json(state.store.get_thread(id).await?))
}

pub async fn set_aside(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<FlagToggle>,
) -> AppResult<Json<Thread>> {
    state
        .store
        .set_thread_set_aside(id, body.value.then(now))
        .await?;
    Ok(Json(state.store.get_thread(id).await?))
}
