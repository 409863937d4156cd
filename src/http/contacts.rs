use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::types::{Bucket, Contact};

use super::SharedState;

pub async fn list(State(state): State<SharedState>) -> AppResult<Json<Vec<Contact>>> {
    Ok(Json(state.store.list_contacts().await?))
}

pub async fn get_one(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Contact>> {
    Ok(Json(state.store.get_contact(id).await?))
}

#[derive(Deserialize)]
pub struct UpdateContact {
    name: Option<String>,
    bucket: Option<String>,
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateContact>,
) -> AppResult<Json<Contact>> {
    let bucket = body
        .bucket
        .as_deref()
        .map(|b| Bucket::parse(b).ok_or_else(|| AppError::Validation(format!("unknown bucket \"{b}\""))))
        .transpose()?;
    let contact = state
        .store
        .update_contact(id, body.name.as_deref(), bucket)
        .await?;
    Ok(Json(contact))
}

pub async fn set_default_identity(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Contact>> {
    state.store.set_default_identity(id).await?;
    Ok(Json(state.store.get_contact(id).await?))
}

#[derive(Deserialize)]
pub struct ScreenerUpdate {
    bucket: String,
}

pub async fn screener_update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<ScreenerUpdate>,
) -> AppResult<Json<Contact>> {
    let bucket = Bucket::parse(&body.bucket)
        .ok_or_else(|| AppError::Validation(format!("unknown bucket \"{}\"", body.bucket)))?;
    state.store.set_contact_bucket(id, bucket).await?;
    Ok(Json(state.store.get_contact(id).await?))
}
