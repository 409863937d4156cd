use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::rules::ConditionGroup;
use crate::types::{now, Rule, RuleActionType, RuleApplication};

use super::SharedState;

pub async fn list(State(state): State<SharedState>) -> AppResult<Json<Vec<Rule>>> {
    Ok(Json(state.store.list_rules().await?))
}

#[derive(Deserialize)]
pub struct RuleInput {
    name: String,
    conditions: ConditionGroup,
    action_type: RuleActionType,
    action_config: Option<serde_json::Value>,
    #[serde(default)]
    folder_ids: Vec<String>,
    #[serde(default)]
    position: i64,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<RuleInput>,
) -> AppResult<Json<Rule>> {
    let created_at = now();
    let rule = Rule {
        id: 0,
        name: body.name,
        conditions: body.conditions,
        action_type: body.action_type,
        action_config: body.action_config,
        folder_ids: body.folder_ids,
        position: body.position,
        enabled: body.enabled,
        created_at,
        updated_at: created_at,
    };
    Ok(Json(state.store.create_rule(&rule).await?))
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<RuleInput>,
) -> AppResult<Json<Rule>> {
    let existing = state.store.get_rule(id).await?;
    let rule = Rule {
        id,
        name: body.name,
        conditions: body.conditions,
        action_type: body.action_type,
        action_config: body.action_config,
        folder_ids: body.folder_ids,
        position: body.position,
        enabled: body.enabled,
        created_at: existing.created_at,
        updated_at: now(),
    };
    Ok(Json(state.store.update_rule(&rule).await?))
}

pub async fn destroy(State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<()> {
    state.store.delete_rule(id).await
}

/// Kicks off a retroactive application job and returns immediately; the
/// caller polls `GET /rules/applications/:id` for progress.
pub async fn apply(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<RuleApplication>> {
    let application = state.store.create_rule_application(id).await?;
    let store = state.store.clone();
    let application_id = application.id;
    tokio::spawn(async move {
        crate::rules::application::run(store, application_id, id).await;
    });
    Ok(Json(application))
}

pub async fn application_status(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<RuleApplication>> {
    Ok(Json(state.store.get_rule_application(id).await?))
}
