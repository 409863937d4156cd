use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::store::fts::SearchHit;

use super::SharedState;

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    25
}

pub async fn search(
    State(state): State<SharedState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<SearchHit>>> {
    Ok(Json(state.store.search_messages(&q.q, q.limit).await?))
}
