//! HTTP surface of the [`ReadApi`].
//!
//! * `GET /v1/closed-positions?user=&chainId=&limit=&cursor=&enrich=`
//!   returns `{ "items": [...], "nextCursor": string | null }`, positions are
//!   enriched with live vault data unless `enrich=false`.
//! * `GET /health` returns `{ "status": "ok" }`.
//!
//! Errors are returned as `{ "error", "code", "details"? }` with the stable
//! codes of [`ApiError::kind`].

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use super::{MAX_PAGE_LIMIT, ReadApi};
use crate::{chain::LogSource, error::ApiError, viewer::Viewer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPositionsQuery {
    pub user: String,
    pub chain_id: u64,
    /// Any integer, clamped to `[1, MAX_PAGE_LIMIT]`.
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub enrich: Option<bool>,
}

pub fn router<V, L>(api: ReadApi<V, L>) -> Router
where
    V: Viewer + 'static,
    L: LogSource + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/v1/closed-positions", get(closed_positions::<V, L>))
        .with_state(api)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn closed_positions<V, L>(
    State(api): State<ReadApi<V, L>>,
    query: Result<Query<ClosedPositionsQuery>, QueryRejection>,
) -> Result<Response, ApiError>
where
    V: Viewer + 'static,
    L: LogSource + 'static,
{
    let Query(q) = query.map_err(|e| ApiError::InvalidQuery(e.body_text()))?;
    let cursor = q.cursor.as_deref();
    let limit = q.limit.map(|l| l.clamp(1, MAX_PAGE_LIMIT as i64) as usize);
    if q.enrich.unwrap_or(true) {
        let page = api
            .closed_positions_enriched(q.chain_id, &q.user, limit, cursor)
            .await?;
        Ok(Json(page).into_response())
    } else {
        let page = api
            .closed_positions(q.chain_id, &q.user, limit, cursor)
            .await?;
        Ok(Json(page).into_response())
    }
}
