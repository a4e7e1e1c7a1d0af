//! Admin surface: row counts, recent activity, and item takedown. Gated by
//! `require_admin`, wired in `main`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::models::{Bag, ServiceError};
use crate::{AppError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/bags", get(recent_bags))
        .route("/items/{id}", delete(takedown_item))
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/admin/stats");
    let stats = state.store.stats().await.map_err(ServiceError::from)?;
    Ok(Json(json!({
        "bags": stats.bags,
        "items": stats.items,
    })))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    25
}

async fn recent_bags(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<Bag>>, AppError> {
    crate::metrics::inc_requests("/admin/bags");
    let limit = query.limit.clamp(1, 200);
    let bags = state
        .store
        .recent_bags(limit, false)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(bags))
}

/// Removes an item regardless of owner. Used for abuse takedowns, so the
/// deletion is logged with the item's source for the audit trail.
async fn takedown_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/admin/items/takedown");
    let item = state
        .store
        .item_by_id(id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::not_found("takedown", "item not found"))?;

    state
        .store
        .delete_item(id)
        .await
        .map_err(ServiceError::from)?;
    info!(
        target = "teed.admin",
        item_id = %id,
        bag_id = %item.bag_id,
        source_url = item.source_url.as_deref().unwrap_or(""),
        "item taken down"
    );
    Ok(Json(json!({ "deleted": id })))
}
