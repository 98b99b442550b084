//! History fetch and clear.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use telewatch_history::HistorySnapshot;

use crate::context::AppContext;

use super::channels::parse_side;
use super::{ApiError, storage_failure};

/// Query parameters of the history fetch.
#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    /// Newest entries per channel; everything when absent.
    limit: Option<usize>,
}

/// Result body of a history clear.
#[derive(Debug, Serialize)]
pub(super) struct ClearResponse {
    status: &'static str,
}

/// GET /api/history?limit=N
pub(super) async fn fetch_history(
    State(context): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistorySnapshot>, ApiError> {
    let snapshot = context
        .history
        .query_all(query.limit)
        .await
        .map_err(storage_failure)?;
    Ok(Json(snapshot))
}

/// DELETE /api/history/{side} — idempotent; success even when already empty.
pub(super) async fn clear_history(
    State(context): State<AppContext>,
    Path(side): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let side = parse_side(&side)?;
    context.history.clear(side).await.map_err(storage_failure)?;
    Ok(Json(ClearResponse { status: "cleared" }))
}
