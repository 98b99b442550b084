//! Channel control and the status snapshot.

use axum::Json;
use axum::extract::{Path, State};

use telewatch_events::{ChannelSide, ConnectionStatus};
use telewatch_stack::StatusSnapshot;

use crate::context::AppContext;

use super::{ApiError, not_found, upstream_failure};

pub(super) fn parse_side(side: &str) -> Result<ChannelSide, ApiError> {
    side.parse()
        .map_err(|_| not_found(format!("unknown channel: {side}")))
}

/// GET /api/status
pub(super) async fn status_snapshot(State(context): State<AppContext>) -> Json<StatusSnapshot> {
    Json(context.supervisor.snapshot().await)
}

/// POST /api/{side}/start
pub(super) async fn start_channel(
    State(context): State<AppContext>,
    Path(side): Path<String>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let side = parse_side(&side)?;
    let status = context
        .supervisor
        .start(side)
        .await
        .map_err(upstream_failure)?;
    Ok(Json(status))
}

/// POST /api/{side}/stop
pub(super) async fn stop_channel(
    State(context): State<AppContext>,
    Path(side): Path<String>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let side = parse_side(&side)?;
    let status = context
        .supervisor
        .stop(side)
        .await
        .map_err(upstream_failure)?;
    Ok(Json(status))
}
