//! Observer-facing HTTP/WebSocket surface.

mod channels;
mod history;
mod tests_api;
mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};

use crate::context::AppContext;

/// Build the gateway router over the injected context.
pub fn router(context: AppContext) -> Router {
    Router::new()
        .route("/api/status", get(channels::status_snapshot))
        .route("/api/{side}/start", post(channels::start_channel))
        .route("/api/{side}/stop", post(channels::stop_channel))
        .route("/api/history", get(history::fetch_history))
        .route("/api/history/{side}", delete(history::clear_history))
        .route(
            "/api/tests/configs",
            get(tests_api::list_configs).post(tests_api::create_config),
        )
        .route(
            "/api/tests/configs/{id}",
            put(tests_api::update_config).delete(tests_api::delete_config),
        )
        .route("/api/tests/run", get(tests_api::run_status))
        .route("/api/tests/run/abort", post(tests_api::abort_run))
        .route("/api/tests/run/{config_id}", post(tests_api::start_run))
        .route("/api/tests/protocols", get(tests_api::list_protocols))
        .route(
            "/api/tests/protocols/{id}",
            get(tests_api::get_protocol).delete(tests_api::delete_protocol),
        )
        .route(
            "/api/tests/protocols/{id}/steps/{index}/log",
            get(tests_api::step_log),
        )
        .route("/ws", get(ws::live_stream))
        .with_state(context)
}

/// Error payload shape shared by every route.
pub(crate) type ApiError = (StatusCode, String);

pub(crate) fn not_found(message: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, message.into())
}

pub(crate) fn conflict(message: impl Into<String>) -> ApiError {
    (StatusCode::CONFLICT, message.into())
}

pub(crate) fn storage_failure(message: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}

pub(crate) fn upstream_failure(message: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_GATEWAY, message.to_string())
}
