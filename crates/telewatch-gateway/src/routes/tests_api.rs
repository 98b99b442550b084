//! Test configuration CRUD, run control and protocol records.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use telewatch_testrun::{
    ConfigStoreError, ProtocolError, RunError, TestConfiguration, TestProtocol, TestRun,
};

use crate::context::AppContext;

use super::{ApiError, conflict, not_found, storage_failure};

#[derive(Debug, Serialize)]
pub(super) struct ConfigsResponse {
    configs: Vec<TestConfiguration>,
}

#[derive(Debug, Serialize)]
pub(super) struct ProtocolsResponse {
    protocols: Vec<TestProtocol>,
}

#[derive(Debug, Serialize)]
pub(super) struct DeleteResponse {
    status: &'static str,
}

fn config_error(error: ConfigStoreError) -> ApiError {
    match error {
        ConfigStoreError::NotFound(id) => not_found(format!("configuration not found: {id}")),
        other => storage_failure(other),
    }
}

fn protocol_error(error: ProtocolError) -> ApiError {
    match error {
        ProtocolError::NotFound(id) => not_found(format!("protocol not found: {id}")),
        other => storage_failure(other),
    }
}

pub(super) fn run_error(error: RunError) -> ApiError {
    match error {
        RunError::ConfigurationNotFound(id) => {
            not_found(format!("configuration not found: {id}"))
        }
        RunError::AlreadyRunning => conflict("a test run is already active"),
        RunError::Store(source) => storage_failure(source),
    }
}

/// GET /api/tests/configs
pub(super) async fn list_configs(
    State(context): State<AppContext>,
) -> Result<Json<ConfigsResponse>, ApiError> {
    let configs = context.configs.list().await.map_err(config_error)?;
    Ok(Json(ConfigsResponse { configs }))
}

/// POST /api/tests/configs
pub(super) async fn create_config(
    State(context): State<AppContext>,
    Json(config): Json<TestConfiguration>,
) -> Result<Json<TestConfiguration>, ApiError> {
    if config.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name must be non-empty".to_string()));
    }
    let saved = context.configs.save(config).await.map_err(config_error)?;
    Ok(Json(saved))
}

/// PUT /api/tests/configs/{id}
pub(super) async fn update_config(
    State(context): State<AppContext>,
    Path(id): Path<String>,
    Json(mut config): Json<TestConfiguration>,
) -> Result<Json<TestConfiguration>, ApiError> {
    if config.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name must be non-empty".to_string()));
    }
    config.id = id;
    let saved = context.configs.save(config).await.map_err(config_error)?;
    Ok(Json(saved))
}

/// DELETE /api/tests/configs/{id}
pub(super) async fn delete_config(
    State(context): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    context.configs.delete(&id).await.map_err(config_error)?;
    Ok(Json(DeleteResponse { status: "deleted" }))
}

/// POST /api/tests/run/{config_id}
pub(super) async fn start_run(
    State(context): State<AppContext>,
    Path(config_id): Path<String>,
) -> Result<Json<TestRun>, ApiError> {
    let run = context.engine.start(&config_id).await.map_err(run_error)?;
    Ok(Json(run))
}

/// GET /api/tests/run
pub(super) async fn run_status(
    State(context): State<AppContext>,
) -> Result<Json<TestRun>, ApiError> {
    context
        .engine
        .status()
        .await
        .map(Json)
        .ok_or_else(|| not_found("no test run in this session"))
}

/// POST /api/tests/run/abort — a no-op when nothing is running.
pub(super) async fn abort_run(
    State(context): State<AppContext>,
) -> Result<Json<TestRun>, ApiError> {
    context
        .engine
        .abort()
        .await
        .map(Json)
        .ok_or_else(|| not_found("no test run in this session"))
}

/// GET /api/tests/protocols
pub(super) async fn list_protocols(
    State(context): State<AppContext>,
) -> Result<Json<ProtocolsResponse>, ApiError> {
    let protocols = context.protocols.list().map_err(protocol_error)?;
    Ok(Json(ProtocolsResponse { protocols }))
}

/// GET /api/tests/protocols/{id}
pub(super) async fn get_protocol(
    State(context): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<TestProtocol>, ApiError> {
    let protocol = context.protocols.get(&id).map_err(protocol_error)?;
    Ok(Json(protocol))
}

/// GET /api/tests/protocols/{id}/steps/{index}/log
pub(super) async fn step_log(
    State(context): State<AppContext>,
    Path((id, index)): Path<(String, u32)>,
) -> Result<String, ApiError> {
    context.protocols.step_log(&id, index).map_err(protocol_error)
}

/// DELETE /api/tests/protocols/{id}
pub(super) async fn delete_protocol(
    State(context): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    context.protocols.delete(&id).map_err(protocol_error)?;
    Ok(Json(DeleteResponse { status: "deleted" }))
}
