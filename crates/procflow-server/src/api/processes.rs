//! Process definition endpoints
//!
//! Creation and mutation are owner-side and identity-gated; listing and
//! reading active processes is public.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use procflow_core::{ExecutionMode, ProcessId, StepId, StepSpec, StepUpdate};

use super::errors::ApiError;
use super::require_identity;
use crate::server::ProcflowServer;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateProcessRequest {
    title: String,
    mode: ExecutionMode,
    #[serde(default)]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    mode: Option<ExecutionMode>,
    search: Option<String>,
}

/// POST /v1/processes
pub(crate) async fn create_process(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Json(request): Json<CreateProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = require_identity(&headers)?;
    let process = server
        .definitions
        .create_process(owner, request.title, request.mode, request.steps)
        .await?;
    Ok((StatusCode::CREATED, Json(process)))
}

/// GET /v1/processes
pub(crate) async fn list_processes(
    State(server): State<Arc<ProcflowServer>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let processes = server
        .definitions
        .list_active(query.mode, query.search)
        .await?;
    Ok(Json(processes))
}

/// GET /v1/processes/:process_id
pub(crate) async fn get_process(
    State(server): State<Arc<ProcflowServer>>,
    Path(process_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let process = server.definitions.get_process(&ProcessId(process_id)).await?;
    Ok(Json(process))
}

/// DELETE /v1/processes/:process_id
pub(crate) async fn delete_process(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(process_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    server
        .definitions
        .delete_process(&caller, &ProcessId(process_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/processes/:process_id/close
pub(crate) async fn close_process(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(process_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let process = server
        .definitions
        .close_process(&caller, &ProcessId(process_id))
        .await?;
    Ok(Json(process))
}

/// POST /v1/processes/:process_id/steps
pub(crate) async fn add_step(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(process_id): Path<String>,
    Json(spec): Json<StepSpec>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let process = server
        .definitions
        .add_step(&caller, &ProcessId(process_id), spec)
        .await?;
    Ok((StatusCode::CREATED, Json(process)))
}

/// PUT /v1/processes/:process_id/steps/:step_id
pub(crate) async fn update_step(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path((process_id, step_id)): Path<(String, String)>,
    Json(update): Json<StepUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let process = server
        .definitions
        .update_step(&caller, &ProcessId(process_id), &StepId(step_id), update)
        .await?;
    Ok(Json(process))
}

/// DELETE /v1/processes/:process_id/steps/:step_id
pub(crate) async fn remove_step(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path((process_id, step_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let process = server
        .definitions
        .remove_step(&caller, &ProcessId(process_id), &StepId(step_id))
        .await?;
    Ok(Json(process))
}
