//! Instance endpoints
//!
//! Guest tokens travel via the `X-Instance-Token` header, the `token`
//! query parameter, or the `token` body field, in that precedence order.
//! Form passwords travel via the `password` body field, the
//! `X-Form-Password` header, or the `password` query parameter.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use procflow_core::{InstanceId, ProcessId, SubmissionId, SubmitRequest};

use super::errors::ApiError;
use super::{identity, require_identity};
use crate::server::ProcflowServer;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CredentialQuery {
    token: Option<String>,
    password: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Token precedence: header, query, body
fn resolve_token(
    headers: &HeaderMap,
    query: &CredentialQuery,
    body: Option<&String>,
) -> Option<String> {
    header_value(headers, "X-Instance-Token")
        .or_else(|| query.token.clone())
        .or_else(|| body.cloned())
}

/// Password precedence: body, header, query
fn resolve_password(
    headers: &HeaderMap,
    query: &CredentialQuery,
    body: Option<&String>,
) -> Option<String> {
    body.cloned()
        .or_else(|| header_value(headers, "X-Form-Password"))
        .or_else(|| query.password.clone())
}

/// POST /v1/processes/:process_id/start
pub(crate) async fn start_instance(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(process_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let started = server
        .execution
        .start_instance(&ProcessId(process_id), identity(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// GET /v1/instances/:instance_id/current-step
pub(crate) async fn current_step(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
    Query(query): Query<CredentialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = resolve_token(&headers, &query, None);
    let view = server
        .execution
        .current_step(&InstanceId(instance_id), token.as_deref())
        .await?;
    Ok(Json(view))
}

/// GET /v1/instances/:instance_id/current-steps
pub(crate) async fn current_steps(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
    Query(query): Query<CredentialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = resolve_token(&headers, &query, None);
    let views = server
        .execution
        .current_steps(&InstanceId(instance_id), token.as_deref())
        .await?;
    Ok(Json(views))
}

/// POST /v1/instances/:instance_id/submit-step
pub(crate) async fn submit_step(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
    Query(query): Query<CredentialQuery>,
    Json(mut request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.token = resolve_token(&headers, &query, request.token.as_ref());
    request.password = resolve_password(&headers, &query, request.password.as_ref());

    let instance = server
        .execution
        .submit_step(&InstanceId(instance_id), request)
        .await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// POST /v1/instances/:instance_id/abort
pub(crate) async fn abort_instance(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path(instance_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let instance = server
        .execution
        .abort_instance(&caller, &InstanceId(instance_id))
        .await?;
    Ok(Json(instance))
}

/// DELETE /v1/instances/:instance_id/submissions/:submission_id
pub(crate) async fn delete_submission(
    State(server): State<Arc<ProcflowServer>>,
    headers: HeaderMap,
    Path((instance_id, submission_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_identity(&headers)?;
    let instance = server
        .execution
        .delete_submission(
            &caller,
            &InstanceId(instance_id),
            &SubmissionId(submission_id),
        )
        .await?;
    Ok(Json(instance))
}
