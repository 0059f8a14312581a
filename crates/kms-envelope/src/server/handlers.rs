//! Axum request handlers for all service endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, TransformRequest, TransformResponse};
use common::{ServiceError, TransformError};
use tracing::warn;

use super::{middleware, state::AppState};
use crate::envelope::ValueContext;
use crate::health::HealthState;

/// `GET /healthz`: every provider check.
///
/// Returns `200 OK` only when all checks are healthy, `503` otherwise. The
/// body lists each check either way.
pub async fn healthz(State(state): State<AppState>) -> Response {
    let report = state.health.report();
    let code = if state.health.all_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report)).into_response()
}

/// `GET /healthz/:check`: a single provider check, e.g. `kms-provider-0`.
pub async fn healthz_check(State(state): State<AppState>, Path(check): Path<String>) -> Response {
    let Some(check) = state.health.get(&check) else {
        let err = ErrorResponse::new("not_found", format!("unknown health check: {check}"));
        return (StatusCode::NOT_FOUND, Json(err)).into_response();
    };
    let status = check.status();
    match status.state {
        HealthState::Healthy => (StatusCode::OK, "ok").into_response(),
        HealthState::Unknown => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{}: not probed yet", check.name()),
        )
            .into_response(),
        HealthState::Unhealthy => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "{}: {}",
                check.name(),
                status.last_error.as_deref().unwrap_or("unhealthy")
            ),
        )
            .into_response(),
    }
}

/// `POST /v1/transform/encrypt`: transform a value for storage.
pub async fn transform_encrypt(
    State(state): State<AppState>,
    Json(req): Json<TransformRequest>,
) -> Response {
    let ctx = value_context(&req);
    match state
        .registry
        .transform_to_storage(&req.resource, &req.data, &ctx)
        .await
    {
        Ok(data) => (StatusCode::OK, Json(TransformResponse { data })).into_response(),
        Err(e) => transform_error(&req.resource, e),
    }
}

/// `POST /v1/transform/decrypt`: recover a stored value.
pub async fn transform_decrypt(
    State(state): State<AppState>,
    Json(req): Json<TransformRequest>,
) -> Response {
    let ctx = value_context(&req);
    match state
        .registry
        .transform_from_storage(&req.resource, &req.data, &ctx)
        .await
    {
        Ok(data) => (StatusCode::OK, Json(TransformResponse { data })).into_response(),
        Err(e) => transform_error(&req.resource, e),
    }
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn value_context(req: &TransformRequest) -> ValueContext {
    ValueContext::new(req.key.as_bytes()).with_timeout(middleware::TRANSFORM_DEADLINE)
}

fn transform_error(resource: &str, err: TransformError) -> Response {
    let code = err.code();
    warn!(resource, code, error = %err, "transform failed");
    let err = ServiceError::from(err);
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::new(code, err.to_string()))).into_response()
}
