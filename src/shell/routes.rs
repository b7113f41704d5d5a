//! REST endpoints driving signup flows from a browser shell.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use super::registry::FlowRegistry;
use super::view::ShellView;
use crate::error::{ConfigError, FlowError, RegistryError};
use crate::flow::{CloseOutcome, CloseReason};

#[derive(Clone)]
pub struct ShellRouteState {
    pub registry: Arc<FlowRegistry>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenRequest {
    #[serde(default)]
    seed_email: Option<String>,
    #[serde(default)]
    flow: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    values: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CloseRequest {
    #[serde(default = "default_close_reason")]
    reason: CloseReason,
}

fn default_close_reason() -> CloseReason {
    CloseReason::User
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn parse_flow_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid flow ID"))
}

fn flow_error_response(err: FlowError) -> Response {
    match err {
        FlowError::Validation(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "error": "validation_failed",
                "field": e.field,
                "message": e.message,
            })),
        )
            .into_response(),
        other => error_response(StatusCode::CONFLICT, other.to_string()),
    }
}

/// POST /api/signup/flows
///
/// Opens a new flow instance, optionally seeded with a known email.
async fn open_flow(
    State(state): State<ShellRouteState>,
    body: Option<Json<OpenRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .registry
        .open(body.flow.as_deref(), body.seed_email.as_deref())
        .await
    {
        Ok((controller, flow_state)) => {
            let view = ShellView::from_state(&flow_state, controller.sequence());
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "flow_id": flow_state.flow_id, "view": view })),
            )
                .into_response()
        }
        Err(RegistryError::UnknownFlow(name)) => {
            error_response(StatusCode::NOT_FOUND, format!("Unknown flow: {name}"))
        }
        Err(RegistryError::Flow(e)) => flow_error_response(e),
    }
}

/// GET /api/signup/flows/{id}
async fn get_flow(State(state): State<ShellRouteState>, Path(id): Path<String>) -> Response {
    let flow_id = match parse_flow_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.registry.get(flow_id).await {
        Some(controller) => {
            let snapshot = controller.snapshot().await;
            Json(ShellView::from_state(&snapshot, controller.sequence())).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "Flow not found"),
    }
}

/// POST /api/signup/flows/{id}/steps
///
/// Submits the current step. Validation failures are 422, phase conflicts
/// 409. A failed insert is still 200: the outcome and view carry the error.
async fn submit_step(
    State(state): State<ShellRouteState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    let flow_id = match parse_flow_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(controller) = state.registry.get(flow_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Flow not found");
    };

    match controller.submit_step(body.values).await {
        Ok(outcome) => {
            let snapshot = controller.snapshot().await;
            let view = ShellView::from_state(&snapshot, controller.sequence());
            Json(serde_json::json!({ "outcome": outcome, "view": view })).into_response()
        }
        Err(e) => flow_error_response(e),
    }
}

/// POST /api/signup/flows/{id}/close
async fn close_flow(
    State(state): State<ShellRouteState>,
    Path(id): Path<String>,
    body: Option<Json<CloseRequest>>,
) -> Response {
    let flow_id = match parse_flow_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(controller) = state.registry.get(flow_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Flow not found");
    };
    let reason = body.map(|Json(b)| b.reason).unwrap_or(CloseReason::User);

    match controller.close(reason).await {
        CloseOutcome::Closed { abandoned } => {
            state.registry.remove(flow_id).await;
            info!(flow_id = %flow_id, abandoned, "Flow closed");
            Json(serde_json::json!({ "closed": true, "abandoned": abandoned })).into_response()
        }
        CloseOutcome::Ignored => {
            warn!(flow_id = %flow_id, "Close ignored while submitting");
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "closed": false, "abandoned": false })),
            )
                .into_response()
        }
    }
}

/// GET /health
async fn health(State(state): State<ShellRouteState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "open_flows": state.registry.len().await,
        "flows": state.registry.flow_names(),
    }))
}

/// Build the shell REST routes.
pub fn shell_routes(state: ShellRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/signup/flows", post(open_flow))
        .route("/api/signup/flows/{id}", get(get_flow))
        .route("/api/signup/flows/{id}/steps", post(submit_step))
        .route("/api/signup/flows/{id}/close", post(close_flow))
        .with_state(state)
}

/// CORS for the landing page origin, or any origin when unset.
pub fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer, ConfigError> {
    let origin = match allowed_origin {
        Some(origin) => {
            let value = HeaderValue::from_str(origin).map_err(|e| ConfigError::InvalidValue {
                key: "SIGNUP_ALLOWED_ORIGIN".to_string(),
                message: e.to_string(),
            })?;
            AllowOrigin::exact(value)
        }
        None => AllowOrigin::any(),
    };
    Ok(CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(origin)
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]))
}
