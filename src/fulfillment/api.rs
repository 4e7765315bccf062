use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::engine::FulfillmentEngine;
use super::models::{Actor, AssignmentStatus, MirrorMode, NewWorker, RemovalSelector};
use crate::errors::{EngineError, ErrorKind};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub engine: FulfillmentEngine,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: String,
    #[serde(default)]
    pub mirror: MirrorMode,
}

#[derive(Deserialize)]
pub struct AddNoteRequest {
    pub text: String,
    #[serde(default = "default_true")]
    pub push_upstream: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub assignment_ids: Vec<i64>,
    pub worker_id: i64,
}

#[derive(Deserialize)]
pub struct RemoveRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub order_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct ReopenRequest {
    pub order_number: String,
    pub worker_id: i64,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct WorkersQuery {
    pub merchant_id: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "blocked", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        (status, Json(serde_json::json!({"error": message, "kind": kind}))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        if matches!(err, EngineError::Forbidden(_)) {
            return ApiError::Forbidden(message);
        }
        match err.kind() {
            ErrorKind::Validation => ApiError::BadRequest(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::Blocked => ApiError::Conflict(message),
            ErrorKind::UpstreamUnavailable => ApiError::Unavailable(message),
            ErrorKind::Internal => {
                tracing::error!(error = ?err, "internal error serving request");
                ApiError::Internal(message)
            }
        }
    }
}

// ── Caller identity ───────────────────────────────────────────────────

/// The authenticated caller, as asserted by the fronting auth layer through
/// `x-actor-role` (`preparer` | `supervisor`) and `x-worker-id`.
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        match header("x-actor-role").as_deref() {
            Some("supervisor") => Ok(RequestActor(Actor::Supervisor)),
            Some("preparer") => {
                let worker_id = header("x-worker-id")
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| ApiError::BadRequest("x-worker-id header missing or invalid".into()))?;
                Ok(RequestActor(Actor::Preparer { worker_id }))
            }
            Some(other) => Err(ApiError::BadRequest(format!("unknown actor role '{}'", other))),
            None => Err(ApiError::BadRequest("x-actor-role header missing".into())),
        }
    }
}

fn require_self_or_supervisor(actor: Actor, worker_id: i64) -> Result<(), ApiError> {
    match actor {
        Actor::Supervisor => Ok(()),
        Actor::Preparer { worker_id: me } if me == worker_id => Ok(()),
        Actor::Preparer { .. } => Err(ApiError::Forbidden("cannot act for another worker".into())),
    }
}

fn require_supervisor(actor: Actor) -> Result<(), ApiError> {
    match actor {
        Actor::Supervisor => Ok(()),
        Actor::Preparer { .. } => Err(ApiError::Forbidden("supervisor role required".into())),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/workers", get(list_workers).post(create_worker))
        .route("/api/workers/{id}/claim", post(claim_next_order))
        .route("/api/workers/{id}/assignments", get(list_active_assignments))
        .route("/api/workers/{id}/history", get(list_history))
        .route("/api/assignments/{id}/status", post(advance_status))
        .route("/api/assignments/{id}/complete", post(complete_assignment))
        .route("/api/assignments/{id}/notes", post(add_note))
        .route("/api/assignments/reassign", post(reassign))
        .route("/api/assignments/remove", post(remove_assignments))
        .route("/api/history/reopen", post(reopen_from_history))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_workers(
    State(state): State<SharedState>,
    Query(query): Query<WorkersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.list_workers(query.merchant_id).await?))
}

async fn create_worker(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<NewWorker>,
) -> Result<impl IntoResponse, ApiError> {
    require_supervisor(actor)?;
    let worker = state.engine.create_worker(req).await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

async fn claim_next_order(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(worker_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_supervisor(actor, worker_id)?;
    Ok(Json(state.engine.claim_next_order(worker_id).await?))
}

async fn list_active_assignments(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(worker_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_supervisor(actor, worker_id)?;
    Ok(Json(state.engine.list_active_assignments(worker_id).await?))
}

async fn list_history(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(worker_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_supervisor(actor, worker_id)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.engine.list_history(worker_id, limit).await?))
}

async fn advance_status(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(assignment_id): Path<i64>,
    Json(req): Json<AdvanceStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target: AssignmentStatus = req.status.trim().parse().map_err(ApiError::BadRequest)?;
    let assignment = state
        .engine
        .advance_status(actor, assignment_id, target, req.mirror)
        .await?;
    Ok(Json(assignment))
}

async fn complete_assignment(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(assignment_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.complete_assignment(actor, assignment_id).await?))
}

async fn add_note(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Path(assignment_id): Path<i64>,
    Json(req): Json<AddNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let assignment = state
        .engine
        .add_note(actor, assignment_id, &req.text, req.push_upstream)
        .await?;
    Ok(Json(assignment))
}

async fn reassign(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<ReassignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_supervisor(actor)?;
    Ok(Json(state.engine.reassign(req.assignment_ids, req.worker_id).await?))
}

async fn remove_assignments(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<RemoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_supervisor(actor)?;
    let selector = match (req.ids.is_empty(), req.order_ids.is_empty()) {
        (false, true) => RemovalSelector::Ids(req.ids),
        (true, false) => RemovalSelector::OrderIds(req.order_ids),
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of 'ids' or 'order_ids'".into(),
            ));
        }
    };
    Ok(Json(state.engine.remove_assignments(selector).await?))
}

async fn reopen_from_history(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<ReopenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_supervisor(actor)?;
    let assignment = state
        .engine
        .reopen_from_history(&req.order_number, req.worker_id)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

// ── Tests ─────────────────────────────────────────────────────────────
