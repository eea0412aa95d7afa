//! Operator API and location webhook.
//!
//! Endpoints:
//! - GET  /health
//! - POST /locations                     - tracker webhook, same payload as Kafka
//! - POST /assignments                   - create for a booking
//! - GET  /assignments                   - list, filtered by query string
//! - GET  /assignments/{id}              - joined view
//! - POST /assignments/bulk-assign       - per-item results
//! - POST /assignments/{id}/assign
//! - POST /assignments/{id}/transition   - `{status, expected}`
//! - POST /assignments/{id}/eta          - synchronous ETA refresh
//! - GET  /stats
//! - GET  /vehicles/tracking             - latest position of every tracked vehicle
//! - GET  /vehicles/{id}/tracking
//! - GET  /devices/{id}/locations        - newest first, `?limit=`
//! - GET  /alerts                        - unresolved alerts
//! - POST /alerts
//! - POST /alerts/{id}/resolve
//! - GET  /notifications/dispatch        - shared dispatch channel
//! - GET  /notifications/{user_id}
//! - POST /notifications/{id}/read

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::assignment::{AssignmentFilter, DispatchStatus};
use crate::models::message::LocationMessage;
use crate::processor::assignment_manager::{AssignRequest, AssignmentManager, BulkAssignItem};
use crate::processor::emergency::{EmergencyAlertHandler, RaiseAlert};
use crate::processor::ingestion::{IngestOutcome, IngestionService};
use crate::processor::notifier::NotificationDispatcher;

pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub assignments: Arc<AssignmentManager>,
    pub alerts: Arc<EmergencyAlertHandler>,
    pub notifications: Arc<NotificationDispatcher>,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

pub(crate) fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::AssignmentNotFound(_)
        | DispatchError::BookingNotFound(_)
        | DispatchError::DriverNotFound(_)
        | DispatchError::VehicleNotFound(_)
        | DispatchError::AlertNotFound(_)
        | DispatchError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::IllegalTransition { .. }
        | DispatchError::AssignmentLocked { .. }
        | DispatchError::DuplicateAssignment(_)
        | DispatchError::ResourceBusy { .. }
        | DispatchError::Conflict { .. }
        | DispatchError::AlertAlreadyResolved(_)
        | DispatchError::StaleReport { .. } => StatusCode::CONFLICT,
        DispatchError::UnknownDevice(_)
        | DispatchError::InvalidReport(_)
        | DispatchError::InvalidAssignment(_)
        | DispatchError::ResourceUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::RoutingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            return json_error(status, "internal error");
        }
        json_error(status, &self.to_string())
    }
}

type ApiResult<T> = Result<T, DispatchError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/locations", post(ingest_location))
        .route("/assignments", post(create_assignment).get(list_assignments))
        .route("/assignments/bulk-assign", post(bulk_assign))
        .route("/assignments/{id}", get(get_assignment))
        .route("/assignments/{id}/assign", post(assign_resources))
        .route("/assignments/{id}/transition", post(transition_assignment))
        .route("/assignments/{id}/eta", post(refresh_eta))
        .route("/stats", get(stats))
        .route("/vehicles/tracking", get(tracked_vehicles))
        .route("/vehicles/{id}/tracking", get(vehicle_tracking))
        .route("/devices/{id}/locations", get(device_history))
        .route("/alerts", post(raise_alert).get(list_alerts))
        .route("/alerts/{id}/resolve", post(resolve_alert))
        .route("/notifications/dispatch", get(list_dispatch_notifications))
        .route("/notifications/{id}", get(list_user_notifications))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn ingest_location(
    State(state): State<Arc<AppState>>,
    Json(message): Json<LocationMessage>,
) -> ApiResult<Response> {
    let response = match state.ingestion.ingest(message).await? {
        IngestOutcome::Stored(location) => (StatusCode::CREATED, Json(location)).into_response(),
        IngestOutcome::Duplicate => {
            (StatusCode::OK, Json(serde_json::json!({"status": "duplicate"}))).into_response()
        }
        IngestOutcome::Ignored(_) => {
            (StatusCode::ACCEPTED, Json(serde_json::json!({"status": "ignored"}))).into_response()
        }
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct CreateAssignment {
    booking_id: Uuid,
    #[serde(default)]
    priority: i32,
    notes: Option<String>,
}

async fn create_assignment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAssignment>,
) -> ApiResult<Response> {
    let assignment = state
        .assignments
        .create(body.booking_id, body.priority, body.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AssignmentFilter>,
) -> ApiResult<Response> {
    let assignments = state.assignments.list(&filter).await?;
    Ok(Json(assignments).into_response())
}

async fn get_assignment(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    Ok(Json(state.assignments.view(id).await?).into_response())
}

async fn assign_resources(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Response> {
    Ok(Json(state.assignments.assign(id, request).await?).into_response())
}

async fn bulk_assign(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<BulkAssignItem>>,
) -> ApiResult<Response> {
    Ok(Json(state.assignments.bulk_assign(items).await).into_response())
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    status: DispatchStatus,
    /// The status the caller last saw; a mismatch is a 409.
    expected: DispatchStatus,
}

async fn transition_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransitionRequest>,
) -> ApiResult<Response> {
    let assignment = state
        .assignments
        .transition(id, body.expected, body.status)
        .await?;
    Ok(Json(assignment).into_response())
}

async fn refresh_eta(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    Ok(Json(state.assignments.recompute_eta(id).await?).into_response())
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.assignments.stats().await?).into_response())
}

async fn tracked_vehicles(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.ingestion.tracked_vehicles().await?).into_response())
}

async fn vehicle_tracking(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    match state.ingestion.tracking(id).await? {
        Some(tracking) => Ok(Json(tracking).into_response()),
        None => Ok(json_error(StatusCode::NOT_FOUND, "no location reported for vehicle")),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    100
}

async fn device_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Response> {
    let locations = state.ingestion.history(&id, query.limit.min(1000)).await?;
    Ok(Json(locations).into_response())
}

async fn raise_alert(State(state): State<Arc<AppState>>, Json(body): Json<RaiseAlert>) -> ApiResult<Response> {
    let alert = state.alerts.raise(body).await?;
    Ok((StatusCode::CREATED, Json(alert)).into_response())
}

async fn list_alerts(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.alerts.list_unresolved().await?).into_response())
}

#[derive(Debug, Deserialize)]
struct ResolveAlert {
    resolved_by: Uuid,
}

async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveAlert>,
) -> ApiResult<Response> {
    Ok(Json(state.alerts.resolve(id, body.resolved_by).await?).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    unread_only: bool,
}

async fn list_dispatch_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Response> {
    let notifications = state.notifications.list_for_user(None, query.unread_only).await?;
    Ok(Json(notifications).into_response())
}

async fn list_user_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Response> {
    let notifications = state
        .notifications
        .list_for_user(Some(user_id), query.unread_only)
        .await?;
    Ok(Json(notifications).into_response())
}

async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    state.notifications.mark_read(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
