use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::decision::CycleId;
use super::domain::ApplicantId;
use super::repository::{AllocationStore, AuditSink, StoreError};
use super::service::{
    AllocationService, AllocationServiceError, CycleRequest, OverrideRequest,
    PriorityPreviewRequest, ReleaseRequest,
};

/// Router builder exposing cycle, override, release, audit and reporting endpoints.
pub fn allocation_router<S, A>(service: Arc<AllocationService<S, A>>) -> Router
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/allocation/cycles",
            post(run_cycle_handler::<S, A>).get(cycles_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/cycles/:cycle_id",
            get(cycle_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/cycles/:cycle_id/audit",
            get(cycle_audit_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/overrides",
            post(override_handler::<S, A>),
        )
        .route("/api/v1/allocation/releases", post(release_handler::<S, A>))
        .route(
            "/api/v1/allocation/applicants/:applicant_id/audit",
            get(applicant_audit_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/applicants/:applicant_id/decisions",
            get(applicant_decisions_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/applicants/:applicant_id/priority",
            get(applicant_priority_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/priority/preview",
            post(priority_preview_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/statistics",
            get(statistics_handler::<S, A>),
        )
        .route(
            "/api/v1/allocation/waiting-list",
            get(waiting_list_handler::<S, A>),
        )
        .route("/api/v1/allocation/model", get(model_handler::<S, A>))
        .with_state(service)
}

fn error_response(error: AllocationServiceError) -> Response {
    let status = match &error {
        AllocationServiceError::NeedsRetry { .. }
        | AllocationServiceError::LeaseUnavailable(_)
        | AllocationServiceError::Store(StoreError::Conflict { .. })
        | AllocationServiceError::Store(StoreError::PlacementMoved { .. }) => StatusCode::CONFLICT,
        AllocationServiceError::Aborted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AllocationServiceError::Constraint(_) | AllocationServiceError::Ineligible { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AllocationServiceError::ApplicantNotFound(_)
        | AllocationServiceError::RoomNotFound(_)
        | AllocationServiceError::CycleNotFound(_)
        | AllocationServiceError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        AllocationServiceError::NotAllocated(_) => StatusCode::CONFLICT,
        AllocationServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AllocationServiceError::Store(_)
        | AllocationServiceError::Audit(_)
        | AllocationServiceError::Scoring(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut payload = json!({
        "error": error.to_string(),
        "retryable": error.is_retryable(),
    });
    match &error {
        AllocationServiceError::Constraint(violation) => {
            payload["code"] = json!(violation.code());
        }
        AllocationServiceError::Ineligible { reason, .. } => {
            payload["code"] = json!(reason.code());
        }
        AllocationServiceError::NeedsRetry { cycle_id, .. }
        | AllocationServiceError::Aborted { cycle_id, .. } => {
            payload["cycle_id"] = json!(cycle_id.0);
        }
        _ => {}
    }

    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn run_cycle_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    axum::Json(request): axum::Json<CycleRequest>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.run_cycle(request) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn cycle_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    Path(cycle_id): Path<u64>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.cycle(CycleId(cycle_id)) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn cycle_audit_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    Path(cycle_id): Path<u64>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.audit_for_cycle(CycleId(cycle_id)) {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn override_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    axum::Json(request): axum::Json<OverrideRequest>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.manual_override(request) {
        Ok(receipt) => (StatusCode::CREATED, axum::Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn release_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    axum::Json(request): axum::Json<ReleaseRequest>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.release(request) {
        Ok(receipt) => (StatusCode::CREATED, axum::Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn applicant_audit_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    Path(applicant_id): Path<String>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.audit_for_applicant(&ApplicantId(applicant_id)) {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn applicant_decisions_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    Path(applicant_id): Path<String>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.decisions_for(&ApplicantId(applicant_id)) {
        Ok(decisions) => (StatusCode::OK, axum::Json(decisions)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn cycles_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.cycles() {
        Ok(cycles) => (StatusCode::OK, axum::Json(cycles)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn statistics_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.statistics() {
        Ok(statistics) => (StatusCode::OK, axum::Json(statistics)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn waiting_list_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.waiting_list() {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn model_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    (StatusCode::OK, axum::Json(service.model_status())).into_response()
}

pub(crate) async fn priority_preview_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    axum::Json(request): axum::Json<PriorityPreviewRequest>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.preview_priority(request) {
        Ok(scored) => (StatusCode::OK, axum::Json(scored)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn applicant_priority_handler<S, A>(
    State(service): State<Arc<AllocationService<S, A>>>,
    Path(applicant_id): Path<String>,
) -> Response
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    match service.priority_for(&ApplicantId(applicant_id)) {
        Ok(scored) => (StatusCode::OK, axum::Json(scored)).into_response(),
        Err(error) => error_response(error),
    }
}
