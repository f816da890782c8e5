use super::common::*;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::workflows::allocation::domain::{Gender, GenderPolicy, Room};
use crate::workflows::allocation::router::allocation_router;
use crate::workflows::allocation::service::{AllocationService, CycleRequest, OverrideRequest};
use crate::workflows::allocation::store::MemoryAuditLog;

fn post_json(uri: &str, body: Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::post(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::get(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

#[tokio::test]
async fn cycle_route_commits_and_reports_counts() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(post_json("/api/v1/allocation/cycles", json!({})))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["cycle"]["status"]["state"], "committed");
    assert_eq!(payload["counts"]["allocated"], 5);
    assert_eq!(payload["decisions"][0]["applicant_id"], "S-3");
}

#[tokio::test]
async fn dry_run_route_returns_preview_without_decision_ids() {
    let (service, store, _) = build_service(female_wing(), female_cohort());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(post_json(
            "/api/v1/allocation/cycles",
            json!({ "dry_run": true }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["cycle"]["id"], 0);
    assert!(payload["decisions"][0].get("decision_id").is_none());
    assert_eq!(occupancy(store.as_ref(), "F-101"), 0);
}

#[tokio::test]
async fn conflicting_commit_maps_to_conflict_with_cycle_id() {
    let store = Arc::new(InterferingStore::new(female_wing(), female_cohort(), "F-102"));
    let service = Arc::new(AllocationService::with_model(
        store,
        Arc::new(MemoryAuditLog::new()),
        Arc::new(GpaModel),
        gpa_settings(),
    ));

    let response = crate::workflows::allocation::router::run_cycle_handler::<
        InterferingStore,
        MemoryAuditLog,
    >(State(service), axum::Json(CycleRequest::default()))
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retryable"], true);
    assert_eq!(payload["cycle_id"], 1);
}

#[tokio::test]
async fn timed_out_cycle_maps_to_service_unavailable() {
    let settings = crate::workflows::allocation::service::EngineSettings {
        cycle_timeout: std::time::Duration::ZERO,
        ..gpa_settings()
    };
    let (service, _, _) = build_service_with(female_wing(), female_cohort(), settings);

    let response =
        crate::workflows::allocation::router::run_cycle_handler::<_, MemoryAuditLog>(
            State(Arc::new(service)),
            axum::Json(CycleRequest::default()),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retryable"], false);
}

#[tokio::test]
async fn unknown_cycle_is_not_found() {
    let (service, _, _) = build_service(female_wing(), female_cohort());

    let response = crate::workflows::allocation::router::cycle_handler::<_, MemoryAuditLog>(
        State(Arc::new(service)),
        Path(42),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn override_violation_is_unprocessable_with_code() {
    let mut rooms = female_wing();
    rooms.push(Room::new("M-1", "H-KING", GenderPolicy::MaleOnly, false, 2));
    let (service, _, _) = build_service(rooms, female_cohort());

    let response = crate::workflows::allocation::router::override_handler::<_, MemoryAuditLog>(
        State(Arc::new(service)),
        axum::Json(OverrideRequest {
            applicant_id: applicant_id("S-1"),
            room_id: room_id("M-1"),
            operator: "warden.okafor".to_string(),
            reason: "requested".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "gender_mismatch");
}

#[tokio::test]
async fn override_route_creates_decision() {
    let (service, store, _) = build_service(
        female_wing(),
        vec![record("S-1", Gender::Female, 0.4)],
    );
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(post_json(
            "/api/v1/allocation/overrides",
            json!({
                "applicant_id": "S-1",
                "room_id": "F-102",
                "operator": "warden.okafor",
                "reason": "sibling in room"
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["decision"]["actor"]["kind"], "override");
    assert_eq!(payload["audit_incomplete"], false);
    assert_eq!(occupancy(store.as_ref(), "F-102"), 1);
}

#[tokio::test]
async fn override_for_unknown_applicant_is_not_found() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(post_json(
            "/api/v1/allocation/overrides",
            json!({
                "applicant_id": "S-404",
                "room_id": "F-101",
                "operator": "ops",
                "reason": "typo"
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn releasing_an_unhoused_applicant_conflicts() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(post_json(
            "/api/v1/allocation/releases",
            json!({
                "applicant_id": "S-1",
                "operator": "registry",
                "reason": "withdrew"
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retryable"], false);
}

#[tokio::test]
async fn applicant_history_routes_return_decisions_and_audit() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let service = Arc::new(service);
    service
        .run_cycle(CycleRequest::default())
        .expect("cycle runs");

    let decisions = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/applicants/S-2/decisions"))
        .await
        .expect("route executes");
    assert_eq!(decisions.status(), StatusCode::OK);
    let payload = read_json_body(decisions).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(1));
    assert_eq!(payload[0]["outcome"]["room_id"], "F-101");

    let audit = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/applicants/S-2/audit"))
        .await
        .expect("route executes");
    assert_eq!(audit.status(), StatusCode::OK);
    let payload = read_json_body(audit).await;
    let actions: Vec<_> = payload
        .as_array()
        .expect("array")
        .iter()
        .map(|entry| entry["action"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(actions, vec!["priority_calculated", "allocated"]);

    let cycle_audit = allocation_router(service)
        .oneshot(get("/api/v1/allocation/cycles/1/audit"))
        .await
        .expect("route executes");
    assert_eq!(cycle_audit.status(), StatusCode::OK);
    let payload = read_json_body(cycle_audit).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(11));
}

#[tokio::test]
async fn reporting_routes_list_cycles_statistics_and_waiting_list() {
    let mut records = female_cohort();
    records.push(record("S-6", Gender::Female, 0.60));
    let (service, _, _) = build_service(female_wing(), records);
    let service = Arc::new(service);
    service
        .run_cycle(CycleRequest::default())
        .expect("cycle runs");

    let cycles = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/cycles"))
        .await
        .expect("route executes");
    assert_eq!(cycles.status(), StatusCode::OK);
    let payload = read_json_body(cycles).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(1));
    assert_eq!(payload[0]["status"]["state"], "committed");

    let statistics = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/statistics"))
        .await
        .expect("route executes");
    assert_eq!(statistics.status(), StatusCode::OK);
    let payload = read_json_body(statistics).await;
    assert_eq!(payload["total_allocations"], 5);
    assert_eq!(payload["by_hostel"][HOSTEL]["occupied"], 5);
    assert_eq!(payload["applicants_by_status"]["waitlisted"], 1);
    assert!(payload["average_priority_score"].as_f64().unwrap_or_default() > 0.0);

    let waiting = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/waiting-list"))
        .await
        .expect("route executes");
    assert_eq!(waiting.status(), StatusCode::OK);
    let payload = read_json_body(waiting).await;
    assert_eq!(payload[0]["position"], 1);
    assert_eq!(payload[0]["applicant_id"], "S-6");
    assert_eq!(payload[0]["reason"], "room_full");

    let record = allocation_router(service)
        .oneshot(get("/api/v1/allocation/cycles/1"))
        .await
        .expect("route executes");
    let payload = read_json_body(record).await;
    assert_eq!(payload["summary"]["allocations_by_hostel"][HOSTEL], 5);
}

#[tokio::test]
async fn model_route_reports_the_installed_version() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(get("/api/v1/allocation/model"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["model_version"], GpaModel::VERSION);
    assert!(payload["installed_at"].is_string());
    assert!(payload["scoring"].is_object());
}

#[tokio::test]
async fn priority_preview_route_scores_or_rejects_features() {
    let (service, _, _) = build_service(female_wing(), female_cohort());
    let service = Arc::new(service);

    let scored = allocation_router(service.clone())
        .oneshot(post_json(
            "/api/v1/allocation/priority/preview",
            json!({
                "level": 400,
                "normalized_gpa": 0.75,
                "distance_km": 300.0,
                "gender": "male",
                "disability": true
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(scored.status(), StatusCode::OK);
    let payload = read_json_body(scored).await;
    assert_eq!(payload["model_version"], GpaModel::VERSION);
    assert!(payload["adjusted_score"].as_f64().unwrap_or_default() >= 75.0);

    let rejected = allocation_router(service)
        .oneshot(post_json(
            "/api/v1/allocation/priority/preview",
            json!({
                "level": 200,
                "normalized_gpa": 0.5,
                "distance_km": -4.0,
                "gender": "female"
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn applicant_priority_route_scores_stored_profiles() {
    let mut records = female_cohort();
    let mut incomplete = record("S-9", Gender::Female, 0.5);
    incomplete.level = None;
    records.push(incomplete);
    let (service, _, _) = build_service(female_wing(), records);
    let service = Arc::new(service);

    let scored = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/applicants/S-2/priority"))
        .await
        .expect("route executes");
    assert_eq!(scored.status(), StatusCode::OK);
    let payload = read_json_body(scored).await;
    assert_eq!(payload["applicant"]["id"], "S-2");

    let incomplete = allocation_router(service.clone())
        .oneshot(get("/api/v1/allocation/applicants/S-9/priority"))
        .await
        .expect("route executes");
    assert_eq!(incomplete.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(incomplete).await;
    assert_eq!(payload["code"], "incomplete_profile");

    let missing = allocation_router(service)
        .oneshot(get("/api/v1/allocation/applicants/S-404/priority"))
        .await
        .expect("route executes");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
