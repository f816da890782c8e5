use chrono::{DateTime, Duration, TimeZone, Utc};
use hostel_allocation::config::load_engine_settings;
use hostel_allocation::error::AppError;
use hostel_allocation::workflows::allocation::{
    AllocationService, ApplicantId, ApplicantRecord, ApplicationStatus, EngineSettings, Gender,
    GenderPolicy, HostelId, MemoryAllocationStore, MemoryAuditLog, Room,
};
use hostel_allocation::workflows::import;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type MemoryService = AllocationService<MemoryAllocationStore, MemoryAuditLog>;

pub(crate) fn build_service(
    rooms: Vec<Room>,
    records: Vec<ApplicantRecord>,
    settings: EngineSettings,
) -> (Arc<MemoryService>, Arc<MemoryAllocationStore>) {
    let store = Arc::new(MemoryAllocationStore::with_inventory(rooms, records));
    let service = Arc::new(AllocationService::new(
        store.clone(),
        Arc::new(MemoryAuditLog::new()),
        settings,
    ));
    (service, store)
}

/// Inventory and applicants from CSV when both paths are given, otherwise the sample campus.
pub(crate) fn load_inventory(
    rooms: Option<&Path>,
    applicants: Option<&Path>,
) -> Result<(Vec<Room>, Vec<ApplicantRecord>), AppError> {
    match (rooms, applicants) {
        (Some(rooms), Some(applicants)) => Ok((
            import::load_rooms(rooms)?,
            import::load_applicants(applicants)?,
        )),
        (Some(rooms), None) => Ok((import::load_rooms(rooms)?, Vec::new())),
        (None, Some(applicants)) => Ok((sample_rooms(), import::load_applicants(applicants)?)),
        (None, None) => Ok((sample_rooms(), sample_applicants())),
    }
}

pub(crate) fn engine_settings() -> Result<EngineSettings, AppError> {
    Ok(load_engine_settings()?)
}

/// Two hostels: Amina (female, one accessible room) and King (male and mixed).
pub(crate) fn sample_rooms() -> Vec<Room> {
    let mut rooms = vec![
        Room::new("A-101", "H-AMINA", GenderPolicy::FemaleOnly, false, 2),
        Room::new("A-102", "H-AMINA", GenderPolicy::FemaleOnly, false, 2).with_occupancy(1),
        Room::new("A-103", "H-AMINA", GenderPolicy::FemaleOnly, true, 2),
        Room::new("K-201", "H-KING", GenderPolicy::MaleOnly, false, 3),
        Room::new("K-202", "H-KING", GenderPolicy::MaleOnly, true, 1),
        Room::new("K-203", "H-KING", GenderPolicy::Mixed, false, 2),
    ];
    if let Some(room) = rooms.iter_mut().find(|room| room.id.0 == "K-203") {
        room.under_maintenance = true;
    }
    rooms
}

pub(crate) fn sample_applicants() -> Vec<ApplicantRecord> {
    let base = Utc
        .with_ymd_and_hms(2025, 8, 1, 9, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let applicant = |id: &str,
                     level: u16,
                     gpa: f64,
                     distance: f64,
                     gender: Gender,
                     disability: bool,
                     minutes: i64| ApplicantRecord {
        id: ApplicantId(id.to_string()),
        level: Some(level),
        normalized_gpa: Some(gpa),
        distance_km: Some(distance),
        gender: Some(gender),
        disability,
        financial_need: false,
        preferred_hostel: None,
        submitted_at: base + Duration::minutes(minutes),
        status: ApplicationStatus::Pending,
    };

    let mut records = vec![
        applicant("UG-1001", 400, 0.82, 310.0, Gender::Female, false, 0),
        applicant("UG-1002", 100, 0.91, 45.0, Gender::Female, false, 4),
        applicant("UG-1003", 200, 0.55, 120.0, Gender::Female, true, 9),
        applicant("UG-1004", 300, 0.74, 480.0, Gender::Female, false, 12),
        applicant("UG-1005", 500, 0.68, 220.0, Gender::Male, false, 2),
        applicant("UG-1006", 200, 0.77, 600.0, Gender::Male, false, 7),
        applicant("UG-1007", 100, 0.49, 15.0, Gender::Male, false, 15),
        applicant("UG-1008", 300, 0.88, 95.0, Gender::Male, false, 21),
        applicant("UG-1009", 200, 0.63, 140.0, Gender::Male, true, 30),
    ];
    records[1].preferred_hostel = Some(HostelId("H-AMINA".to_string()));
    records[6].financial_need = true;
    // Missing GPA keeps this applicant out of ranking.
    records.push(ApplicantRecord {
        normalized_gpa: None,
        ..applicant("UG-1010", 200, 0.0, 80.0, Gender::Female, false, 33)
    });
    records
}
