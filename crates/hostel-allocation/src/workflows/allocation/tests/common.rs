use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::allocation::audit::AuditEntry;
use crate::workflows::allocation::decision::{
    AllocationCycle, AllocationDecision, CycleId, CycleKind, CycleParameters, CycleStatus,
};
use crate::workflows::allocation::domain::{
    AcademicLevel, Applicant, ApplicantId, ApplicantRecord, ApplicationStatus, Gender,
    GenderPolicy, HostelId, Room, RoomId,
};
use crate::workflows::allocation::inventory::InventorySnapshot;
use crate::workflows::allocation::repository::{
    AllocationStore, AuditError, AuditSink, CommitBatch, CurrentPlacement, StoreError,
};
use crate::workflows::allocation::scoring::{
    FeatureSnapshot, ModelError, ModelScore, ScoredApplicant, ScoringModel,
};
use crate::workflows::allocation::service::{AllocationService, EngineSettings};
use crate::workflows::allocation::store::{MemoryAllocationStore, MemoryAuditLog};

pub(super) const HOSTEL: &str = "H-AMINA";

pub(super) fn submitted(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub(super) fn record(id: &str, gender: Gender, gpa: f64) -> ApplicantRecord {
    ApplicantRecord {
        id: ApplicantId(id.to_string()),
        level: Some(200),
        normalized_gpa: Some(gpa),
        distance_km: Some(120.0),
        gender: Some(gender),
        disability: false,
        financial_need: false,
        preferred_hostel: None,
        submitted_at: submitted(0),
        status: ApplicationStatus::Pending,
    }
}

pub(super) fn disabled_record(id: &str, gender: Gender, gpa: f64) -> ApplicantRecord {
    ApplicantRecord {
        disability: true,
        ..record(id, gender, gpa)
    }
}

pub(super) fn applicant(id: &str, gender: Gender, disability: bool) -> Applicant {
    Applicant {
        id: ApplicantId(id.to_string()),
        level: AcademicLevel(200),
        normalized_gpa: 0.6,
        distance_km: 120.0,
        gender,
        disability,
        financial_need: false,
        preferred_hostel: None,
        submitted_at: submitted(0),
    }
}

/// Scored applicant with explicit scores, bypassing any model.
pub(super) fn scored(applicant: Applicant, adjusted: f64, raw: f64) -> ScoredApplicant {
    ScoredApplicant {
        features: FeatureSnapshot::extract(&applicant, 500.0),
        applicant,
        raw_score: raw,
        seniority_adjustment: 0.0,
        priority_adjustment: adjusted - raw,
        adjusted_score: adjusted,
        confidence: 1.0,
        model_version: GpaModel::VERSION.to_string(),
    }
}

pub(super) fn room(id: &str, policy: GenderPolicy, accessible: bool, capacity: u16) -> Room {
    Room::new(id, HOSTEL, policy, accessible, capacity)
}

pub(super) fn snapshot(rooms: Vec<Room>) -> InventorySnapshot {
    let hostels = rooms.iter().map(|room| room.hostel_id.clone()).collect();
    InventorySnapshot::new(hostels, rooms.into_iter().map(|room| (room, 1)).collect())
}

pub(super) fn hostel(id: &str) -> HostelId {
    HostelId(id.to_string())
}

pub(super) fn room_id(id: &str) -> RoomId {
    RoomId(id.to_string())
}

pub(super) fn applicant_id(id: &str) -> ApplicantId {
    ApplicantId(id.to_string())
}

/// Three female-only rooms of two beds, the last one accessible.
pub(super) fn female_wing() -> Vec<Room> {
    vec![
        room("F-101", GenderPolicy::FemaleOnly, false, 2),
        room("F-102", GenderPolicy::FemaleOnly, false, 2),
        room("F-103", GenderPolicy::FemaleOnly, true, 2),
    ]
}

/// Five female applicants scoring 90, 85, 80, 75 and 70; the 80 is disability-flagged.
pub(super) fn female_cohort() -> Vec<ApplicantRecord> {
    vec![
        record("S-1", Gender::Female, 0.90),
        record("S-2", Gender::Female, 0.85),
        disabled_record("S-3", Gender::Female, 0.80),
        record("S-4", Gender::Female, 0.75),
        record("S-5", Gender::Female, 0.70),
    ]
}

/// Model scoring purely on normalised GPA so tests control the ranking.
#[derive(Debug, Default)]
pub(super) struct GpaModel;

impl GpaModel {
    pub(super) const VERSION: &'static str = "gpa_only_v1";
}

impl ScoringModel for GpaModel {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn score(&self, features: &FeatureSnapshot) -> Result<ModelScore, ModelError> {
        Ok(ModelScore {
            score: features.gpa_normalized * 100.0,
            confidence: 1.0,
        })
    }
}

/// Model that fails for applicants living beyond `limit_km`.
pub(super) struct DistanceLimitedModel {
    pub(super) limit_km: f64,
}

impl ScoringModel for DistanceLimitedModel {
    fn version(&self) -> &str {
        "distance_limited_v1"
    }

    fn score(&self, features: &FeatureSnapshot) -> Result<ModelScore, ModelError> {
        if features.distance_km > self.limit_km {
            return Err(ModelError::InvalidFeatures("distance out of range".to_string()));
        }
        Ok(ModelScore {
            score: features.gpa_normalized * 100.0,
            confidence: 0.5,
        })
    }
}

pub(super) fn gpa_settings() -> EngineSettings {
    EngineSettings {
        scoring_workers: 2,
        ..EngineSettings::default()
    }
}

pub(super) type MemoryService = AllocationService<MemoryAllocationStore, MemoryAuditLog>;

pub(super) fn build_service(
    rooms: Vec<Room>,
    records: Vec<ApplicantRecord>,
) -> (MemoryService, Arc<MemoryAllocationStore>, Arc<MemoryAuditLog>) {
    build_service_with(rooms, records, gpa_settings())
}

pub(super) fn build_service_with(
    rooms: Vec<Room>,
    records: Vec<ApplicantRecord>,
    settings: EngineSettings,
) -> (MemoryService, Arc<MemoryAllocationStore>, Arc<MemoryAuditLog>) {
    let store = Arc::new(MemoryAllocationStore::with_inventory(rooms, records));
    let audit = Arc::new(MemoryAuditLog::new());
    let service =
        AllocationService::with_model(store.clone(), audit.clone(), Arc::new(GpaModel), settings);
    (service, store, audit)
}

pub(super) fn occupancy(store: &impl AllocationStore, id: &str) -> u16 {
    store
        .room(&room_id(id))
        .expect("store readable")
        .map(|(room, _)| room.occupancy())
        .expect("room exists")
}

pub(super) fn version(store: &impl AllocationStore, id: &str) -> u64 {
    store
        .room(&room_id(id))
        .expect("store readable")
        .map(|(_, version)| version)
        .expect("room exists")
}

/// Audit sink that rejects every append.
#[derive(Default)]
pub(super) struct BrokenAuditSink;

impl AuditSink for BrokenAuditSink {
    fn append(&self, _entries: &[AuditEntry]) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("disk full".to_string()))
    }

    fn by_cycle(&self, _cycle: CycleId) -> Result<Vec<AuditEntry>, AuditError> {
        Err(AuditError::Unavailable("disk full".to_string()))
    }

    fn by_applicant(&self, _applicant: &ApplicantId) -> Result<Vec<AuditEntry>, AuditError> {
        Err(AuditError::Unavailable("disk full".to_string()))
    }
}

/// Store that lets facilities touch `room` right before the next `interferences` commits.
pub(super) struct InterferingStore {
    pub(super) inner: MemoryAllocationStore,
    pub(super) room: RoomId,
    pub(super) interferences: AtomicUsize,
}

impl InterferingStore {
    pub(super) fn new(rooms: Vec<Room>, records: Vec<ApplicantRecord>, room: &str) -> Self {
        Self {
            inner: MemoryAllocationStore::with_inventory(rooms, records),
            room: room_id(room),
            interferences: AtomicUsize::new(1),
        }
    }
}

impl AllocationStore for InterferingStore {
    fn hostels(&self) -> Result<BTreeSet<HostelId>, StoreError> {
        self.inner.hostels()
    }

    fn applicants(&self) -> Result<Vec<ApplicantRecord>, StoreError> {
        self.inner.applicants()
    }

    fn applicant(&self, id: &ApplicantId) -> Result<Option<ApplicantRecord>, StoreError> {
        self.inner.applicant(id)
    }

    fn placement(&self, id: &ApplicantId) -> Result<Option<CurrentPlacement>, StoreError> {
        self.inner.placement(id)
    }

    fn room(&self, id: &RoomId) -> Result<Option<(Room, u64)>, StoreError> {
        self.inner.room(id)
    }

    fn snapshot(&self, hostels: &BTreeSet<HostelId>) -> Result<InventorySnapshot, StoreError> {
        self.inner.snapshot(hostels)
    }

    fn open_cycle(
        &self,
        kind: CycleKind,
        parameters: CycleParameters,
    ) -> Result<AllocationCycle, StoreError> {
        self.inner.open_cycle(kind, parameters)
    }

    fn save_cycle(&self, cycle: &AllocationCycle) -> Result<(), StoreError> {
        self.inner.save_cycle(cycle)
    }

    fn cycle(&self, id: CycleId) -> Result<Option<AllocationCycle>, StoreError> {
        self.inner.cycle(id)
    }

    fn cycles(&self) -> Result<Vec<AllocationCycle>, StoreError> {
        self.inner.cycles()
    }

    fn commit(&self, batch: CommitBatch) -> Result<Vec<AllocationDecision>, StoreError> {
        let remaining = self.interferences.load(Ordering::SeqCst);
        if remaining > 0 {
            self.interferences.store(remaining - 1, Ordering::SeqCst);
            let (room, _) = self.inner.room(&self.room)?.expect("interfered room exists");
            self.inner.upsert_room(room)?;
        }
        self.inner.commit(batch)
    }

    fn decisions_for(
        &self,
        applicant: &ApplicantId,
    ) -> Result<Vec<AllocationDecision>, StoreError> {
        self.inner.decisions_for(applicant)
    }

    fn decisions_in_cycle(&self, cycle: CycleId) -> Result<Vec<AllocationDecision>, StoreError> {
        self.inner.decisions_in_cycle(cycle)
    }
}

/// Store whose cycle table goes read-only once a cycle reaches `committed`.
pub(super) struct ForgetfulStore {
    pub(super) inner: MemoryAllocationStore,
}

impl AllocationStore for ForgetfulStore {
    fn hostels(&self) -> Result<BTreeSet<HostelId>, StoreError> {
        self.inner.hostels()
    }

    fn applicants(&self) -> Result<Vec<ApplicantRecord>, StoreError> {
        self.inner.applicants()
    }

    fn applicant(&self, id: &ApplicantId) -> Result<Option<ApplicantRecord>, StoreError> {
        self.inner.applicant(id)
    }

    fn placement(&self, id: &ApplicantId) -> Result<Option<CurrentPlacement>, StoreError> {
        self.inner.placement(id)
    }

    fn room(&self, id: &RoomId) -> Result<Option<(Room, u64)>, StoreError> {
        self.inner.room(id)
    }

    fn snapshot(&self, hostels: &BTreeSet<HostelId>) -> Result<InventorySnapshot, StoreError> {
        self.inner.snapshot(hostels)
    }

    fn open_cycle(
        &self,
        kind: CycleKind,
        parameters: CycleParameters,
    ) -> Result<AllocationCycle, StoreError> {
        self.inner.open_cycle(kind, parameters)
    }

    fn save_cycle(&self, cycle: &AllocationCycle) -> Result<(), StoreError> {
        if cycle.status == CycleStatus::Committed {
            return Err(StoreError::Unavailable("cycle table locked".to_string()));
        }
        self.inner.save_cycle(cycle)
    }

    fn cycle(&self, id: CycleId) -> Result<Option<AllocationCycle>, StoreError> {
        self.inner.cycle(id)
    }

    fn cycles(&self) -> Result<Vec<AllocationCycle>, StoreError> {
        self.inner.cycles()
    }

    fn commit(&self, batch: CommitBatch) -> Result<Vec<AllocationDecision>, StoreError> {
        self.inner.commit(batch)
    }

    fn decisions_for(
        &self,
        applicant: &ApplicantId,
    ) -> Result<Vec<AllocationDecision>, StoreError> {
        self.inner.decisions_for(applicant)
    }

    fn decisions_in_cycle(&self, cycle: CycleId) -> Result<Vec<AllocationDecision>, StoreError> {
        self.inner.decisions_in_cycle(cycle)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
