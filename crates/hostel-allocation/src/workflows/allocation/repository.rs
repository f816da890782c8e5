use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::audit::AuditEntry;
use super::decision::{
    Actor, AllocationCycle, AllocationDecision, CycleId, CycleKind, CycleParameters, DecisionId,
    DecisionOutcome,
};
use super::domain::{ApplicantId, ApplicantRecord, HostelId, Room, RoomId};
use super::inventory::InventorySnapshot;

/// Bed currently held by an applicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPlacement {
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub bed: u16,
    pub decision_id: DecisionId,
}

/// Decision awaiting commit; the store assigns its id and `supersedes` link.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDecision {
    pub applicant_id: ApplicantId,
    pub outcome: DecisionOutcome,
    pub actor: Actor,
    pub rationale: String,
    pub raw_score: Option<f64>,
    pub adjusted_score: Option<f64>,
    pub model_version: Option<String>,
}

/// All writes of one cycle, applied together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    pub cycle_id: CycleId,
    /// Room versions observed when the proposal was built.
    pub expected_versions: BTreeMap<RoomId, u64>,
    /// Placement each applicant held when the proposal was built; `None` means unhoused.
    pub expected_placements: BTreeMap<ApplicantId, Option<DecisionId>>,
    pub decisions: Vec<PendingDecision>,
}

/// Storage abstraction owning room occupancy, application status and decisions.
///
/// `commit` is the only write path for occupancy; implementations must apply a batch
/// atomically and reject it when any expected room version or applicant placement moved.
pub trait AllocationStore: Send + Sync {
    fn hostels(&self) -> Result<BTreeSet<HostelId>, StoreError>;
    fn applicants(&self) -> Result<Vec<ApplicantRecord>, StoreError>;
    fn applicant(&self, id: &ApplicantId) -> Result<Option<ApplicantRecord>, StoreError>;
    fn placement(&self, id: &ApplicantId) -> Result<Option<CurrentPlacement>, StoreError>;
    fn room(&self, id: &RoomId) -> Result<Option<(Room, u64)>, StoreError>;
    fn snapshot(&self, hostels: &BTreeSet<HostelId>) -> Result<InventorySnapshot, StoreError>;
    fn open_cycle(
        &self,
        kind: CycleKind,
        parameters: CycleParameters,
    ) -> Result<AllocationCycle, StoreError>;
    fn save_cycle(&self, cycle: &AllocationCycle) -> Result<(), StoreError>;
    fn cycle(&self, id: CycleId) -> Result<Option<AllocationCycle>, StoreError>;
    /// Every recorded cycle, newest first.
    fn cycles(&self) -> Result<Vec<AllocationCycle>, StoreError>;
    fn commit(&self, batch: CommitBatch) -> Result<Vec<AllocationDecision>, StoreError>;
    fn decisions_for(&self, applicant: &ApplicantId) -> Result<Vec<AllocationDecision>, StoreError>;
    fn decisions_in_cycle(&self, cycle: CycleId) -> Result<Vec<AllocationDecision>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("room {room_id} changed since snapshot: {detail}")]
    Conflict { room_id: RoomId, detail: String },
    #[error("placement of applicant {applicant_id} changed since snapshot: {detail}")]
    PlacementMoved {
        applicant_id: ApplicantId,
        detail: String,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("batch rejected: {0}")]
    Invalid(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::PlacementMoved { .. }
        )
    }
}

/// Append-only sink for audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entries: &[AuditEntry]) -> Result<(), AuditError>;
    fn by_cycle(&self, cycle: CycleId) -> Result<Vec<AuditEntry>, AuditError>;
    fn by_applicant(&self, applicant: &ApplicantId) -> Result<Vec<AuditEntry>, AuditError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}
