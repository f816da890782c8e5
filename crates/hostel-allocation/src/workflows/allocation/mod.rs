//! Hostel allocation: priority scoring, eligibility filtering, constraint-checked matching,
//! atomic commit and an append-only audit trail.
//!
//! A cycle leases the hostels it touches, snapshots their rooms, filters and scores the
//! applicant pool, matches the ranked list against the snapshot, and commits the result in
//! one versioned batch. Manual overrides and releases skip the matcher but share the same
//! constraint checks, commit path and audit recorder.

pub mod audit;
pub mod constraints;
pub mod decision;
pub mod domain;
pub mod eligibility;
pub mod inventory;
pub mod matcher;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;
pub mod statistics;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod tests;

pub use audit::{AuditAction, AuditEntry, AuditRecorder, AuditReport, ScoreSnapshot};
pub use constraints::{check_assignment, ConstraintViolation};
pub use decision::{
    AbortReason, Actor, AllocationCycle, AllocationDecision, CycleCounts, CycleId, CycleKind,
    CycleParameters, CycleReport, CycleStatus, DecisionId, DecisionOutcome, DecisionSummary,
    Exclusion, ExclusionReason, UnallocatedReason, WaitingListEntry,
};
pub use domain::{
    AcademicLevel, Applicant, ApplicantId, ApplicantRecord, ApplicationStatus, BucketKey,
    Gender, GenderPolicy, HostelId, Room, RoomId,
};
pub use eligibility::{EligibilityFilter, EligibilityPartition};
pub use inventory::{HostelLease, HostelLeases, InventorySnapshot, LeaseUnavailable};
pub use matcher::{
    MatchError, MatchPlan, Matcher, Placement, ProposedDecision, RetainedPlacement,
};
pub use repository::{
    AllocationStore, AuditError, AuditSink, CommitBatch, CurrentPlacement, PendingDecision,
    StoreError,
};
pub use router::allocation_router;
pub use scoring::{
    FeatureSnapshot, ModelError, ModelScore, ScoredApplicant, Scorer, ScoringError,
    ScoringModel, ScoringPolicy, SeniorityBoost, SeniorityMode, WeightedRubricModel,
};
pub use service::{
    AllocationService, AllocationServiceError, CancellationFlag, CycleRecord, CycleRequest,
    DecisionReceipt, EngineSettings, ModelStatus, OverrideRequest, PriorityPreviewRequest,
    ReleaseRequest,
};
pub use statistics::{AllocationStatistics, HostelOccupancy, RunSummary};
pub use store::{MemoryAllocationStore, MemoryAuditLog};
pub use transaction::{TransactionError, TransactionManager};
