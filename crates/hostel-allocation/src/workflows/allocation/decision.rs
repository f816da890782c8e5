use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, HostelId, RoomId};
use super::scoring::ScoringPolicy;

/// Monotonic cycle identifier assigned by the store. Dry runs use [`CycleId::DRY_RUN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId(pub u64);

impl CycleId {
    pub const DRY_RUN: CycleId = CycleId(0);
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle-{:06}", self.0)
    }
}

/// Monotonic decision identifier assigned at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub u64);

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decision-{:06}", self.0)
    }
}

/// Who made a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Actor {
    Engine,
    Override { operator: String },
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Actor::Engine => "engine".to_string(),
            Actor::Override { operator } => format!("override:{operator}"),
        }
    }
}

/// Reason an eligible applicant did not receive a bed-space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnallocatedReason {
    NoAccessibleCapacity,
    RoomFull,
}

impl UnallocatedReason {
    pub const fn code(self) -> &'static str {
        match self {
            UnallocatedReason::NoAccessibleCapacity => "no_accessible_capacity",
            UnallocatedReason::RoomFull => "room_full",
        }
    }

    pub const fn summary(self) -> &'static str {
        match self {
            UnallocatedReason::NoAccessibleCapacity => "no accessible capacity",
            UnallocatedReason::RoomFull => "room full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionOutcome {
    Allocated {
        room_id: RoomId,
        hostel_id: HostelId,
        bed: u16,
    },
    Unallocated {
        reason: UnallocatedReason,
    },
    Released {
        room_id: RoomId,
        bed: u16,
    },
}

impl DecisionOutcome {
    pub fn is_allocated(&self) -> bool {
        matches!(self, DecisionOutcome::Allocated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DecisionOutcome::Allocated { .. } => "allocated",
            DecisionOutcome::Unallocated { .. } => "unallocated",
            DecisionOutcome::Released { .. } => "released",
        }
    }
}

/// Committed, immutable allocation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub id: DecisionId,
    pub cycle_id: CycleId,
    pub applicant_id: ApplicantId,
    pub outcome: DecisionOutcome,
    pub actor: Actor,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<DecisionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Why an applicant was kept out of a cycle's ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExclusionReason {
    IncompleteProfile { field: String, detail: String },
    AlreadyAllocated,
    NoMatchingInventory,
    ScoringFailed { detail: String },
}

impl ExclusionReason {
    pub fn code(&self) -> &'static str {
        match self {
            ExclusionReason::IncompleteProfile { .. } => "incomplete_profile",
            ExclusionReason::AlreadyAllocated => "already_allocated",
            ExclusionReason::NoMatchingInventory => "no_matching_inventory",
            ExclusionReason::ScoringFailed { .. } => "scoring_failed",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ExclusionReason::IncompleteProfile { field, detail } => {
                format!("incomplete profile: {field} {detail}")
            }
            ExclusionReason::AlreadyAllocated => "already allocated".to_string(),
            ExclusionReason::NoMatchingInventory => {
                "no room matches gender and accessibility requirement".to_string()
            }
            ExclusionReason::ScoringFailed { detail } => format!("scoring failed: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub applicant_id: ApplicantId,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Batch,
    Override,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    TimedOut,
    Cancelled,
    StoreUnavailable,
    /// A proposed placement failed the hard-constraint re-check before commit.
    ConstraintRecheck,
    /// A manual change failed the hard-constraint check.
    Rejected,
}

impl AbortReason {
    pub const fn label(self) -> &'static str {
        match self {
            AbortReason::TimedOut => "timed_out",
            AbortReason::Cancelled => "cancelled",
            AbortReason::StoreUnavailable => "store_unavailable",
            AbortReason::ConstraintRecheck => "constraint_recheck",
            AbortReason::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CycleStatus {
    Running,
    Committed,
    DryRun,
    NeedsRetry,
    Aborted { reason: AbortReason },
}

impl CycleStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CycleStatus::Running => "running",
            CycleStatus::Committed => "committed",
            CycleStatus::DryRun => "dry_run",
            CycleStatus::NeedsRetry => "needs_retry",
            CycleStatus::Aborted { reason } => reason.label(),
        }
    }
}

/// Terminal outcome counts for a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    pub processed: usize,
    pub allocated: usize,
    pub unallocated: usize,
    pub ineligible: usize,
    /// Room-change applicants who kept the bed they held.
    #[serde(default)]
    pub retained: usize,
}

/// Constraint parameters in force for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleParameters {
    pub scoring: ScoringPolicy,
    /// Allow already-allocated applicants to compete for a new room.
    pub room_change: bool,
    /// Keep accessible rooms for disability-flagged applicants only.
    pub reserve_accessible_rooms: bool,
    /// Restrict the cycle to these hostels; `None` covers the whole inventory.
    pub hostels: Option<BTreeSet<HostelId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Default for CycleParameters {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            room_change: false,
            reserve_accessible_rooms: true,
            hostels: None,
            session: None,
        }
    }
}

/// Record of one allocation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCycle {
    pub id: CycleId,
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub parameters: CycleParameters,
    pub status: CycleStatus,
    pub counts: CycleCounts,
    pub audit_incomplete: bool,
}

impl AllocationCycle {
    pub fn new(id: CycleId, kind: CycleKind, parameters: CycleParameters) -> Self {
        Self {
            id,
            kind,
            started_at: Utc::now(),
            finalized_at: None,
            parameters,
            status: CycleStatus::Running,
            counts: CycleCounts::default(),
            audit_incomplete: false,
        }
    }

    pub fn finalize(&mut self, status: CycleStatus) {
        self.status = status;
        self.finalized_at = Some(Utc::now());
    }
}

/// Rank-ordered position on the waiting list produced by a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingListEntry {
    pub position: usize,
    pub applicant_id: ApplicantId,
    pub adjusted_score: f64,
    pub priority: bool,
    pub reason: UnallocatedReason,
}

/// Per-applicant line of a cycle report; `decision_id` is empty for dry runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub rank: usize,
    pub applicant_id: ApplicantId,
    pub adjusted_score: f64,
    pub raw_score: f64,
    pub outcome: DecisionOutcome,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<DecisionId>,
}

/// What a caller gets back from `run_cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: AllocationCycle,
    pub counts: CycleCounts,
    pub decisions: Vec<DecisionSummary>,
    pub unallocated_reasons: BTreeMap<String, usize>,
    pub ineligible: Vec<Exclusion>,
    pub ineligible_reasons: BTreeMap<String, usize>,
    pub waiting_list: Vec<WaitingListEntry>,
    #[serde(default)]
    pub retained: Vec<ApplicantId>,
    pub audit_incomplete: bool,
}

impl CycleReport {
    pub fn decision_for(&self, applicant_id: &ApplicantId) -> Option<&DecisionSummary> {
        self.decisions
            .iter()
            .find(|summary| &summary.applicant_id == applicant_id)
    }

    pub fn allocated_room(&self, applicant_id: &ApplicantId) -> Option<&RoomId> {
        match self.decision_for(applicant_id).map(|summary| &summary.outcome) {
            Some(DecisionOutcome::Allocated { room_id, .. }) => Some(room_id),
            _ => None,
        }
    }
}
