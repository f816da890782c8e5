use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::constraints::{check_assignment, ConstraintViolation};
use super::decision::{Actor, AllocationDecision, CycleId, DecisionOutcome};
use super::domain::{Applicant, ApplicantId, Room, RoomId};
use super::inventory::InventorySnapshot;
use super::matcher::{MatchPlan, ProposedDecision};
use super::repository::{
    AllocationStore, CommitBatch, CurrentPlacement, PendingDecision, StoreError,
};
use super::scoring::ScoredApplicant;

/// Error raised while turning a proposal into committed decisions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("applicant {applicant_id} failed re-check: {violation}")]
    Constraint {
        applicant_id: String,
        violation: ConstraintViolation,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransactionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionError::Store(error) if error.is_conflict())
    }
}

pub(crate) fn rationale(proposal: &ProposedDecision) -> String {
    let applicant = &proposal.scored.applicant;
    match &proposal.placement {
        Ok(placement) => {
            let preferred = applicant.preferred_hostel.as_ref() == Some(&placement.hostel_id);
            format!(
                "rank {}: allocated bed {} in room {} of hostel {}{}",
                proposal.rank,
                placement.bed,
                placement.room_id,
                placement.hostel_id,
                if preferred { " (preferred hostel)" } else { "" }
            )
        }
        Err(reason) => format!("rank {}: {}", proposal.rank, reason.summary()),
    }
}

fn scored_fields(scored: Option<&ScoredApplicant>) -> (Option<f64>, Option<f64>, Option<String>) {
    match scored {
        Some(scored) => (
            Some(scored.raw_score),
            Some(scored.adjusted_score),
            Some(scored.model_version.clone()),
        ),
        None => (None, None, None),
    }
}

/// Sole writer of occupancy, application status and decisions.
pub struct TransactionManager<S> {
    store: Arc<S>,
}

impl<S> TransactionManager<S>
where
    S: AllocationStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Re-check every placement against the snapshot and commit the plan in one batch.
    pub fn commit_plan(
        &self,
        cycle_id: CycleId,
        plan: &MatchPlan,
        snapshot: &InventorySnapshot,
    ) -> Result<Vec<AllocationDecision>, TransactionError> {
        let mut rooms: BTreeMap<RoomId, Room> = snapshot
            .rooms
            .iter()
            .map(|room| (room.id.clone(), room.clone()))
            .collect();
        let mut decisions = Vec::with_capacity(plan.proposals.len());
        let mut expected_placements = BTreeMap::new();

        for proposal in &plan.proposals {
            let applicant = &proposal.scored.applicant;
            expected_placements.insert(
                applicant.id.clone(),
                snapshot.expected_placement(&applicant.id),
            );
            let outcome = match &proposal.placement {
                Ok(placement) => {
                    let room = rooms.get_mut(&placement.room_id).ok_or_else(|| {
                        StoreError::Conflict {
                            room_id: placement.room_id.clone(),
                            detail: "room missing from snapshot".to_string(),
                        }
                    })?;
                    let bed = check_assignment(applicant, room, Some(placement.bed)).map_err(
                        |violation| TransactionError::Constraint {
                            applicant_id: applicant.id.0.clone(),
                            violation,
                        },
                    )?;
                    room.occupied_beds.insert(bed);
                    DecisionOutcome::Allocated {
                        room_id: placement.room_id.clone(),
                        hostel_id: placement.hostel_id.clone(),
                        bed,
                    }
                }
                Err(reason) => DecisionOutcome::Unallocated { reason: *reason },
            };

            let (raw_score, adjusted_score, model_version) = scored_fields(Some(&proposal.scored));
            decisions.push(PendingDecision {
                applicant_id: applicant.id.clone(),
                outcome,
                actor: Actor::Engine,
                rationale: rationale(proposal),
                raw_score,
                adjusted_score,
                model_version,
            });
        }

        let batch = CommitBatch {
            cycle_id,
            expected_versions: snapshot.versions.clone(),
            expected_placements,
            decisions,
        };
        let committed = self.store.commit(batch)?;
        debug!(cycle_id = %cycle_id, decisions = committed.len(), "cycle batch committed");
        Ok(committed)
    }

    /// Place `applicant` in `room` on an operator's authority, freeing any bed they held.
    #[allow(clippy::too_many_arguments)]
    pub fn commit_override(
        &self,
        cycle_id: CycleId,
        applicant: &Applicant,
        room: &Room,
        room_version: u64,
        current: Option<&CurrentPlacement>,
        operator: &str,
        reason: &str,
        scored: Option<&ScoredApplicant>,
    ) -> Result<AllocationDecision, TransactionError> {
        let bed = check_assignment(applicant, room, None).map_err(|violation| {
            TransactionError::Constraint {
                applicant_id: applicant.id.0.clone(),
                violation,
            }
        })?;

        let mut expected_versions = BTreeMap::new();
        expected_versions.insert(room.id.clone(), room_version);
        if let Some(prior) = current {
            if let Some((_, version)) = self.store.room(&prior.room_id)? {
                expected_versions.entry(prior.room_id.clone()).or_insert(version);
            }
        }

        let (raw_score, adjusted_score, model_version) = scored_fields(scored);
        let rationale = match current {
            Some(prior) => format!(
                "override by {operator}: {reason} (moved from room {} bed {})",
                prior.room_id, prior.bed
            ),
            None => format!("override by {operator}: {reason}"),
        };

        let batch = CommitBatch {
            cycle_id,
            expected_versions,
            expected_placements: BTreeMap::from([(
                applicant.id.clone(),
                current.map(|prior| prior.decision_id),
            )]),
            decisions: vec![PendingDecision {
                applicant_id: applicant.id.clone(),
                outcome: DecisionOutcome::Allocated {
                    room_id: room.id.clone(),
                    hostel_id: room.hostel_id.clone(),
                    bed,
                },
                actor: Actor::Override {
                    operator: operator.to_string(),
                },
                rationale,
                raw_score,
                adjusted_score,
                model_version,
            }],
        };

        single(self.store.commit(batch)?)
    }

    /// Free the bed an applicant currently holds.
    pub fn commit_release(
        &self,
        cycle_id: CycleId,
        applicant_id: &ApplicantId,
        current: &CurrentPlacement,
        room_version: u64,
        operator: &str,
        reason: &str,
    ) -> Result<AllocationDecision, TransactionError> {
        let mut expected_versions = BTreeMap::new();
        expected_versions.insert(current.room_id.clone(), room_version);

        let batch = CommitBatch {
            cycle_id,
            expected_versions,
            expected_placements: BTreeMap::from([(
                applicant_id.clone(),
                Some(current.decision_id),
            )]),
            decisions: vec![PendingDecision {
                applicant_id: applicant_id.clone(),
                outcome: DecisionOutcome::Released {
                    room_id: current.room_id.clone(),
                    bed: current.bed,
                },
                actor: Actor::Override {
                    operator: operator.to_string(),
                },
                rationale: format!("released by {operator}: {reason}"),
                raw_score: None,
                adjusted_score: None,
                model_version: None,
            }],
        };

        single(self.store.commit(batch)?)
    }
}

fn single(mut committed: Vec<AllocationDecision>) -> Result<AllocationDecision, TransactionError> {
    committed
        .pop()
        .ok_or_else(|| StoreError::Invalid("store returned no decision".to_string()).into())
}
