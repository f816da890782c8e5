use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::decision::{
    Actor, AllocationCycle, AllocationDecision, CycleId, DecisionId, DecisionOutcome, Exclusion,
};
use super::domain::ApplicantId;
use super::repository::AuditSink;
use super::scoring::{FeatureSnapshot, ScoredApplicant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PriorityCalculated,
    Allocated,
    Unallocated,
    Excluded,
    ManualOverride,
    OverrideRejected,
    Released,
    CycleCompleted,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::PriorityCalculated => "priority_calculated",
            AuditAction::Allocated => "allocated",
            AuditAction::Unallocated => "unallocated",
            AuditAction::Excluded => "excluded",
            AuditAction::ManualOverride => "manual_override",
            AuditAction::OverrideRejected => "override_rejected",
            AuditAction::Released => "released",
            AuditAction::CycleCompleted => "cycle_completed",
        }
    }
}

/// Inputs and outputs of the score that ranked an applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub features: FeatureSnapshot,
    pub raw_score: f64,
    pub seniority_adjustment: f64,
    pub priority_adjustment: f64,
    pub adjusted_score: f64,
    pub confidence: f64,
    pub model_version: String,
}

impl From<&ScoredApplicant> for ScoreSnapshot {
    fn from(scored: &ScoredApplicant) -> Self {
        Self {
            features: scored.features.clone(),
            raw_score: scored.raw_score,
            seniority_adjustment: scored.seniority_adjustment,
            priority_adjustment: scored.priority_adjustment,
            adjusted_score: scored.adjusted_score,
            confidence: scored.confidence,
            model_version: scored.model_version.clone(),
        }
    }
}

/// One append-only audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub cycle_id: CycleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_id: Option<ApplicantId>,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<DecisionId>,
    pub actor: Actor,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreSnapshot>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn priority_calculated(cycle_id: CycleId, scored: &ScoredApplicant) -> Self {
        Self {
            cycle_id,
            applicant_id: Some(scored.applicant.id.clone()),
            action: AuditAction::PriorityCalculated,
            decision_id: None,
            actor: Actor::Engine,
            detail: format!(
                "raw {:.2} adjusted {:.2} ({})",
                scored.raw_score, scored.adjusted_score, scored.model_version
            ),
            score: Some(ScoreSnapshot::from(scored)),
            recorded_at: Utc::now(),
        }
    }

    /// Entry for a committed decision; overrides are tagged as such whatever their outcome.
    pub fn decision(decision: &AllocationDecision, score: Option<ScoreSnapshot>) -> Self {
        let action = match (&decision.actor, &decision.outcome) {
            (Actor::Override { .. }, DecisionOutcome::Allocated { .. }) => {
                AuditAction::ManualOverride
            }
            (_, DecisionOutcome::Allocated { .. }) => AuditAction::Allocated,
            (_, DecisionOutcome::Unallocated { .. }) => AuditAction::Unallocated,
            (_, DecisionOutcome::Released { .. }) => AuditAction::Released,
        };

        Self {
            cycle_id: decision.cycle_id,
            applicant_id: Some(decision.applicant_id.clone()),
            action,
            decision_id: Some(decision.id),
            actor: decision.actor.clone(),
            detail: decision.rationale.clone(),
            score,
            recorded_at: Utc::now(),
        }
    }

    pub fn excluded(cycle_id: CycleId, exclusion: &Exclusion) -> Self {
        Self {
            cycle_id,
            applicant_id: Some(exclusion.applicant_id.clone()),
            action: AuditAction::Excluded,
            decision_id: None,
            actor: Actor::Engine,
            detail: format!("{}: {}", exclusion.reason.code(), exclusion.reason.summary()),
            score: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn override_rejected(
        cycle_id: CycleId,
        applicant_id: &ApplicantId,
        operator: &str,
        detail: String,
    ) -> Self {
        Self {
            cycle_id,
            applicant_id: Some(applicant_id.clone()),
            action: AuditAction::OverrideRejected,
            decision_id: None,
            actor: Actor::Override {
                operator: operator.to_string(),
            },
            detail,
            score: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn cycle_completed(cycle: &AllocationCycle) -> Self {
        Self {
            cycle_id: cycle.id,
            applicant_id: None,
            action: AuditAction::CycleCompleted,
            decision_id: None,
            actor: Actor::Engine,
            detail: format!(
                "{}: processed {} allocated {} unallocated {} ineligible {}",
                cycle.status.label(),
                cycle.counts.processed,
                cycle.counts.allocated,
                cycle.counts.unallocated,
                cycle.counts.ineligible
            ),
            score: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Outcome of handing a batch of entries to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub recorded: usize,
    pub incomplete: bool,
}

/// Writes audit entries without ever failing the caller.
pub struct AuditRecorder<A> {
    sink: Arc<A>,
}

impl<A> AuditRecorder<A>
where
    A: AuditSink + 'static,
{
    pub fn new(sink: Arc<A>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<A> {
        &self.sink
    }

    pub fn record(&self, cycle_id: CycleId, entries: Vec<AuditEntry>) -> AuditReport {
        if entries.is_empty() {
            return AuditReport {
                recorded: 0,
                incomplete: false,
            };
        }

        match self.sink.append(&entries) {
            Ok(()) => AuditReport {
                recorded: entries.len(),
                incomplete: false,
            },
            Err(error) => {
                warn!(
                    cycle_id = %cycle_id,
                    entries = entries.len(),
                    error = %error,
                    "audit sink rejected entries; cycle flagged audit_incomplete"
                );
                AuditReport {
                    recorded: 0,
                    incomplete: true,
                }
            }
        }
    }
}
