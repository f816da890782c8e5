use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::audit::{AuditEntry, AuditRecorder, ScoreSnapshot};
use super::constraints::ConstraintViolation;
use super::decision::{
    AbortReason, AllocationCycle, AllocationDecision, CycleCounts, CycleId, CycleKind,
    CycleParameters, CycleReport, CycleStatus, DecisionOutcome, DecisionSummary, Exclusion,
    ExclusionReason, WaitingListEntry,
};
use super::domain::{ApplicantId, ApplicantRecord, ApplicationStatus, Gender, HostelId, RoomId};
use super::eligibility::EligibilityFilter;
use super::inventory::{HostelLeases, LeaseUnavailable};
use super::matcher::{MatchError, MatchPlan, Matcher};
use super::repository::{AllocationStore, AuditError, AuditSink, StoreError};
use super::scoring::{
    ScoredApplicant, Scorer, ScoringError, ScoringModel, ScoringPolicy, WeightedRubricModel,
};
use super::statistics::{AllocationStatistics, RunSummary};
use super::transaction::{rationale, TransactionError, TransactionManager};

pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SCORING_WORKERS: usize = 4;

/// Engine-wide defaults; individual cycle requests may override the scoring policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub scoring: ScoringPolicy,
    pub reserve_accessible_rooms: bool,
    pub cycle_timeout: Duration,
    pub max_attempts: u32,
    pub scoring_workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            reserve_accessible_rooms: true,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scoring_workers: DEFAULT_SCORING_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub room_change: bool,
    #[serde(default)]
    pub hostels: Option<BTreeSet<HostelId>>,
    #[serde(default)]
    pub scoring: Option<ScoringPolicy>,
    #[serde(default)]
    pub reserve_accessible_rooms: Option<bool>,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub applicant_id: ApplicantId,
    pub room_id: RoomId,
    pub operator: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub applicant_id: ApplicantId,
    pub operator: String,
    pub reason: String,
}

/// A committed manual decision together with its audit state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionReceipt {
    pub decision: AllocationDecision,
    pub audit_incomplete: bool,
}

/// Cycle record with the decisions it committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    pub cycle: AllocationCycle,
    pub decisions: Vec<AllocationDecision>,
    pub summary: RunSummary,
}

/// Applicant features to score without touching the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityPreviewRequest {
    pub level: u16,
    pub normalized_gpa: f64,
    pub distance_km: f64,
    pub gender: Gender,
    #[serde(default)]
    pub disability: bool,
    #[serde(default)]
    pub financial_need: bool,
    #[serde(default)]
    pub scoring: Option<ScoringPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub model_version: String,
    pub installed_at: DateTime<Utc>,
    pub scoring: ScoringPolicy,
}

struct InstalledModel {
    model: Arc<dyn ScoringModel>,
    installed_at: DateTime<Utc>,
}

impl InstalledModel {
    fn new(model: Arc<dyn ScoringModel>) -> Self {
        Self {
            model,
            installed_at: Utc::now(),
        }
    }
}

/// Cooperative cancellation signal honoured up to the moment commit starts.
#[derive(Debug, Default)]
pub struct CancellationFlag(AtomicBool);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Error raised by the allocation service.
#[derive(Debug, thiserror::Error)]
pub enum AllocationServiceError {
    #[error(transparent)]
    LeaseUnavailable(#[from] LeaseUnavailable),
    #[error("{cycle_id} needs retry: {source}")]
    NeedsRetry { cycle_id: CycleId, source: StoreError },
    #[error("{cycle_id} aborted: {}", .reason.label())]
    Aborted { cycle_id: CycleId, reason: AbortReason },
    #[error("override rejected: {0}")]
    Constraint(#[from] ConstraintViolation),
    #[error("applicant {applicant_id} is not eligible: {}", .reason.summary())]
    Ineligible {
        applicant_id: ApplicantId,
        reason: ExclusionReason,
    },
    #[error("applicant {0} not found")]
    ApplicantNotFound(ApplicantId),
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("{0} not found")]
    CycleNotFound(CycleId),
    #[error("applicant {0} holds no bed-space")]
    NotAllocated(ApplicantId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl AllocationServiceError {
    /// Conflicts and lease contention clear up once the competing work finishes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AllocationServiceError::LeaseUnavailable(_)
                | AllocationServiceError::NeedsRetry { .. }
        )
    }
}

fn tally<'a>(codes: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for code in codes {
        *counts.entry(code.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Service composing the filter, scorer, matcher, transaction manager and audit recorder.
pub struct AllocationService<S, A> {
    store: Arc<S>,
    transactions: TransactionManager<S>,
    audit: AuditRecorder<A>,
    model: RwLock<InstalledModel>,
    leases: HostelLeases,
    filter: EligibilityFilter,
    settings: EngineSettings,
}

impl<S, A> AllocationService<S, A>
where
    S: AllocationStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(store: Arc<S>, audit: Arc<A>, settings: EngineSettings) -> Self {
        Self::with_model(store, audit, Arc::new(WeightedRubricModel::new()), settings)
    }

    pub fn with_model(
        store: Arc<S>,
        audit: Arc<A>,
        model: Arc<dyn ScoringModel>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transactions: TransactionManager::new(store.clone()),
            store,
            audit: AuditRecorder::new(audit),
            model: RwLock::new(InstalledModel::new(model)),
            leases: HostelLeases::default(),
            filter: EligibilityFilter,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Swap the scoring model; cycles already running keep the model they started with.
    pub fn install_model(&self, model: Arc<dyn ScoringModel>) {
        let version = model.version().to_string();
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = InstalledModel::new(model);
        info!(model_version = %version, "scoring model installed");
    }

    pub fn model_version(&self) -> String {
        self.model().version().to_string()
    }

    pub fn model_status(&self) -> ModelStatus {
        let installed = self.model.read().unwrap_or_else(PoisonError::into_inner);
        ModelStatus {
            model_version: installed.model.version().to_string(),
            installed_at: installed.installed_at,
            scoring: self.settings.scoring.clone(),
        }
    }

    fn model(&self) -> Arc<dyn ScoringModel> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .model
            .clone()
    }

    fn parameters(&self, request: &CycleRequest) -> CycleParameters {
        CycleParameters {
            scoring: request
                .scoring
                .clone()
                .unwrap_or_else(|| self.settings.scoring.clone()),
            room_change: request.room_change,
            reserve_accessible_rooms: request
                .reserve_accessible_rooms
                .unwrap_or(self.settings.reserve_accessible_rooms),
            hostels: request.hostels.clone(),
            session: request.session.clone(),
        }
    }

    pub fn run_cycle(&self, request: CycleRequest) -> Result<CycleReport, AllocationServiceError> {
        self.run_cycle_with(request, &CancellationFlag::default())
    }

    /// Run a cycle, retrying conflicts and lease contention with a fresh snapshot each time.
    pub fn run_cycle_with_retry(
        &self,
        request: CycleRequest,
    ) -> Result<CycleReport, AllocationServiceError> {
        let attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_cycle(request.clone()) {
                Err(error) if error.is_retryable() && attempt < attempts => {
                    warn!(attempt, attempts, error = %error, "allocation cycle will be retried");
                    thread::sleep(Duration::from_millis(5 * u64::from(attempt)));
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    pub fn run_cycle_with(
        &self,
        request: CycleRequest,
        cancel: &CancellationFlag,
    ) -> Result<CycleReport, AllocationServiceError> {
        let parameters = self.parameters(&request);
        let scope = match &parameters.hostels {
            Some(hostels) => hostels.clone(),
            None => self.store.hostels()?,
        };

        let _lease = if request.dry_run {
            None
        } else {
            Some(self.leases.acquire(&scope)?)
        };

        let mut cycle = if request.dry_run {
            AllocationCycle::new(CycleId::DRY_RUN, CycleKind::Batch, parameters.clone())
        } else {
            self.store.open_cycle(CycleKind::Batch, parameters.clone())?
        };
        let deadline = Instant::now() + self.settings.cycle_timeout;

        let snapshot = self.store.snapshot(&scope)?;
        let records = self.store.applicants()?;
        let currently_housed: BTreeSet<ApplicantId> = records
            .iter()
            .filter(|record| record.status == ApplicationStatus::Allocated)
            .map(|record| record.id.clone())
            .collect();

        let partition = self.filter.partition(&records, &snapshot, &parameters);
        let mut ineligible = partition.ineligible;

        let scorer = Scorer::new(self.model(), parameters.scoring.clone());
        let mut scored: Vec<ScoredApplicant> = Vec::with_capacity(partition.eligible.len());
        for (applicant_id, result) in
            scorer.score_batch(&partition.eligible, self.settings.scoring_workers)
        {
            match result {
                Ok(applicant) => scored.push(applicant),
                Err(error) => {
                    warn!(applicant_id = %applicant_id, error = %error, "scoring failed");
                    ineligible.push(Exclusion {
                        applicant_id,
                        reason: ExclusionReason::ScoringFailed {
                            detail: error.to_string(),
                        },
                    });
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(self.abort(cycle, AbortReason::TimedOut, request.dry_run));
        }

        let plan = match Matcher::new(parameters.reserve_accessible_rooms).run(
            scored,
            &snapshot,
            Some(deadline),
        ) {
            Ok(plan) => plan,
            Err(MatchError::DeadlineExceeded { matched }) => {
                warn!(cycle_id = %cycle.id, matched, "matcher ran past the cycle deadline");
                return Err(self.abort(cycle, AbortReason::TimedOut, request.dry_run));
            }
        };

        if cancel.is_cancelled() {
            return Err(self.abort(cycle, AbortReason::Cancelled, request.dry_run));
        }

        let allocated = plan.allocated_count();
        cycle.counts = CycleCounts {
            processed: records.len(),
            allocated,
            unallocated: plan.proposals.len() - allocated,
            ineligible: ineligible.len(),
            retained: plan.retained.len(),
        };

        if request.dry_run {
            cycle.finalize(CycleStatus::DryRun);
            info!(
                processed = cycle.counts.processed,
                allocated = cycle.counts.allocated,
                unallocated = cycle.counts.unallocated,
                ineligible = cycle.counts.ineligible,
                "dry-run allocation cycle finished"
            );
            return Ok(build_report(cycle, &plan, None, ineligible, &currently_housed));
        }

        let committed = match self.transactions.commit_plan(cycle.id, &plan, &snapshot) {
            Ok(committed) => committed,
            Err(TransactionError::Store(source)) if source.is_conflict() => {
                warn!(cycle_id = %cycle.id, error = %source, "allocation commit conflicted");
                cycle.finalize(CycleStatus::NeedsRetry);
                self.store.save_cycle(&cycle)?;
                return Err(AllocationServiceError::NeedsRetry {
                    cycle_id: cycle.id,
                    source,
                });
            }
            Err(error) => {
                warn!(cycle_id = %cycle.id, error = %error, "allocation commit failed");
                let reason = commit_abort_reason(&error);
                return Err(match error {
                    TransactionError::Store(source) => {
                        cycle.finalize(CycleStatus::Aborted { reason });
                        self.store.save_cycle(&cycle)?;
                        AllocationServiceError::Store(source)
                    }
                    TransactionError::Constraint { .. } => self.abort(cycle, reason, false),
                });
            }
        };

        cycle.finalize(CycleStatus::Committed);

        let mut entries = Vec::with_capacity(committed.len() * 2 + ineligible.len() + 1);
        for (proposal, decision) in plan.proposals.iter().zip(&committed) {
            entries.push(AuditEntry::priority_calculated(cycle.id, &proposal.scored));
            entries.push(AuditEntry::decision(
                decision,
                Some(ScoreSnapshot::from(&proposal.scored)),
            ));
        }
        entries.extend(
            plan.retained
                .iter()
                .map(|retained| AuditEntry::priority_calculated(cycle.id, &retained.scored)),
        );
        entries.extend(
            ineligible
                .iter()
                .map(|exclusion| AuditEntry::excluded(cycle.id, exclusion)),
        );
        entries.push(AuditEntry::cycle_completed(&cycle));
        cycle.audit_incomplete = self.audit.record(cycle.id, entries).incomplete;
        self.persist_committed(&cycle);

        info!(
            cycle_id = %cycle.id,
            processed = cycle.counts.processed,
            allocated = cycle.counts.allocated,
            unallocated = cycle.counts.unallocated,
            ineligible = cycle.counts.ineligible,
            audit_incomplete = cycle.audit_incomplete,
            "allocation cycle committed"
        );

        Ok(build_report(
            cycle,
            &plan,
            Some(&committed),
            ineligible,
            &currently_housed,
        ))
    }

    fn abort(
        &self,
        mut cycle: AllocationCycle,
        reason: AbortReason,
        dry_run: bool,
    ) -> AllocationServiceError {
        cycle.finalize(CycleStatus::Aborted { reason });
        warn!(cycle_id = %cycle.id, reason = reason.label(), "allocation cycle aborted");

        if !dry_run {
            if let Err(error) = self.store.save_cycle(&cycle) {
                warn!(cycle_id = %cycle.id, error = %error, "aborted cycle could not be saved");
            }
            cycle.audit_incomplete = self
                .audit
                .record(cycle.id, vec![AuditEntry::cycle_completed(&cycle)])
                .incomplete;
        }

        AllocationServiceError::Aborted {
            cycle_id: cycle.id,
            reason,
        }
    }

    /// Place an applicant in a specific room, bypassing the matcher but not the constraints.
    pub fn manual_override(
        &self,
        request: OverrideRequest,
    ) -> Result<DecisionReceipt, AllocationServiceError> {
        if request.operator.trim().is_empty() {
            return Err(AllocationServiceError::InvalidRequest(
                "operator is required".to_string(),
            ));
        }

        let record = self
            .store
            .applicant(&request.applicant_id)?
            .ok_or_else(|| {
                AllocationServiceError::ApplicantNotFound(request.applicant_id.clone())
            })?;
        let applicant = self.filter.profile(&record).map_err(|reason| {
            AllocationServiceError::Ineligible {
                applicant_id: record.id.clone(),
                reason,
            }
        })?;
        let (target, _) = self
            .store
            .room(&request.room_id)?
            .ok_or_else(|| AllocationServiceError::RoomNotFound(request.room_id.clone()))?;
        let current = self.store.placement(&applicant.id)?;
        if current.as_ref().map(|placement| &placement.room_id) == Some(&target.id) {
            return Err(AllocationServiceError::InvalidRequest(format!(
                "applicant {} already holds a bed in room {}",
                applicant.id, target.id
            )));
        }

        let mut scope = BTreeSet::from([target.hostel_id.clone()]);
        if let Some(prior) = current.as_ref() {
            scope.insert(prior.hostel_id.clone());
        }
        let _lease = self.leases.acquire(&scope)?;

        // Re-read under the lease so the version reflects every earlier commit.
        let (room, version) = self
            .store
            .room(&request.room_id)?
            .ok_or_else(|| AllocationServiceError::RoomNotFound(request.room_id.clone()))?;
        let mut cycle = self.store.open_cycle(
            CycleKind::Override,
            CycleParameters {
                scoring: self.settings.scoring.clone(),
                reserve_accessible_rooms: self.settings.reserve_accessible_rooms,
                hostels: Some(scope),
                ..CycleParameters::default()
            },
        )?;
        let scored = Scorer::new(self.model(), self.settings.scoring.clone())
            .score(&applicant)
            .ok();

        let outcome = self.transactions.commit_override(
            cycle.id,
            &applicant,
            &room,
            version,
            current.as_ref(),
            &request.operator,
            &request.reason,
            scored.as_ref(),
        );

        match outcome {
            Ok(decision) => {
                cycle.counts = CycleCounts {
                    processed: 1,
                    allocated: 1,
                    ..CycleCounts::default()
                };
                cycle.finalize(CycleStatus::Committed);
                let entries = vec![
                    AuditEntry::decision(&decision, scored.as_ref().map(ScoreSnapshot::from)),
                    AuditEntry::cycle_completed(&cycle),
                ];
                cycle.audit_incomplete = self.audit.record(cycle.id, entries).incomplete;
                self.persist_committed(&cycle);

                info!(
                    cycle_id = %cycle.id,
                    applicant_id = %decision.applicant_id,
                    operator = %request.operator,
                    "manual override committed"
                );
                Ok(DecisionReceipt {
                    decision,
                    audit_incomplete: cycle.audit_incomplete,
                })
            }
            Err(TransactionError::Constraint { violation, .. }) => {
                cycle.counts.processed = 1;
                cycle.finalize(CycleStatus::Aborted {
                    reason: AbortReason::Rejected,
                });
                let entries = vec![
                    AuditEntry::override_rejected(
                        cycle.id,
                        &applicant.id,
                        &request.operator,
                        format!("{}: {violation} ({})", violation.code(), request.reason),
                    ),
                    AuditEntry::cycle_completed(&cycle),
                ];
                cycle.audit_incomplete = self.audit.record(cycle.id, entries).incomplete;
                self.store.save_cycle(&cycle)?;

                warn!(
                    cycle_id = %cycle.id,
                    applicant_id = %applicant.id,
                    violation = violation.code(),
                    "manual override rejected"
                );
                Err(AllocationServiceError::Constraint(violation))
            }
            Err(TransactionError::Store(source)) => {
                self.finish_failed(&mut cycle, &source)?;
                Err(store_failure(cycle.id, source))
            }
        }
    }

    /// Free the bed-space held by an applicant.
    pub fn release(
        &self,
        request: ReleaseRequest,
    ) -> Result<DecisionReceipt, AllocationServiceError> {
        if request.operator.trim().is_empty() {
            return Err(AllocationServiceError::InvalidRequest(
                "operator is required".to_string(),
            ));
        }
        if self.store.applicant(&request.applicant_id)?.is_none() {
            return Err(AllocationServiceError::ApplicantNotFound(
                request.applicant_id,
            ));
        }

        let current = self
            .store
            .placement(&request.applicant_id)?
            .ok_or_else(|| AllocationServiceError::NotAllocated(request.applicant_id.clone()))?;
        let scope = BTreeSet::from([current.hostel_id.clone()]);
        let _lease = self.leases.acquire(&scope)?;

        let (_, version) = self
            .store
            .room(&current.room_id)?
            .ok_or_else(|| AllocationServiceError::RoomNotFound(current.room_id.clone()))?;
        let mut cycle = self.store.open_cycle(
            CycleKind::Release,
            CycleParameters {
                scoring: self.settings.scoring.clone(),
                reserve_accessible_rooms: self.settings.reserve_accessible_rooms,
                hostels: Some(scope),
                ..CycleParameters::default()
            },
        )?;

        match self.transactions.commit_release(
            cycle.id,
            &request.applicant_id,
            &current,
            version,
            &request.operator,
            &request.reason,
        ) {
            Ok(decision) => {
                cycle.counts.processed = 1;
                cycle.finalize(CycleStatus::Committed);
                let entries = vec![
                    AuditEntry::decision(&decision, None),
                    AuditEntry::cycle_completed(&cycle),
                ];
                cycle.audit_incomplete = self.audit.record(cycle.id, entries).incomplete;
                self.persist_committed(&cycle);

                info!(
                    cycle_id = %cycle.id,
                    applicant_id = %decision.applicant_id,
                    room_id = %current.room_id,
                    "bed-space released"
                );
                Ok(DecisionReceipt {
                    decision,
                    audit_incomplete: cycle.audit_incomplete,
                })
            }
            Err(TransactionError::Store(source)) => {
                self.finish_failed(&mut cycle, &source)?;
                Err(store_failure(cycle.id, source))
            }
            Err(TransactionError::Constraint { violation, .. }) => {
                Err(AllocationServiceError::Constraint(violation))
            }
        }
    }

    /// Record the final state of a cycle whose writes are already committed.
    ///
    /// The commit stands even when the cycle record cannot be updated.
    fn persist_committed(&self, cycle: &AllocationCycle) {
        if let Err(error) = self.store.save_cycle(cycle) {
            warn!(
                cycle_id = %cycle.id,
                error = %error,
                "committed cycle record could not be saved"
            );
        }
    }

    fn finish_failed(
        &self,
        cycle: &mut AllocationCycle,
        source: &StoreError,
    ) -> Result<(), StoreError> {
        let status = if source.is_conflict() {
            CycleStatus::NeedsRetry
        } else {
            CycleStatus::Aborted {
                reason: AbortReason::StoreUnavailable,
            }
        };
        cycle.finalize(status);
        self.store.save_cycle(cycle)
    }

    pub fn cycle(&self, cycle_id: CycleId) -> Result<CycleRecord, AllocationServiceError> {
        let cycle = self
            .store
            .cycle(cycle_id)?
            .ok_or(AllocationServiceError::CycleNotFound(cycle_id))?;
        let decisions = self.store.decisions_in_cycle(cycle_id)?;
        Ok(CycleRecord {
            summary: RunSummary::from_decisions(&decisions),
            cycle,
            decisions,
        })
    }

    pub fn cycles(&self) -> Result<Vec<AllocationCycle>, AllocationServiceError> {
        Ok(self.store.cycles()?)
    }

    /// Applicants currently waitlisted, ordered the way the matcher ranked them.
    pub fn waiting_list(&self) -> Result<Vec<WaitingListEntry>, AllocationServiceError> {
        let mut waiting = Vec::new();
        for record in self.store.applicants()? {
            if record.status != ApplicationStatus::Waitlisted {
                continue;
            }
            let latest = self
                .store
                .decisions_for(&record.id)?
                .into_iter()
                .rev()
                .find_map(|decision| match decision.outcome {
                    DecisionOutcome::Unallocated { reason } => Some((reason, decision)),
                    _ => None,
                });
            if let Some((reason, decision)) = latest {
                waiting.push((record, reason, decision));
            }
        }

        waiting.sort_by(|(left, _, left_decision), (right, _, right_decision)| {
            let score = |decision: &AllocationDecision| {
                (
                    decision.adjusted_score.unwrap_or(0.0),
                    decision.raw_score.unwrap_or(0.0),
                )
            };
            let (left_adjusted, left_raw) = score(left_decision);
            let (right_adjusted, right_raw) = score(right_decision);
            right_adjusted
                .total_cmp(&left_adjusted)
                .then_with(|| right_raw.total_cmp(&left_raw))
                .then_with(|| left.submitted_at.cmp(&right.submitted_at))
                .then_with(|| left.id.cmp(&right.id))
        });

        Ok(waiting
            .into_iter()
            .enumerate()
            .map(|(index, (record, reason, decision))| WaitingListEntry {
                position: index + 1,
                adjusted_score: decision.adjusted_score.unwrap_or(0.0),
                priority: record.disability,
                applicant_id: record.id,
                reason,
            })
            .collect())
    }

    pub fn statistics(&self) -> Result<AllocationStatistics, AllocationServiceError> {
        let snapshot = self.store.snapshot(&self.store.hostels()?)?;
        let records = self.store.applicants()?;

        let mut scores = Vec::with_capacity(snapshot.placements.len());
        for (applicant_id, placement) in &snapshot.placements {
            let score = self
                .store
                .decisions_for(applicant_id)?
                .into_iter()
                .find(|decision| decision.id == placement.decision_id)
                .and_then(|decision| decision.adjusted_score);
            scores.extend(score);
        }

        Ok(AllocationStatistics::collect(&snapshot, &records, &scores))
    }

    /// Score a stored applicant with the engine policy, without allocating anything.
    pub fn priority_for(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<ScoredApplicant, AllocationServiceError> {
        let record = self
            .store
            .applicant(applicant_id)?
            .ok_or_else(|| AllocationServiceError::ApplicantNotFound(applicant_id.clone()))?;
        let applicant = self.filter.profile(&record).map_err(|reason| {
            AllocationServiceError::Ineligible {
                applicant_id: record.id.clone(),
                reason,
            }
        })?;

        Ok(Scorer::new(self.model(), self.settings.scoring.clone()).score(&applicant)?)
    }

    /// Score a set of features as if they belonged to an applicant.
    pub fn preview_priority(
        &self,
        request: PriorityPreviewRequest,
    ) -> Result<ScoredApplicant, AllocationServiceError> {
        let record = ApplicantRecord {
            id: ApplicantId("preview".to_string()),
            level: Some(request.level),
            normalized_gpa: Some(request.normalized_gpa),
            distance_km: Some(request.distance_km),
            gender: Some(request.gender),
            disability: request.disability,
            financial_need: request.financial_need,
            preferred_hostel: None,
            submitted_at: Utc::now(),
            status: ApplicationStatus::Pending,
        };
        let applicant = self
            .filter
            .profile(&record)
            .map_err(|reason| AllocationServiceError::InvalidRequest(reason.summary()))?;
        let policy = request
            .scoring
            .unwrap_or_else(|| self.settings.scoring.clone());

        Ok(Scorer::new(self.model(), policy).score(&applicant)?)
    }

    pub fn decisions_for(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<AllocationDecision>, AllocationServiceError> {
        if self.store.applicant(applicant_id)?.is_none() {
            return Err(AllocationServiceError::ApplicantNotFound(
                applicant_id.clone(),
            ));
        }
        Ok(self.store.decisions_for(applicant_id)?)
    }

    pub fn audit_for_cycle(
        &self,
        cycle_id: CycleId,
    ) -> Result<Vec<AuditEntry>, AllocationServiceError> {
        if self.store.cycle(cycle_id)?.is_none() {
            return Err(AllocationServiceError::CycleNotFound(cycle_id));
        }
        Ok(self.audit.sink().by_cycle(cycle_id)?)
    }

    pub fn audit_for_applicant(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<AuditEntry>, AllocationServiceError> {
        Ok(self.audit.sink().by_applicant(applicant_id)?)
    }
}

pub(crate) fn commit_abort_reason(error: &TransactionError) -> AbortReason {
    match error {
        TransactionError::Constraint { .. } => AbortReason::ConstraintRecheck,
        TransactionError::Store(_) => AbortReason::StoreUnavailable,
    }
}

fn store_failure(cycle_id: CycleId, source: StoreError) -> AllocationServiceError {
    if source.is_conflict() {
        AllocationServiceError::NeedsRetry { cycle_id, source }
    } else {
        AllocationServiceError::Store(source)
    }
}

fn build_report(
    cycle: AllocationCycle,
    plan: &MatchPlan,
    committed: Option<&[AllocationDecision]>,
    ineligible: Vec<Exclusion>,
    currently_housed: &BTreeSet<ApplicantId>,
) -> CycleReport {
    let decisions: Vec<DecisionSummary> = plan
        .proposals
        .iter()
        .enumerate()
        .map(|(index, proposal)| {
            let committed = committed.and_then(|decisions| decisions.get(index));
            DecisionSummary {
                rank: proposal.rank,
                applicant_id: proposal.scored.applicant.id.clone(),
                adjusted_score: proposal.scored.adjusted_score,
                raw_score: proposal.scored.raw_score,
                outcome: match committed {
                    Some(decision) => decision.outcome.clone(),
                    None => match &proposal.placement {
                        Ok(placement) => DecisionOutcome::Allocated {
                            room_id: placement.room_id.clone(),
                            hostel_id: placement.hostel_id.clone(),
                            bed: placement.bed,
                        },
                        Err(reason) => DecisionOutcome::Unallocated { reason: *reason },
                    },
                },
                rationale: committed
                    .map(|decision| decision.rationale.clone())
                    .unwrap_or_else(|| rationale(proposal)),
                decision_id: committed.map(|decision| decision.id),
            }
        })
        .collect();

    let waiting_list = plan
        .proposals
        .iter()
        .filter(|proposal| !currently_housed.contains(&proposal.scored.applicant.id))
        .filter_map(|proposal| {
            proposal
                .placement
                .as_ref()
                .err()
                .map(|reason| (proposal, *reason))
        })
        .enumerate()
        .map(|(index, (proposal, reason))| WaitingListEntry {
            position: index + 1,
            applicant_id: proposal.scored.applicant.id.clone(),
            adjusted_score: proposal.scored.adjusted_score,
            priority: proposal.scored.applicant.disability,
            reason,
        })
        .collect();

    let unallocated_reasons = tally(
        plan.proposals
            .iter()
            .filter_map(|proposal| proposal.placement.as_ref().err())
            .map(|reason| reason.code()),
    );
    let ineligible_reasons = tally(ineligible.iter().map(|exclusion| exclusion.reason.code()));

    let retained = plan
        .retained
        .iter()
        .map(|retained| retained.scored.applicant.id.clone())
        .collect();

    CycleReport {
        counts: cycle.counts.clone(),
        audit_incomplete: cycle.audit_incomplete,
        cycle,
        decisions,
        unallocated_reasons,
        ineligible,
        ineligible_reasons,
        waiting_list,
        retained,
    }
}
