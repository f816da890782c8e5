use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::audit::AuditEntry;
use super::decision::{
    AllocationCycle, AllocationDecision, CycleId, CycleKind, CycleParameters, DecisionId,
    DecisionOutcome,
};
use super::domain::{ApplicantId, ApplicantRecord, ApplicationStatus, HostelId, Room, RoomId};
use super::inventory::InventorySnapshot;
use super::repository::{
    AllocationStore, AuditError, AuditSink, CommitBatch, CurrentPlacement, StoreError,
};

#[derive(Debug, Clone)]
struct VersionedRoom {
    room: Room,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    rooms: BTreeMap<RoomId, VersionedRoom>,
    applicants: BTreeMap<ApplicantId, ApplicantRecord>,
    placements: BTreeMap<ApplicantId, CurrentPlacement>,
    decisions: Vec<AllocationDecision>,
    cycles: BTreeMap<CycleId, AllocationCycle>,
    last_cycle: u64,
    last_decision: u64,
}

/// In-process allocation store guarded by a single mutex.
///
/// Every room carries a version bumped on each mutation so stale proposals are detected
/// at commit.
#[derive(Debug, Default)]
pub struct MemoryAllocationStore {
    state: Mutex<StoreState>,
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inventory(rooms: Vec<Room>, applicants: Vec<ApplicantRecord>) -> Self {
        let mut state = StoreState::default();
        for room in rooms {
            state
                .rooms
                .insert(room.id.clone(), VersionedRoom { room, version: 1 });
        }
        for applicant in applicants {
            state.applicants.insert(applicant.id.clone(), applicant);
        }

        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    /// Facilities hook: add a room or replace its definition, returning the new version.
    ///
    /// Occupancy is owned by the store: a replacement keeps the beds already taken and is
    /// refused when it would drop one of them or move an occupied room to another hostel.
    pub fn upsert_room(&self, mut room: Room) -> Result<u64, StoreError> {
        let mut state = self.state()?;
        let version = match state.rooms.get(&room.id) {
            Some(existing) => {
                let held = &existing.room.occupied_beds;
                if !held.is_empty() && existing.room.hostel_id != room.hostel_id {
                    return Err(StoreError::Invalid(format!(
                        "room {} still houses {} applicants in hostel {}",
                        room.id,
                        held.len(),
                        existing.room.hostel_id
                    )));
                }
                if let Some(bed) = held.iter().find(|bed| **bed > room.capacity) {
                    return Err(StoreError::Invalid(format!(
                        "capacity {} of room {} would drop occupied bed {bed}",
                        room.capacity, room.id
                    )));
                }
                room.occupied_beds = held.clone();
                existing.version + 1
            }
            None => {
                if let Some(bed) = room
                    .occupied_beds
                    .iter()
                    .find(|bed| **bed == 0 || **bed > room.capacity)
                {
                    return Err(StoreError::Invalid(format!(
                        "bed {bed} lies outside 1..={} in room {}",
                        room.capacity, room.id
                    )));
                }
                1
            }
        };
        state
            .rooms
            .insert(room.id.clone(), VersionedRoom { room, version });
        Ok(version)
    }

    /// Facilities hook: withdraw an empty room from the inventory.
    pub fn remove_room(&self, room_id: &RoomId) -> Result<Room, StoreError> {
        let mut state = self.state()?;
        let occupied = state
            .rooms
            .get(room_id)
            .map(|entry| entry.room.occupancy())
            .ok_or_else(|| StoreError::NotFound(format!("room {room_id}")))?;
        if occupied > 0 {
            return Err(StoreError::Invalid(format!(
                "room {room_id} still houses {occupied} applicants"
            )));
        }
        state
            .rooms
            .remove(room_id)
            .map(|entry| entry.room)
            .ok_or_else(|| StoreError::NotFound(format!("room {room_id}")))
    }

    /// Application-management hook: register or refresh an applicant record.
    pub fn insert_applicant(&self, record: ApplicantRecord) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.applicants.insert(record.id.clone(), record);
        Ok(())
    }
}

impl AllocationStore for MemoryAllocationStore {
    fn hostels(&self) -> Result<BTreeSet<HostelId>, StoreError> {
        let state = self.state()?;
        Ok(state
            .rooms
            .values()
            .map(|entry| entry.room.hostel_id.clone())
            .collect())
    }

    fn applicants(&self) -> Result<Vec<ApplicantRecord>, StoreError> {
        let state = self.state()?;
        Ok(state.applicants.values().cloned().collect())
    }

    fn applicant(&self, id: &ApplicantId) -> Result<Option<ApplicantRecord>, StoreError> {
        let state = self.state()?;
        Ok(state.applicants.get(id).cloned())
    }

    fn placement(&self, id: &ApplicantId) -> Result<Option<CurrentPlacement>, StoreError> {
        let state = self.state()?;
        Ok(state.placements.get(id).cloned())
    }

    fn room(&self, id: &RoomId) -> Result<Option<(Room, u64)>, StoreError> {
        let state = self.state()?;
        Ok(state
            .rooms
            .get(id)
            .map(|entry| (entry.room.clone(), entry.version)))
    }

    fn snapshot(&self, hostels: &BTreeSet<HostelId>) -> Result<InventorySnapshot, StoreError> {
        let state = self.state()?;
        let rooms = state
            .rooms
            .values()
            .filter(|entry| hostels.contains(&entry.room.hostel_id))
            .map(|entry| (entry.room.clone(), entry.version))
            .collect();
        Ok(InventorySnapshot::new(hostels.clone(), rooms)
            .with_placements(state.placements.clone()))
    }

    fn open_cycle(
        &self,
        kind: CycleKind,
        parameters: CycleParameters,
    ) -> Result<AllocationCycle, StoreError> {
        let mut state = self.state()?;
        state.last_cycle += 1;
        let cycle = AllocationCycle::new(CycleId(state.last_cycle), kind, parameters);
        state.cycles.insert(cycle.id, cycle.clone());
        Ok(cycle)
    }

    fn save_cycle(&self, cycle: &AllocationCycle) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.cycles.get_mut(&cycle.id) {
            Some(existing) => {
                *existing = cycle.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{}", cycle.id))),
        }
    }

    fn cycle(&self, id: CycleId) -> Result<Option<AllocationCycle>, StoreError> {
        let state = self.state()?;
        Ok(state.cycles.get(&id).cloned())
    }

    fn cycles(&self) -> Result<Vec<AllocationCycle>, StoreError> {
        let state = self.state()?;
        Ok(state.cycles.values().rev().cloned().collect())
    }

    fn commit(&self, batch: CommitBatch) -> Result<Vec<AllocationDecision>, StoreError> {
        let mut state = self.state()?;
        if !state.cycles.contains_key(&batch.cycle_id) {
            return Err(StoreError::NotFound(format!("{}", batch.cycle_id)));
        }

        for (room_id, expected) in &batch.expected_versions {
            match state.rooms.get(room_id) {
                None => {
                    return Err(StoreError::Conflict {
                        room_id: room_id.clone(),
                        detail: "room withdrawn".to_string(),
                    })
                }
                Some(entry) if entry.version != *expected => {
                    return Err(StoreError::Conflict {
                        room_id: room_id.clone(),
                        detail: format!("expected version {expected}, found {}", entry.version),
                    })
                }
                Some(_) => {}
            }
        }

        for (applicant_id, expected) in &batch.expected_placements {
            let held = state
                .placements
                .get(applicant_id)
                .map(|placement| placement.decision_id);
            if held != *expected {
                return Err(StoreError::PlacementMoved {
                    applicant_id: applicant_id.clone(),
                    detail: format!(
                        "expected {}, found {}",
                        held_label(*expected),
                        held_label(held)
                    ),
                });
            }
        }

        // Stage every write against copies; nothing touches `state` until all checks pass.
        let mut rooms: BTreeMap<RoomId, Room> = BTreeMap::new();
        let mut placements: BTreeMap<ApplicantId, Option<CurrentPlacement>> = BTreeMap::new();
        let mut statuses: BTreeMap<ApplicantId, ApplicationStatus> = BTreeMap::new();
        let mut committed = Vec::with_capacity(batch.decisions.len());
        let mut next_decision = state.last_decision;

        for pending in batch.decisions {
            if !state.applicants.contains_key(&pending.applicant_id) {
                return Err(StoreError::NotFound(format!(
                    "applicant {}",
                    pending.applicant_id
                )));
            }

            let current = match placements.get(&pending.applicant_id) {
                Some(staged) => staged.clone(),
                None => state.placements.get(&pending.applicant_id).cloned(),
            };
            next_decision += 1;
            let decision_id = DecisionId(next_decision);

            let supersedes = match &pending.outcome {
                DecisionOutcome::Allocated {
                    room_id,
                    hostel_id,
                    bed,
                } => {
                    if let Some(prior) = current.as_ref() {
                        guard_prior_room(
                            &batch.expected_versions,
                            &pending.applicant_id,
                            prior,
                        )?;
                        let room = stage_room(&mut rooms, &state, &prior.room_id)?;
                        room.occupied_beds.remove(&prior.bed);
                    }

                    let room = stage_room(&mut rooms, &state, room_id)?;
                    if &room.hostel_id != hostel_id {
                        return Err(StoreError::Invalid(format!(
                            "room {room_id} belongs to hostel {}, not {hostel_id}",
                            room.hostel_id
                        )));
                    }
                    if room.under_maintenance || *bed == 0 || *bed > room.capacity {
                        return Err(StoreError::Invalid(format!(
                            "bed {bed} in room {room_id} cannot be assigned"
                        )));
                    }
                    if !room.occupied_beds.insert(*bed) {
                        return Err(StoreError::Conflict {
                            room_id: room_id.clone(),
                            detail: format!("bed {bed} already taken"),
                        });
                    }

                    placements.insert(
                        pending.applicant_id.clone(),
                        Some(CurrentPlacement {
                            room_id: room_id.clone(),
                            hostel_id: hostel_id.clone(),
                            bed: *bed,
                            decision_id,
                        }),
                    );
                    statuses.insert(pending.applicant_id.clone(), ApplicationStatus::Allocated);
                    current.map(|prior| prior.decision_id)
                }
                DecisionOutcome::Unallocated { .. } => {
                    let status = if current.is_some() {
                        ApplicationStatus::Allocated
                    } else {
                        ApplicationStatus::Waitlisted
                    };
                    statuses.insert(pending.applicant_id.clone(), status);
                    None
                }
                DecisionOutcome::Released { room_id, bed } => {
                    let prior = current
                        .filter(|prior| &prior.room_id == room_id && prior.bed == *bed)
                        .ok_or_else(|| {
                            StoreError::Invalid(format!(
                                "applicant {} does not hold bed {bed} in room {room_id}",
                                pending.applicant_id
                            ))
                        })?;
                    guard_prior_room(&batch.expected_versions, &pending.applicant_id, &prior)?;
                    let room = stage_room(&mut rooms, &state, room_id)?;
                    room.occupied_beds.remove(bed);
                    placements.insert(pending.applicant_id.clone(), None);
                    statuses.insert(pending.applicant_id.clone(), ApplicationStatus::Pending);
                    Some(prior.decision_id)
                }
            };

            committed.push(AllocationDecision {
                id: decision_id,
                cycle_id: batch.cycle_id,
                applicant_id: pending.applicant_id,
                outcome: pending.outcome,
                actor: pending.actor,
                rationale: pending.rationale,
                supersedes,
                raw_score: pending.raw_score,
                adjusted_score: pending.adjusted_score,
                model_version: pending.model_version,
                decided_at: chrono::Utc::now(),
            });
        }

        for (room_id, room) in rooms {
            if let Some(entry) = state.rooms.get_mut(&room_id) {
                entry.room = room;
                entry.version += 1;
            }
        }
        for (applicant_id, placement) in placements {
            match placement {
                Some(placement) => {
                    state.placements.insert(applicant_id, placement);
                }
                None => {
                    state.placements.remove(&applicant_id);
                }
            }
        }
        for (applicant_id, status) in statuses {
            if let Some(record) = state.applicants.get_mut(&applicant_id) {
                record.status = status;
            }
        }
        state.last_decision = next_decision;
        state.decisions.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn decisions_for(
        &self,
        applicant: &ApplicantId,
    ) -> Result<Vec<AllocationDecision>, StoreError> {
        let state = self.state()?;
        Ok(state
            .decisions
            .iter()
            .filter(|decision| &decision.applicant_id == applicant)
            .cloned()
            .collect())
    }

    fn decisions_in_cycle(&self, cycle: CycleId) -> Result<Vec<AllocationDecision>, StoreError> {
        let state = self.state()?;
        Ok(state
            .decisions
            .iter()
            .filter(|decision| decision.cycle_id == cycle)
            .cloned()
            .collect())
    }
}

fn held_label(decision: Option<DecisionId>) -> String {
    match decision {
        Some(id) => format!("bed from {id}"),
        None => "no bed".to_string(),
    }
}

/// A bed may only be vacated by a batch that observed the version of its room.
fn guard_prior_room(
    expected_versions: &BTreeMap<RoomId, u64>,
    applicant_id: &ApplicantId,
    prior: &CurrentPlacement,
) -> Result<(), StoreError> {
    if expected_versions.contains_key(&prior.room_id) {
        return Ok(());
    }
    Err(StoreError::PlacementMoved {
        applicant_id: applicant_id.clone(),
        detail: format!("held bed in room {} lies outside the batch", prior.room_id),
    })
}

fn stage_room<'a>(
    staged: &'a mut BTreeMap<RoomId, Room>,
    state: &StoreState,
    room_id: &RoomId,
) -> Result<&'a mut Room, StoreError> {
    if !staged.contains_key(room_id) {
        let room = state
            .rooms
            .get(room_id)
            .map(|entry| entry.room.clone())
            .ok_or_else(|| StoreError::Conflict {
                room_id: room_id.clone(),
                detail: "room withdrawn".to_string(),
            })?;
        staged.insert(room_id.clone(), room);
    }
    staged
        .get_mut(room_id)
        .ok_or_else(|| StoreError::NotFound(format!("room {room_id}")))
}

/// In-process append-only audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| AuditError::Unavailable("audit lock poisoned".to_string()))
    }

    fn filtered(&self, keep: impl Fn(&AuditEntry) -> bool) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit lock poisoned".to_string()))?;
        Ok(entries.iter().filter(|entry| keep(entry)).cloned().collect())
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit lock poisoned".to_string()))?
            .extend_from_slice(entries);
        Ok(())
    }

    fn by_cycle(&self, cycle: CycleId) -> Result<Vec<AuditEntry>, AuditError> {
        self.filtered(|entry| entry.cycle_id == cycle)
    }

    fn by_applicant(&self, applicant: &ApplicantId) -> Result<Vec<AuditEntry>, AuditError> {
        self.filtered(|entry| entry.applicant_id.as_ref() == Some(applicant))
    }
}
