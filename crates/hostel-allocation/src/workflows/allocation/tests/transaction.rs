use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::common::*;
use crate::workflows::allocation::decision::{Actor, CycleKind, CycleParameters, DecisionOutcome};
use crate::workflows::allocation::domain::{
    ApplicationStatus, Gender, GenderPolicy, HostelId, Room,
};
use crate::workflows::allocation::inventory::InventorySnapshot;
use crate::workflows::allocation::matcher::{MatchPlan, Matcher};
use crate::workflows::allocation::repository::{
    AllocationStore, CommitBatch, PendingDecision, StoreError,
};
use crate::workflows::allocation::store::MemoryAllocationStore;
use crate::workflows::allocation::transaction::{TransactionError, TransactionManager};

fn hostels() -> BTreeSet<HostelId> {
    BTreeSet::from([hostel(HOSTEL)])
}

fn seeded_store() -> Arc<MemoryAllocationStore> {
    Arc::new(MemoryAllocationStore::with_inventory(
        female_wing(),
        vec![
            record("S-1", Gender::Female, 0.9),
            record("S-2", Gender::Female, 0.8),
        ],
    ))
}

fn plan_for(store: &MemoryAllocationStore) -> MatchPlan {
    let snapshot = store.snapshot(&hostels()).expect("snapshot");
    Matcher::new(true)
        .run(
            vec![
                scored(applicant("S-1", Gender::Female, false), 90.0, 90.0),
                scored(applicant("S-2", Gender::Female, false), 80.0, 80.0),
            ],
            &snapshot,
            None,
        )
        .expect("matched")
}

#[test]
fn commit_applies_every_placement_and_status() {
    let store = seeded_store();
    let manager = TransactionManager::new(store.clone());
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let snapshot = store.snapshot(&hostels()).expect("snapshot");
    let plan = plan_for(&store);

    let committed = manager
        .commit_plan(cycle.id, &plan, &snapshot)
        .expect("committed");

    assert_eq!(committed.len(), 2);
    assert!(committed[0].id < committed[1].id);
    assert_eq!(occupancy(store.as_ref(), "F-101"), 2);
    assert_eq!(version(store.as_ref(), "F-101"), 2);
    assert_eq!(version(store.as_ref(), "F-102"), 1);
    let record = store
        .applicant(&applicant_id("S-1"))
        .expect("readable")
        .expect("exists");
    assert_eq!(record.status, ApplicationStatus::Allocated);
    assert!(committed
        .iter()
        .all(|decision| decision.actor == Actor::Engine && decision.model_version.is_some()));
}

#[test]
fn stale_snapshot_aborts_the_whole_batch() {
    let store = seeded_store();
    let manager = TransactionManager::new(store.clone());
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let snapshot = store.snapshot(&hostels()).expect("snapshot");
    let plan = plan_for(&store);

    // Facilities touches an unrelated room in the same scope after the snapshot.
    let (touched, _) = store
        .room(&room_id("F-103"))
        .expect("readable")
        .expect("exists");
    store.upsert_room(touched).expect("upsert");

    let err = manager
        .commit_plan(cycle.id, &plan, &snapshot)
        .expect_err("conflict");

    assert!(err.is_conflict());
    assert_eq!(occupancy(store.as_ref(), "F-101"), 0);
    assert!(store
        .decisions_in_cycle(cycle.id)
        .expect("readable")
        .is_empty());
    let record = store
        .applicant(&applicant_id("S-1"))
        .expect("readable")
        .expect("exists");
    assert_eq!(record.status, ApplicationStatus::Pending);
}

#[test]
fn recheck_rejects_a_placement_that_breaks_a_hard_constraint() {
    let store = seeded_store();
    let manager = TransactionManager::new(store.clone());
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let snapshot = store.snapshot(&hostels()).expect("snapshot");
    let mut plan = plan_for(&store);

    // Push the second applicant onto a bed the first one already took.
    let first = plan.proposals[0]
        .placement
        .clone()
        .expect("first applicant placed");
    plan.proposals[1].placement = Ok(first);

    let err = manager
        .commit_plan(cycle.id, &plan, &snapshot)
        .expect_err("re-check fails");

    assert!(matches!(err, TransactionError::Constraint { .. }));
    assert_eq!(occupancy(store.as_ref(), "F-101"), 0);
}

#[test]
fn room_change_frees_the_prior_bed_and_supersedes_the_decision() {
    let store = seeded_store();
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let first = store
        .commit(CommitBatch {
            cycle_id: cycle.id,
            expected_versions: Default::default(),
            expected_placements: BTreeMap::from([(applicant_id("S-1"), None)]),
            decisions: vec![PendingDecision {
                applicant_id: applicant_id("S-1"),
                outcome: DecisionOutcome::Allocated {
                    room_id: room_id("F-101"),
                    hostel_id: hostel(HOSTEL),
                    bed: 1,
                },
                actor: Actor::Engine,
                rationale: "initial".to_string(),
                raw_score: None,
                adjusted_score: None,
                model_version: None,
            }],
        })
        .expect("committed");

    let moved = store
        .commit(CommitBatch {
            cycle_id: cycle.id,
            expected_versions: BTreeMap::from([
                (room_id("F-101"), version(store.as_ref(), "F-101")),
                (room_id("F-102"), version(store.as_ref(), "F-102")),
            ]),
            expected_placements: BTreeMap::from([(applicant_id("S-1"), Some(first[0].id))]),
            decisions: vec![PendingDecision {
                applicant_id: applicant_id("S-1"),
                outcome: DecisionOutcome::Allocated {
                    room_id: room_id("F-102"),
                    hostel_id: hostel(HOSTEL),
                    bed: 2,
                },
                actor: Actor::Engine,
                rationale: "room change".to_string(),
                raw_score: None,
                adjusted_score: None,
                model_version: None,
            }],
        })
        .expect("committed");

    assert_eq!(moved[0].supersedes, Some(first[0].id));
    assert_eq!(occupancy(store.as_ref(), "F-101"), 0);
    assert_eq!(occupancy(store.as_ref(), "F-102"), 1);
    let placement = store
        .placement(&applicant_id("S-1"))
        .expect("readable")
        .expect("placed");
    assert_eq!(placement.bed, 2);
}

#[test]
fn taken_bed_is_reported_as_conflict() {
    let store = Arc::new(MemoryAllocationStore::with_inventory(
        vec![room("X-1", GenderPolicy::Mixed, false, 2).with_occupancy(1)],
        vec![record("S-1", Gender::Male, 0.5)],
    ));
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");

    let err = store
        .commit(CommitBatch {
            cycle_id: cycle.id,
            expected_versions: Default::default(),
            expected_placements: Default::default(),
            decisions: vec![PendingDecision {
                applicant_id: applicant_id("S-1"),
                outcome: DecisionOutcome::Allocated {
                    room_id: room_id("X-1"),
                    hostel_id: hostel(HOSTEL),
                    bed: 1,
                },
                actor: Actor::Engine,
                rationale: "stale".to_string(),
                raw_score: None,
                adjusted_score: None,
                model_version: None,
            }],
        })
        .expect_err("bed taken");

    assert!(err.is_conflict());
    assert_eq!(occupancy(store.as_ref(), "X-1"), 1);
}

#[test]
fn facilities_hooks_guard_occupied_rooms_and_register_applicants() {
    let store = seeded_store();
    let manager = TransactionManager::new(store.clone());
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let snapshot = store.snapshot(&hostels()).expect("snapshot");
    manager
        .commit_plan(cycle.id, &plan_for(&store), &snapshot)
        .expect("committed");

    assert!(store.remove_room(&room_id("F-101")).is_err());
    let removed = store.remove_room(&room_id("F-102")).expect("empty room removed");
    assert_eq!(removed.id, room_id("F-102"));
    assert!(store.room(&room_id("F-102")).expect("readable").is_none());

    store
        .insert_applicant(record("S-9", Gender::Female, 0.5))
        .expect("registered");
    let registered = store
        .applicant(&applicant_id("S-9"))
        .expect("readable")
        .expect("exists");
    assert_eq!(registered.status, ApplicationStatus::Pending);
}

fn pending_move(applicant: &str, room: &str, hostel_id: &str, bed: u16) -> PendingDecision {
    PendingDecision {
        applicant_id: applicant_id(applicant),
        outcome: DecisionOutcome::Allocated {
            room_id: room_id(room),
            hostel_id: hostel(hostel_id),
            bed,
        },
        actor: Actor::Engine,
        rationale: "room change".to_string(),
        raw_score: None,
        adjusted_score: None,
        model_version: None,
    }
}

/// One single-bed room in each of two hostels, and one unhoused applicant.
fn split_campus() -> Arc<MemoryAllocationStore> {
    Arc::new(MemoryAllocationStore::with_inventory(
        vec![
            Room::new("A-1", "H-EAST", GenderPolicy::Mixed, false, 1),
            Room::new("B-1", "H-WEST", GenderPolicy::Mixed, false, 1),
        ],
        vec![record("X", Gender::Male, 0.7)],
    ))
}

#[test]
fn cycles_over_disjoint_hostels_cannot_house_the_same_applicant_twice() {
    let store = split_campus();
    let manager = TransactionManager::new(store.clone());
    let east = store
        .snapshot(&BTreeSet::from([hostel("H-EAST")]))
        .expect("snapshot");
    let west = store
        .snapshot(&BTreeSet::from([hostel("H-WEST")]))
        .expect("snapshot");
    let plan = |snapshot: &InventorySnapshot| {
        Matcher::new(true)
            .run(
                vec![scored(applicant("X", Gender::Male, false), 70.0, 70.0)],
                snapshot,
                None,
            )
            .expect("matched")
    };
    let east_plan = plan(&east);
    let west_plan = plan(&west);
    let first = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let second = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");

    manager
        .commit_plan(first.id, &east_plan, &east)
        .expect("east commits");
    let err = manager
        .commit_plan(second.id, &west_plan, &west)
        .expect_err("applicant already housed");

    assert!(err.is_conflict());
    assert_eq!(occupancy(store.as_ref(), "A-1"), 1);
    assert_eq!(occupancy(store.as_ref(), "B-1"), 0);
    assert!(store
        .decisions_in_cycle(second.id)
        .expect("readable")
        .is_empty());
}

#[test]
fn moving_out_of_a_room_the_batch_never_observed_is_refused() {
    let store = split_campus();
    let cycle = store
        .open_cycle(CycleKind::Batch, CycleParameters::default())
        .expect("cycle opened");
    let housed = store
        .commit(CommitBatch {
            cycle_id: cycle.id,
            expected_versions: BTreeMap::from([(room_id("A-1"), 1)]),
            expected_placements: BTreeMap::from([(applicant_id("X"), None)]),
            decisions: vec![pending_move("X", "A-1", "H-EAST", 1)],
        })
        .expect("housed");

    let err = store
        .commit(CommitBatch {
            cycle_id: cycle.id,
            expected_versions: BTreeMap::from([(room_id("B-1"), 1)]),
            expected_placements: BTreeMap::from([(applicant_id("X"), Some(housed[0].id))]),
            decisions: vec![pending_move("X", "B-1", "H-WEST", 1)],
        })
        .expect_err("prior room outside the batch");

    assert!(matches!(err, StoreError::PlacementMoved { .. }));
    assert!(err.is_conflict());
    assert_eq!(occupancy(store.as_ref(), "A-1"), 1);
    assert_eq!(occupancy(store.as_ref(), "B-1"), 0);
}

#[test]
fn room_definitions_cannot_shrink_below_occupied_beds() {
    let store = Arc::new(MemoryAllocationStore::with_inventory(
        vec![room("X-1", GenderPolicy::Mixed, false, 3).with_occupancy(2)],
        Vec::new(),
    ));

    let err = store
        .upsert_room(room("X-1", GenderPolicy::Mixed, false, 1))
        .expect_err("bed 2 would be dropped");

    assert!(matches!(err, StoreError::Invalid(_)));
    assert_eq!(occupancy(store.as_ref(), "X-1"), 2);
    assert_eq!(version(store.as_ref(), "X-1"), 1);
}

#[test]
fn room_definitions_keep_the_beds_the_store_holds() {
    let store = Arc::new(MemoryAllocationStore::with_inventory(
        vec![room("X-1", GenderPolicy::Mixed, false, 2).with_occupancy(1)],
        Vec::new(),
    ));

    let version = store
        .upsert_room(room("X-1", GenderPolicy::Mixed, true, 4))
        .expect("widened");

    assert_eq!(version, 2);
    let (stored, _) = store
        .room(&room_id("X-1"))
        .expect("readable")
        .expect("exists");
    assert_eq!(stored.capacity, 4);
    assert!(stored.accessible);
    assert_eq!(stored.occupied_beds, BTreeSet::from([1]));
}

#[test]
fn new_rooms_with_out_of_range_beds_are_rejected() {
    let store = seeded_store();

    let mut phantom = room("X-9", GenderPolicy::Mixed, false, 2);
    phantom.occupied_beds = BTreeSet::from([3]);

    let err = store.upsert_room(phantom).expect_err("bed 3 does not exist");

    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(store.room(&room_id("X-9")).expect("readable").is_none());
}
