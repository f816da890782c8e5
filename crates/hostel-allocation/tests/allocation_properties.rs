use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use hostel_allocation::workflows::allocation::{
    AllocationService, AllocationStore, ApplicantId, ApplicantRecord, ApplicationStatus,
    CycleRequest, DecisionOutcome, EngineSettings, Gender, GenderPolicy, MemoryAllocationStore,
    MemoryAuditLog, Room,
};

fn arb_policy() -> impl Strategy<Value = GenderPolicy> {
    prop_oneof![
        Just(GenderPolicy::MaleOnly),
        Just(GenderPolicy::FemaleOnly),
        Just(GenderPolicy::Mixed),
    ]
}

fn arb_gender() -> impl Strategy<Value = Gender> {
    prop_oneof![Just(Gender::Male), Just(Gender::Female)]
}

/// Rooms spread over two hostels, some partially occupied or closed.
fn arb_rooms() -> impl Strategy<Value = Vec<Room>> {
    prop::collection::vec(
        (arb_policy(), any::<bool>(), 1u16..=4, 0u16..=4, prop::bool::weighted(0.15)),
        1..8,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (policy, accessible, capacity, occupied, closed))| {
                let hostel = if index % 2 == 0 { "H-EAST" } else { "H-WEST" };
                let mut room =
                    Room::new(format!("R-{index:02}"), hostel, policy, accessible, capacity)
                        .with_occupancy(occupied);
                room.under_maintenance = closed;
                room
            })
            .collect()
    })
}

fn arb_applicants() -> impl Strategy<Value = Vec<ApplicantRecord>> {
    prop::collection::vec(
        (
            arb_gender(),
            prop::bool::weighted(0.2),
            0.0f64..=1.0,
            1u16..=5,
            0.0f64..900.0,
            0i64..120,
        ),
        0..24,
    )
    .prop_map(|specs| {
        let base = Utc
            .with_ymd_and_hms(2025, 8, 1, 9, 0, 0)
            .single()
            .expect("valid base timestamp");
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (gender, disability, gpa, level, distance, minutes))| ApplicantRecord {
                id: ApplicantId(format!("S-{index:03}")),
                level: Some(level * 100),
                normalized_gpa: Some(gpa),
                distance_km: Some(distance),
                gender: Some(gender),
                disability,
                financial_need: index % 3 == 0,
                preferred_hostel: None,
                submitted_at: base + Duration::minutes(minutes),
                status: ApplicationStatus::Pending,
            })
            .collect()
    })
}

fn service_for(
    rooms: Vec<Room>,
    records: Vec<ApplicantRecord>,
) -> (
    AllocationService<MemoryAllocationStore, MemoryAuditLog>,
    Arc<MemoryAllocationStore>,
) {
    let store = Arc::new(MemoryAllocationStore::with_inventory(rooms, records));
    let service = AllocationService::new(
        store.clone(),
        Arc::new(MemoryAuditLog::new()),
        EngineSettings::default(),
    );
    (service, store)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_cycles_respect_capacity_gender_and_accessibility(
        rooms in arb_rooms(),
        records in arb_applicants(),
    ) {
        let (service, store) = service_for(rooms, records.clone());
        let report = service.run_cycle(CycleRequest::default()).expect("cycle commits");

        let hostels = store.hostels().expect("hostels");
        let snapshot = store.snapshot(&hostels).expect("snapshot");
        for room in &snapshot.rooms {
            prop_assert!(room.occupancy() <= room.capacity);
        }

        for record in &records {
            let Some(placement) = store.placement(&record.id).expect("placement") else {
                continue;
            };
            let room = snapshot.room(&placement.room_id).expect("placed room exists");
            let gender = record.gender.expect("generated with gender");
            prop_assert!(room.gender_policy.accepts(gender));
            prop_assert!(!room.under_maintenance);
            if record.disability {
                prop_assert!(room.accessible);
            }
        }

        prop_assert_eq!(
            report.counts.allocated
                + report.counts.unallocated
                + report.counts.ineligible
                + report.counts.retained,
            report.counts.processed
        );
    }

    #[test]
    fn identical_inputs_yield_identical_decisions(
        rooms in arb_rooms(),
        records in arb_applicants(),
    ) {
        let outcomes = |rooms: Vec<Room>, records: Vec<ApplicantRecord>| {
            let (service, _) = service_for(rooms, records);
            service
                .run_cycle(CycleRequest::default())
                .expect("cycle commits")
                .decisions
                .into_iter()
                .map(|summary| (summary.applicant_id, summary.outcome))
                .collect::<Vec<(ApplicantId, DecisionOutcome)>>()
        };

        prop_assert_eq!(
            outcomes(rooms.clone(), records.clone()),
            outcomes(rooms, records)
        );
    }
}
