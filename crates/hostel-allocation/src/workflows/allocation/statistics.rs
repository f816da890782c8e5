use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::decision::{AllocationDecision, DecisionOutcome};
use super::domain::{ApplicantRecord, ApplicationStatus, HostelId};
use super::inventory::InventorySnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostelOccupancy {
    pub rooms: usize,
    pub capacity: u32,
    pub occupied: u32,
    pub under_maintenance: usize,
}

/// Campus-wide view of who is housed where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStatistics {
    pub total_allocations: usize,
    pub by_hostel: BTreeMap<HostelId, HostelOccupancy>,
    pub applicants_by_status: BTreeMap<String, usize>,
    pub waiting_list: usize,
    /// Mean adjusted score behind the current placements, 0 when nobody is housed.
    pub average_priority_score: f64,
}

impl AllocationStatistics {
    /// `placement_scores` holds the adjusted score of each current placement that has one.
    pub fn collect(
        snapshot: &InventorySnapshot,
        records: &[ApplicantRecord],
        placement_scores: &[f64],
    ) -> Self {
        let mut by_hostel: BTreeMap<HostelId, HostelOccupancy> = BTreeMap::new();
        for room in &snapshot.rooms {
            let entry = by_hostel.entry(room.hostel_id.clone()).or_default();
            entry.rooms += 1;
            entry.capacity += u32::from(room.capacity);
            entry.occupied += u32::from(room.occupancy());
            if room.under_maintenance {
                entry.under_maintenance += 1;
            }
        }

        let mut applicants_by_status = BTreeMap::new();
        for record in records {
            *applicants_by_status
                .entry(record.status.label().to_string())
                .or_insert(0) += 1;
        }

        Self {
            total_allocations: snapshot.placements.len(),
            by_hostel,
            waiting_list: records
                .iter()
                .filter(|record| record.status == ApplicationStatus::Waitlisted)
                .count(),
            applicants_by_status,
            average_priority_score: average(placement_scores.iter().copied()),
        }
    }
}

/// What one cycle handed out, by hostel, and the score level it reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub allocations_by_hostel: BTreeMap<HostelId, usize>,
    pub average_priority_score: f64,
}

impl RunSummary {
    pub fn from_decisions(decisions: &[AllocationDecision]) -> Self {
        let mut allocations_by_hostel = BTreeMap::new();
        let mut scores = Vec::new();
        for decision in decisions {
            if let DecisionOutcome::Allocated { hostel_id, .. } = &decision.outcome {
                *allocations_by_hostel.entry(hostel_id.clone()).or_insert(0) += 1;
                scores.extend(decision.adjusted_score);
            }
        }

        Self {
            allocations_by_hostel,
            average_priority_score: average(scores.into_iter()),
        }
    }
}

fn average(scores: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = scores.fold((0.0, 0usize), |(sum, count), score| (sum + score, count + 1));
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64) * 100.0).round() / 100.0
}
