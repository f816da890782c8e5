use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::DecisionId;
use super::domain::{ApplicantId, BucketKey, Gender, HostelId, Room, RoomId};
use super::repository::CurrentPlacement;

/// Point-in-time copy of the rooms a cycle is allowed to touch.
///
/// `versions` records the store version of every room at snapshot time and `placements`
/// the bed every housed applicant held; the commit is rejected if any of them moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub taken_at: DateTime<Utc>,
    pub hostels: BTreeSet<HostelId>,
    pub rooms: Vec<Room>,
    pub versions: BTreeMap<RoomId, u64>,
    #[serde(default)]
    pub placements: BTreeMap<ApplicantId, CurrentPlacement>,
}

impl InventorySnapshot {
    pub fn new(hostels: BTreeSet<HostelId>, mut rooms: Vec<(Room, u64)>) -> Self {
        rooms.sort_by(|(left, _), (right, _)| left.id.cmp(&right.id));
        let versions = rooms
            .iter()
            .map(|(room, version)| (room.id.clone(), *version))
            .collect();

        Self {
            taken_at: Utc::now(),
            hostels,
            rooms: rooms.into_iter().map(|(room, _)| room).collect(),
            versions,
            placements: BTreeMap::new(),
        }
    }

    pub fn with_placements(
        mut self,
        placements: BTreeMap<ApplicantId, CurrentPlacement>,
    ) -> Self {
        self.placements = placements;
        self
    }

    /// Bed held by `applicant_id`, if it lies in a room this snapshot covers.
    pub fn placement_in_scope(&self, applicant_id: &ApplicantId) -> Option<&CurrentPlacement> {
        self.placements
            .get(applicant_id)
            .filter(|placement| self.versions.contains_key(&placement.room_id))
    }

    pub fn expected_placement(&self, applicant_id: &ApplicantId) -> Option<DecisionId> {
        self.placements
            .get(applicant_id)
            .map(|placement| placement.decision_id)
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| &room.id == room_id)
    }

    /// Whether any offered room could ever take this applicant, ignoring current occupancy.
    pub fn serves(&self, gender: Gender, disability: bool, reserve_accessible: bool) -> bool {
        let buckets: Vec<BucketKey> = BucketKey::tiers_for(gender, disability, !reserve_accessible)
            .into_iter()
            .flatten()
            .collect();
        self.rooms
            .iter()
            .any(|room| room.is_offered() && buckets.contains(&room.bucket()))
    }

    pub fn total_capacity(&self) -> u32 {
        self.rooms
            .iter()
            .filter(|room| room.is_offered())
            .map(|room| room.capacity as u32)
            .sum()
    }

    pub fn total_occupancy(&self) -> u32 {
        self.rooms.iter().map(|room| room.occupancy() as u32).sum()
    }
}

/// Raised when another cycle already holds a hostel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hostel {hostel_id} is leased by another cycle")]
pub struct LeaseUnavailable {
    pub hostel_id: HostelId,
}

/// Registry of exclusive hostel leases held by running cycles.
#[derive(Debug, Default)]
pub struct HostelLeases {
    held: Mutex<BTreeSet<HostelId>>,
}

impl HostelLeases {
    /// Take every hostel in `hostels` or none of them.
    pub fn acquire(
        &self,
        hostels: &BTreeSet<HostelId>,
    ) -> Result<HostelLease<'_>, LeaseUnavailable> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(busy) = hostels.iter().find(|hostel| held.contains(*hostel)) {
            return Err(LeaseUnavailable {
                hostel_id: busy.clone(),
            });
        }

        held.extend(hostels.iter().cloned());
        Ok(HostelLease {
            registry: self,
            hostels: hostels.clone(),
        })
    }

    pub fn is_held(&self, hostel_id: &HostelId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(hostel_id)
    }
}

/// Guard releasing its hostels when dropped.
#[derive(Debug)]
pub struct HostelLease<'a> {
    registry: &'a HostelLeases,
    hostels: BTreeSet<HostelId>,
}

impl HostelLease<'_> {
    pub fn hostels(&self) -> &BTreeSet<HostelId> {
        &self.hostels
    }
}

impl Drop for HostelLease<'_> {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for hostel in &self.hostels {
            held.remove(hostel);
        }
    }
}
