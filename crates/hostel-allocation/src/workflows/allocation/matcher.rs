use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::constraints::check_assignment;
use super::decision::UnallocatedReason;
use super::domain::{Applicant, BucketKey, HostelId, Room, RoomId};
use super::inventory::InventorySnapshot;
use super::repository::CurrentPlacement;
use super::scoring::ScoredApplicant;

/// Concrete bed-space chosen for an applicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub bed: u16,
}

/// Matcher output for one ranked applicant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedDecision {
    /// 1-based position in the cycle ranking.
    pub rank: usize,
    pub scored: ScoredApplicant,
    pub placement: Result<Placement, UnallocatedReason>,
}

/// Housed applicant in a room-change cycle who stays where they are.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedPlacement {
    pub rank: usize,
    pub scored: ScoredApplicant,
    pub placement: CurrentPlacement,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPlan {
    pub proposals: Vec<ProposedDecision>,
    /// Applicants keeping their current bed; they produce no decision.
    pub retained: Vec<RetainedPlacement>,
}

impl MatchPlan {
    pub fn allocated(&self) -> impl Iterator<Item = (&ProposedDecision, &Placement)> {
        self.proposals
            .iter()
            .filter_map(|proposal| proposal.placement.as_ref().ok().map(|p| (proposal, p)))
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("cycle deadline passed after matching {matched} applicants")]
    DeadlineExceeded { matched: usize },
}

/// Ranking order: adjusted score, raw score, earliest submission, applicant id.
pub fn priority_order(left: &ScoredApplicant, right: &ScoredApplicant) -> Ordering {
    right
        .adjusted_score
        .total_cmp(&left.adjusted_score)
        .then_with(|| right.raw_score.total_cmp(&left.raw_score))
        .then_with(|| left.applicant.submitted_at.cmp(&right.applicant.submitted_at))
        .then_with(|| left.applicant.id.cmp(&right.applicant.id))
}

pub fn rank(mut scored: Vec<ScoredApplicant>) -> Vec<ScoredApplicant> {
    scored.sort_by(priority_order);
    scored
}

/// Ordering key for rooms with free beds: partially filled first, then lowest occupancy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    empty: bool,
    occupancy: u16,
    hostel_id: HostelId,
    room_id: RoomId,
}

impl SlotKey {
    fn of(room: &Room) -> Self {
        Self {
            empty: room.occupancy() == 0,
            occupancy: room.occupancy(),
            hostel_id: room.hostel_id.clone(),
            room_id: room.id.clone(),
        }
    }
}

/// Free capacity indexed by bucket and by (hostel, bucket).
struct CapacityIndex {
    rooms: BTreeMap<RoomId, Room>,
    by_bucket: BTreeMap<BucketKey, BTreeSet<SlotKey>>,
    by_hostel: BTreeMap<(HostelId, BucketKey), BTreeSet<SlotKey>>,
}

impl CapacityIndex {
    fn build(snapshot: &InventorySnapshot) -> Self {
        let mut index = Self {
            rooms: BTreeMap::new(),
            by_bucket: BTreeMap::new(),
            by_hostel: BTreeMap::new(),
        };
        for room in snapshot.rooms.iter().filter(|room| room.has_free_bed()) {
            index.insert_slot(room);
            index.rooms.insert(room.id.clone(), room.clone());
        }
        index
    }

    fn insert_slot(&mut self, room: &Room) {
        let key = SlotKey::of(room);
        self.by_bucket
            .entry(room.bucket())
            .or_default()
            .insert(key.clone());
        self.by_hostel
            .entry((room.hostel_id.clone(), room.bucket()))
            .or_default()
            .insert(key);
    }

    fn remove_slot(&mut self, room: &Room) {
        let key = SlotKey::of(room);
        if let Some(slots) = self.by_bucket.get_mut(&room.bucket()) {
            slots.remove(&key);
        }
        if let Some(slots) = self.by_hostel.get_mut(&(room.hostel_id.clone(), room.bucket())) {
            slots.remove(&key);
        }
    }

    fn best_in_tier(&self, tier: &[BucketKey; 2], hostel: Option<&HostelId>) -> Option<RoomId> {
        tier.iter()
            .filter_map(|bucket| match hostel {
                Some(hostel) => self
                    .by_hostel
                    .get(&(hostel.clone(), *bucket))
                    .and_then(|slots| slots.first()),
                None => self.by_bucket.get(bucket).and_then(|slots| slots.first()),
            })
            .min()
            .map(|slot| slot.room_id.clone())
    }

    fn candidate(&self, applicant: &Applicant, tiers: &[[BucketKey; 2]]) -> Option<RoomId> {
        if let Some(preferred) = applicant.preferred_hostel.as_ref() {
            let found = tiers
                .iter()
                .find_map(|tier| self.best_in_tier(tier, Some(preferred)));
            if found.is_some() {
                return found;
            }
        }
        tiers.iter().find_map(|tier| self.best_in_tier(tier, None))
    }

    fn occupy(&mut self, applicant: &Applicant, room_id: &RoomId) -> Option<Placement> {
        let mut room = self.rooms.remove(room_id)?;
        self.remove_slot(&room);

        let placement = match check_assignment(applicant, &room, None) {
            Ok(bed) => {
                room.occupied_beds.insert(bed);
                Some(Placement {
                    room_id: room.id.clone(),
                    hostel_id: room.hostel_id.clone(),
                    bed,
                })
            }
            Err(_) => None,
        };

        if room.has_free_bed() {
            self.insert_slot(&room);
            self.rooms.insert(room.id.clone(), room);
        }
        placement
    }
}

/// Greedy, priority-ordered matcher over an inventory snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    reserve_accessible_rooms: bool,
}

impl Matcher {
    pub fn new(reserve_accessible_rooms: bool) -> Self {
        Self {
            reserve_accessible_rooms,
        }
    }

    /// Rank `scored` and walk it once, giving each applicant the best free bed they may take.
    ///
    /// An applicant already housed inside the snapshot only moves to a different room; when
    /// the best candidate is their own room, or nothing fits, they keep the bed they hold.
    /// Beds vacated by a move are not offered again within the same run.
    pub fn run(
        &self,
        scored: Vec<ScoredApplicant>,
        snapshot: &InventorySnapshot,
        deadline: Option<Instant>,
    ) -> Result<MatchPlan, MatchError> {
        let mut index = CapacityIndex::build(snapshot);
        let ranked = rank(scored);
        let mut plan = MatchPlan {
            proposals: Vec::with_capacity(ranked.len()),
            retained: Vec::new(),
        };

        for (position, scored) in ranked.into_iter().enumerate() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(MatchError::DeadlineExceeded { matched: position });
            }

            let applicant = &scored.applicant;
            let tiers = BucketKey::tiers_for(
                applicant.gender,
                applicant.disability,
                !self.reserve_accessible_rooms,
            );
            let held = snapshot.placement_in_scope(&applicant.id);
            let placement = index
                .candidate(applicant, &tiers)
                .filter(|room_id| held.map_or(true, |held| &held.room_id != room_id))
                .and_then(|room_id| index.occupy(applicant, &room_id));

            match (placement, held) {
                (Some(placement), _) => plan.proposals.push(ProposedDecision {
                    rank: position + 1,
                    scored,
                    placement: Ok(placement),
                }),
                (None, Some(held)) => plan.retained.push(RetainedPlacement {
                    rank: position + 1,
                    placement: held.clone(),
                    scored,
                }),
                (None, None) => {
                    let reason = if applicant.disability {
                        UnallocatedReason::NoAccessibleCapacity
                    } else {
                        UnallocatedReason::RoomFull
                    };
                    plan.proposals.push(ProposedDecision {
                        rank: position + 1,
                        scored,
                        placement: Err(reason),
                    });
                }
            }
        }

        Ok(plan)
    }
}
