use super::domain::{Applicant, Gender, Room, RoomId};

/// Hard-constraint violations shared by the matcher, the commit re-check and overrides.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("room {room_id} is {policy} and cannot house a {gender} applicant")]
    GenderMismatch {
        room_id: RoomId,
        policy: &'static str,
        gender: &'static str,
    },
    #[error("room {room_id} is not accessible and the applicant requires an accessible room")]
    AccessibilityRequired { room_id: RoomId },
    #[error("room {room_id} is under maintenance")]
    UnderMaintenance { room_id: RoomId },
    #[error("room {room_id} is full (capacity {capacity})")]
    RoomFull { room_id: RoomId, capacity: u16 },
    #[error("bed {bed} in room {room_id} is taken or out of range")]
    BedUnavailable { room_id: RoomId, bed: u16 },
}

impl ConstraintViolation {
    pub fn code(&self) -> &'static str {
        match self {
            ConstraintViolation::GenderMismatch { .. } => "gender_mismatch",
            ConstraintViolation::AccessibilityRequired { .. } => "accessibility_required",
            ConstraintViolation::UnderMaintenance { .. } => "under_maintenance",
            ConstraintViolation::RoomFull { .. } => "room_full",
            ConstraintViolation::BedUnavailable { .. } => "bed_unavailable",
        }
    }
}

fn check_gender(room: &Room, gender: Gender) -> Result<(), ConstraintViolation> {
    if room.gender_policy.accepts(gender) {
        return Ok(());
    }

    Err(ConstraintViolation::GenderMismatch {
        room_id: room.id.clone(),
        policy: room.gender_policy.label(),
        gender: gender.label(),
    })
}

/// Check that `applicant` may take a bed in `room`, returning the bed to use.
///
/// With `bed` set, that exact bed-space must be free; otherwise the lowest free one is chosen.
pub fn check_assignment(
    applicant: &Applicant,
    room: &Room,
    bed: Option<u16>,
) -> Result<u16, ConstraintViolation> {
    check_gender(room, applicant.gender)?;

    if applicant.disability && !room.accessible {
        return Err(ConstraintViolation::AccessibilityRequired {
            room_id: room.id.clone(),
        });
    }

    if room.under_maintenance {
        return Err(ConstraintViolation::UnderMaintenance {
            room_id: room.id.clone(),
        });
    }

    if room.free_beds() == 0 {
        return Err(ConstraintViolation::RoomFull {
            room_id: room.id.clone(),
            capacity: room.capacity,
        });
    }

    match bed {
        Some(bed) if bed == 0 || bed > room.capacity || room.occupied_beds.contains(&bed) => {
            Err(ConstraintViolation::BedUnavailable {
                room_id: room.id.clone(),
                bed,
            })
        }
        Some(bed) => Ok(bed),
        None => room
            .next_free_bed()
            .ok_or_else(|| ConstraintViolation::RoomFull {
                room_id: room.id.clone(),
                capacity: room.capacity,
            }),
    }
}
