use super::decision::{CycleParameters, Exclusion, ExclusionReason};
use super::domain::{AcademicLevel, Applicant, ApplicantRecord, ApplicationStatus};
use super::inventory::InventorySnapshot;

/// Applicants split into those that may compete in a cycle and those kept out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityPartition {
    pub eligible: Vec<Applicant>,
    pub ineligible: Vec<Exclusion>,
}

/// Guard turning raw applicant records into validated [`Applicant`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityFilter;

fn incomplete(field: &str, detail: impl Into<String>) -> ExclusionReason {
    ExclusionReason::IncompleteProfile {
        field: field.to_string(),
        detail: detail.into(),
    }
}

impl EligibilityFilter {
    /// Validate profile completeness and ranges.
    pub fn profile(&self, record: &ApplicantRecord) -> Result<Applicant, ExclusionReason> {
        let level = match record.level {
            None => return Err(incomplete("level", "missing")),
            Some(raw) => {
                let level = AcademicLevel(raw);
                if !level.is_supported() {
                    return Err(incomplete("level", format!("unsupported level {raw}")));
                }
                level
            }
        };

        let normalized_gpa = match record.normalized_gpa {
            None => return Err(incomplete("normalized_gpa", "missing")),
            Some(gpa) if !gpa.is_finite() || !(0.0..=1.0).contains(&gpa) => {
                return Err(incomplete("normalized_gpa", format!("{gpa} outside 0.0..=1.0")));
            }
            Some(gpa) => gpa,
        };

        let distance_km = match record.distance_km {
            None => return Err(incomplete("distance_km", "missing")),
            Some(distance) if !distance.is_finite() || distance < 0.0 => {
                return Err(incomplete("distance_km", format!("{distance} is not a distance")));
            }
            Some(distance) => distance,
        };

        let gender = record.gender.ok_or_else(|| incomplete("gender", "missing"))?;

        Ok(Applicant {
            id: record.id.clone(),
            level,
            normalized_gpa,
            distance_km,
            gender,
            disability: record.disability,
            financial_need: record.financial_need,
            preferred_hostel: record.preferred_hostel.clone(),
            submitted_at: record.submitted_at,
        })
    }

    /// Apply the eligibility rules in order: completeness, prior allocation, inventory match.
    pub fn partition(
        &self,
        records: &[ApplicantRecord],
        snapshot: &InventorySnapshot,
        parameters: &CycleParameters,
    ) -> EligibilityPartition {
        let mut partition = EligibilityPartition::default();

        for record in records {
            let verdict = self.profile(record).and_then(|applicant| {
                let held = snapshot.placements.get(&record.id);
                if record.status == ApplicationStatus::Allocated || held.is_some() {
                    // A room change may only vacate beds inside the cycle's own scope.
                    let movable = parameters.room_change
                        && (held.is_none() || snapshot.placement_in_scope(&record.id).is_some());
                    if !movable {
                        return Err(ExclusionReason::AlreadyAllocated);
                    }
                }
                if !snapshot.serves(
                    applicant.gender,
                    applicant.disability,
                    parameters.reserve_accessible_rooms,
                ) {
                    return Err(ExclusionReason::NoMatchingInventory);
                }
                Ok(applicant)
            });

            match verdict {
                Ok(applicant) => partition.eligible.push(applicant),
                Err(reason) => partition.ineligible.push(Exclusion {
                    applicant_id: record.id.clone(),
                    reason,
                }),
            }
        }

        partition
    }
}
