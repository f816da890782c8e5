use serde::{Deserialize, Serialize};

use super::super::domain::Applicant;

/// The exact model inputs used for one score, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub gpa_normalized: f64,
    pub level_encoded: u8,
    pub distance_km: f64,
    pub distance_normalized: f64,
    pub disability: bool,
    pub financial_need: bool,
}

impl FeatureSnapshot {
    pub fn extract(applicant: &Applicant, distance_cap_km: f64) -> Self {
        let distance_km = applicant.distance_km.clamp(0.0, distance_cap_km);

        Self {
            gpa_normalized: applicant.normalized_gpa.clamp(0.0, 1.0),
            level_encoded: applicant.level.encoded(),
            distance_km,
            distance_normalized: distance_km / distance_cap_km,
            disability: applicant.disability,
            financial_need: applicant.financial_need,
        }
    }
}
