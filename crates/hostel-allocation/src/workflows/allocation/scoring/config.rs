use serde::{Deserialize, Serialize};

pub const DEFAULT_DISTANCE_CAP_KM: f64 = 500.0;
pub const DEFAULT_DISABILITY_FLOOR: f64 = 95.0;
pub const DEFAULT_SENIORITY_FACTOR: f64 = 1.2;

/// Adjustments layered on top of the raw model score for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub seniority: SeniorityBoost,
    /// Minimum adjusted score for disability-flagged applicants. `None` disables the band.
    pub disability_floor: Option<f64>,
    pub distance_cap_km: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            seniority: SeniorityBoost::default(),
            disability_floor: Some(DEFAULT_DISABILITY_FLOOR),
            distance_cap_km: DEFAULT_DISTANCE_CAP_KM,
        }
    }
}

impl ScoringPolicy {
    /// Distance cap used for normalisation, falling back to the default for unusable values.
    pub fn effective_distance_cap(&self) -> f64 {
        if self.distance_cap_km.is_finite() && self.distance_cap_km > 0.0 {
            self.distance_cap_km
        } else {
            DEFAULT_DISTANCE_CAP_KM
        }
    }
}

/// Seniority boost applied to configured academic levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeniorityBoost {
    pub levels: Vec<u16>,
    pub mode: SeniorityMode,
}

impl Default for SeniorityBoost {
    fn default() -> Self {
        Self {
            levels: vec![400, 500],
            mode: SeniorityMode::Multiplicative {
                factor: DEFAULT_SENIORITY_FACTOR,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SeniorityMode {
    Multiplicative { factor: f64 },
    Additive { points: f64 },
}

impl SeniorityBoost {
    /// Points added to `raw` for an applicant at `level`.
    pub fn adjustment_for(&self, level: u16, raw: f64) -> f64 {
        if !self.levels.contains(&level) {
            return 0.0;
        }

        let adjustment = match self.mode {
            SeniorityMode::Multiplicative { factor } => raw * (factor - 1.0),
            SeniorityMode::Additive { points } => points,
        };

        if adjustment.is_finite() {
            adjustment
        } else {
            0.0
        }
    }
}
