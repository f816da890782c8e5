use serde::{Deserialize, Serialize};

use super::features::FeatureSnapshot;

/// Output of a scoring model before any policy adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub score: f64,
    pub confidence: f64,
}

/// Error surfaced by a scoring model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model rejected features: {0}")]
    InvalidFeatures(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),
}

/// Versioned, swappable priority model.
///
/// The engine only relies on this contract; trained artifacts live behind it.
pub trait ScoringModel: Send + Sync {
    fn version(&self) -> &str;
    fn score(&self, features: &FeatureSnapshot) -> Result<ModelScore, ModelError>;
}

const GPA_WEIGHT: f64 = 0.40;
const DISTANCE_WEIGHT: f64 = 0.30;
const LEVEL_WEIGHT: f64 = 0.20;
const NEED_WEIGHT: f64 = 0.10;
const MAX_LEVEL: f64 = 5.0;
const RUBRIC_CONFIDENCE: f64 = 0.85;

/// Weighted rubric used when no trained artifact is installed.
#[derive(Debug, Clone)]
pub struct WeightedRubricModel {
    version: String,
}

impl WeightedRubricModel {
    pub const VERSION: &'static str = "domain_knowledge_v1";

    pub fn new() -> Self {
        Self {
            version: Self::VERSION.to_string(),
        }
    }
}

impl Default for WeightedRubricModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringModel for WeightedRubricModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureSnapshot) -> Result<ModelScore, ModelError> {
        let gpa = features.gpa_normalized * GPA_WEIGHT * 100.0;
        let distance = features.distance_normalized * DISTANCE_WEIGHT * 100.0;
        let level = (features.level_encoded as f64 / MAX_LEVEL) * LEVEL_WEIGHT * 100.0;
        let need = if features.disability || features.financial_need {
            NEED_WEIGHT * 100.0
        } else {
            0.0
        };

        Ok(ModelScore {
            score: (gpa + distance + level + need).clamp(0.0, 100.0),
            confidence: RUBRIC_CONFIDENCE,
        })
    }
}
