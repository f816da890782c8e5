mod config;
mod features;
mod model;

pub use config::{
    ScoringPolicy, SeniorityBoost, SeniorityMode, DEFAULT_DISABILITY_FLOOR,
    DEFAULT_DISTANCE_CAP_KM, DEFAULT_SENIORITY_FACTOR,
};
pub use features::FeatureSnapshot;
pub use model::{ModelError, ModelScore, ScoringModel, WeightedRubricModel};

use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use super::domain::{Applicant, ApplicantId};

const MAX_SCORE: f64 = 100.0;

/// An applicant together with the score trail used to rank them in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredApplicant {
    pub applicant: Applicant,
    pub features: FeatureSnapshot,
    /// Model output clamped to [0, 100].
    pub raw_score: f64,
    pub seniority_adjustment: f64,
    /// Lift applied by the disability priority band.
    pub priority_adjustment: f64,
    pub adjusted_score: f64,
    pub confidence: f64,
    pub model_version: String,
}

/// Why an applicant could not be scored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model returned a non-finite score")]
    NonFiniteScore,
    #[error("model returned a non-finite confidence")]
    NonFiniteConfidence,
}

/// Pure scorer combining a model with the cycle's scoring policy.
pub struct Scorer {
    model: Arc<dyn ScoringModel>,
    policy: ScoringPolicy,
}

impl Scorer {
    pub fn new(model: Arc<dyn ScoringModel>, policy: ScoringPolicy) -> Self {
        Self { model, policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn model_version(&self) -> &str {
        self.model.version()
    }

    pub fn score(&self, applicant: &Applicant) -> Result<ScoredApplicant, ScoringError> {
        let features = FeatureSnapshot::extract(applicant, self.policy.effective_distance_cap());
        let output = self.model.score(&features)?;

        if !output.score.is_finite() {
            return Err(ScoringError::NonFiniteScore);
        }
        if !output.confidence.is_finite() {
            return Err(ScoringError::NonFiniteConfidence);
        }

        let raw_score = output.score.clamp(0.0, MAX_SCORE);
        let confidence = output.confidence.clamp(0.0, 1.0);

        let seniority_adjustment = self
            .policy
            .seniority
            .adjustment_for(applicant.level.0, raw_score);
        let boosted = (raw_score + seniority_adjustment).clamp(0.0, MAX_SCORE);

        let priority_adjustment = match self.policy.disability_floor {
            Some(floor) if applicant.disability && floor.is_finite() => {
                (floor.clamp(0.0, MAX_SCORE) - boosted).max(0.0)
            }
            _ => 0.0,
        };

        Ok(ScoredApplicant {
            applicant: applicant.clone(),
            features,
            raw_score,
            seniority_adjustment,
            priority_adjustment,
            adjusted_score: (boosted + priority_adjustment).clamp(0.0, MAX_SCORE),
            confidence,
            model_version: self.model.version().to_string(),
        })
    }

    /// Score applicants across `workers` threads; results keep the input order.
    pub fn score_batch(
        &self,
        applicants: &[Applicant],
        workers: usize,
    ) -> Vec<(ApplicantId, Result<ScoredApplicant, ScoringError>)> {
        let workers = workers.max(1);
        if workers == 1 || applicants.len() < 2 {
            return applicants
                .iter()
                .map(|applicant| (applicant.id.clone(), self.score(applicant)))
                .collect();
        }

        let chunk_size = applicants.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = applicants
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|applicant| (applicant.id.clone(), self.score(applicant)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(applicants.len());
            for (handle, chunk) in handles.into_iter().zip(applicants.chunks(chunk_size)) {
                match handle.join() {
                    Ok(scored) => results.extend(scored),
                    Err(_) => results.extend(chunk.iter().map(|applicant| {
                        (
                            applicant.id.clone(),
                            Err(ScoringError::Model(ModelError::Unavailable(
                                "scoring worker panicked".to_string(),
                            ))),
                        )
                    })),
                }
            }
            results
        })
    }
}
