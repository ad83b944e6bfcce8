use serde::{Deserialize, Serialize};

use super::estimator::Estimator;
use super::preprocess::Step;
use super::ModelError;

/// Preprocessing steps followed by a terminal estimator.
///
/// Immutable once loaded; shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub steps: Vec<Step>,
    pub estimator: Estimator,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>, estimator: Estimator) -> Self {
        Self { steps, estimator }
    }

    /// Puts `step` in front of the existing steps (separately shipped scaler).
    pub fn with_leading_step(mut self, step: Step) -> Self {
        self.steps.insert(0, step);
        self
    }

    pub fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        for step in &self.steps {
            step.validate()?;
            if step.width() != n_features {
                return Err(ModelError::Width {
                    stage: step.name().to_string(),
                    expected: n_features,
                    actual: step.width(),
                });
            }
        }
        self.estimator.validate(n_features)
    }

    /// The estimator the attribution routine is attached to.
    pub fn terminal(&self) -> &Estimator {
        &self.estimator
    }

    /// Runs every preprocessing step, returning the estimator input.
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        let mut out = x.to_vec();
        for step in &self.steps {
            step.apply(&mut out)?;
        }
        Ok(out)
    }

    pub fn raw_margin(&self, x: &[f64]) -> Result<f64, ModelError> {
        self.estimator.margin(&self.transform(x)?)
    }

    pub fn predict_proba(&self, x: &[f64]) -> Result<[f64; 2], ModelError> {
        self.estimator.predict_proba(&self.transform(x)?)
    }
}
