use serde::{Deserialize, Serialize};

use super::ModelError;

/// A fitted preprocessing step applied before the terminal estimator.
///
/// Steps are applied in declaration order and always preserve the width of
/// the feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// `(x - mean) / scale`. A zero scale is treated as 1, matching how
    /// constant columns are fitted.
    StandardScaler { mean: Vec<f64>, scale: Vec<f64> },
    /// Replaces non-finite inputs with the fitted column statistic.
    SimpleImputer { statistics: Vec<f64> },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::StandardScaler { .. } => "standard_scaler",
            Step::SimpleImputer { .. } => "simple_imputer",
        }
    }

    /// Number of input columns this step was fitted on.
    pub fn width(&self) -> usize {
        match self {
            Step::StandardScaler { mean, .. } => mean.len(),
            Step::SimpleImputer { statistics } => statistics.len(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ModelError> {
        if let Step::StandardScaler { mean, scale } = self {
            if mean.len() != scale.len() {
                return Err(ModelError::Invalid(format!(
                    "standard_scaler has {} means but {} scales",
                    mean.len(),
                    scale.len()
                )));
            }
        }
        Ok(())
    }

    /// Transforms `x` in place.
    pub fn apply(&self, x: &mut [f64]) -> Result<(), ModelError> {
        if x.len() != self.width() {
            return Err(ModelError::Width {
                stage: self.name().to_string(),
                expected: self.width(),
                actual: x.len(),
            });
        }
        match self {
            Step::StandardScaler { mean, scale } => {
                for ((v, m), s) in x.iter_mut().zip(mean).zip(scale) {
                    let s = if *s == 0.0 { 1.0 } else { *s };
                    *v = (*v - m) / s;
                }
            }
            Step::SimpleImputer { statistics } => {
                for (v, fill) in x.iter_mut().zip(statistics) {
                    if !v.is_finite() {
                        *v = *fill;
                    }
                }
            }
        }
        Ok(())
    }
}
