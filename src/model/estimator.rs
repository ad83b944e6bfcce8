use serde::{Deserialize, Serialize};

use super::tree::Tree;
use super::ModelError;

/// The terminal estimator of a pipeline. Both kinds are binary classifiers
/// whose raw output is a log-odds margin for the positive class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    /// Gradient-boosted trees with a binary logistic objective.
    TreeEnsemble {
        trees: Vec<Tree>,
        #[serde(default)]
        base_score: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feature_names: Option<Vec<String>>,
    },
    LogisticRegression {
        coefficients: Vec<f64>,
        intercept: f64,
        /// Background mean of each (preprocessed) input. Defaults to zero,
        /// which is right for standardized inputs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        means: Option<Vec<f64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feature_names: Option<Vec<String>>,
    },
}

pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

impl Estimator {
    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::TreeEnsemble { .. } => "tree_ensemble",
            Estimator::LogisticRegression { .. } => "logistic_regression",
        }
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        match self {
            Estimator::TreeEnsemble { feature_names, .. }
            | Estimator::LogisticRegression { feature_names, .. } => feature_names.as_deref(),
        }
    }

    pub(crate) fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        if let Some(names) = self.feature_names() {
            if names.len() != n_features {
                return Err(ModelError::Width {
                    stage: format!("{} feature_names", self.kind()),
                    expected: n_features,
                    actual: names.len(),
                });
            }
        }
        match self {
            Estimator::TreeEnsemble { trees, .. } => {
                if trees.is_empty() {
                    return Err(ModelError::Invalid("tree ensemble has no trees".to_string()));
                }
                for (i, tree) in trees.iter().enumerate() {
                    tree.validate(n_features)
                        .map_err(|e| ModelError::Invalid(format!("tree {}: {}", i, e)))?;
                }
            }
            Estimator::LogisticRegression {
                coefficients,
                means,
                ..
            } => {
                if coefficients.len() != n_features {
                    return Err(ModelError::Width {
                        stage: self.kind().to_string(),
                        expected: n_features,
                        actual: coefficients.len(),
                    });
                }
                if let Some(means) = means {
                    if means.len() != coefficients.len() {
                        return Err(ModelError::Invalid(format!(
                            "logistic_regression has {} coefficients but {} means",
                            coefficients.len(),
                            means.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Log-odds of the positive class.
    pub fn margin(&self, x: &[f64]) -> Result<f64, ModelError> {
        match self {
            Estimator::TreeEnsemble {
                trees, base_score, ..
            } => Ok(base_score + trees.iter().map(|t| t.predict(x)).sum::<f64>()),
            Estimator::LogisticRegression {
                coefficients,
                intercept,
                ..
            } => {
                if x.len() != coefficients.len() {
                    return Err(ModelError::Width {
                        stage: self.kind().to_string(),
                        expected: coefficients.len(),
                        actual: x.len(),
                    });
                }
                Ok(intercept + coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>())
            }
        }
    }

    /// `[P(class 0), P(class 1)]`.
    pub fn predict_proba(&self, x: &[f64]) -> Result<[f64; 2], ModelError> {
        let p = sigmoid(self.margin(x)?);
        if !p.is_finite() {
            return Err(ModelError::Invalid(
                "estimator produced a non-finite probability".to_string(),
            ));
        }
        Ok([1.0 - p, p])
    }
}
