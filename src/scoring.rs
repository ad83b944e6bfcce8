//! The lookup → align → infer → (optionally) explain request pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::{CoercionPolicy, DatasetError, DatasetSource};
use crate::explain::global::{mean_abs_importance, sample_indices};
use crate::explain::{explain_pipeline, positive_class_contributions, AttributionError, POSITIVE_CLASS};
use crate::model::{ModelError, Pipeline};
use crate::models::{Attribution, CustomerId, Decision, FeatureImportance, ScoreResponse};

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("no customer found with {column} = {identifier}")]
    NotFound {
        column: String,
        identifier: CustomerId,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(DatasetError),

    #[error("dataset error: {0}")]
    Dataset(DatasetError),

    #[error("prediction failed: {0}")]
    Inference(#[from] ModelError),

    #[error("explanation failed: {0}")]
    Attribution(#[from] AttributionError),
}

impl From<DatasetError> for ScoreError {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::MissingIdColumn(_) | DatasetError::MissingColumns(_) => {
                ScoreError::SchemaMismatch(err)
            }
            other => ScoreError::Dataset(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringOptions {
    pub coercion: CoercionPolicy,
    /// Probability (0..1) at or above which a loan is refused.
    pub decision_threshold: f64,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            coercion: CoercionPolicy::Zero,
            decision_threshold: 0.5,
        }
    }
}

/// Scores customers against a pipeline and a dataset it is given.
///
/// Holds no mutable state; clones share the same artifacts.
#[derive(Debug, Clone)]
pub struct Scorer {
    pipeline: Arc<Pipeline>,
    features: Arc<Vec<String>>,
    dataset: DatasetSource,
    options: ScoringOptions,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Scorer {
    pub fn new(
        pipeline: Arc<Pipeline>,
        features: Vec<String>,
        dataset: DatasetSource,
        options: ScoringOptions,
    ) -> Self {
        Self {
            pipeline,
            features: Arc::new(features),
            dataset,
            options,
        }
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn dataset(&self) -> &DatasetSource {
        &self.dataset
    }

    /// Looks up `identifier` and returns its feature vector in model order.
    pub fn aligned_vector(&self, identifier: CustomerId) -> Result<Vec<f64>, ScoreError> {
        let dataset = self.dataset.get()?;
        let row = dataset
            .find(identifier)?
            .ok_or_else(|| ScoreError::NotFound {
                column: dataset.id_column().to_string(),
                identifier,
            })?;
        let projection = dataset.project(&self.features)?;
        Ok(dataset.align(row, &projection, self.options.coercion)?)
    }

    /// Every addressable customer identifier, in dataset order.
    pub fn customer_ids(&self) -> Result<Vec<CustomerId>, ScoreError> {
        Ok(self.dataset.get()?.identifiers()?)
    }

    /// The customer's raw dataset row, all columns included.
    pub fn customer_record(
        &self,
        identifier: CustomerId,
    ) -> Result<BTreeMap<String, String>, ScoreError> {
        let dataset = self.dataset.get()?;
        let row = dataset
            .find(identifier)?
            .ok_or_else(|| ScoreError::NotFound {
                column: dataset.id_column().to_string(),
                identifier,
            })?;
        Ok(dataset.record(row))
    }

    /// Default probability (percent) and, when `explain` is set, SHAP values.
    pub fn score(
        &self,
        identifier: CustomerId,
        explain: bool,
    ) -> Result<ScoreResponse, ScoreError> {
        let x = self.aligned_vector(identifier)?;

        let proba = self.pipeline.predict_proba(&x)?[POSITIVE_CLASS];
        let probability = round2(proba * 100.0).clamp(0.0, 100.0);
        let decision = Decision::from_probability(proba, self.options.decision_threshold);

        debug!(
            identifier,
            probability,
            decision = ?decision,
            "Customer scored"
        );

        if !explain {
            return Ok(ScoreResponse {
                probability,
                decision,
                base_value: None,
                attributions: None,
            });
        }

        let raw = explain_pipeline(&self.pipeline, std::slice::from_ref(&x))?;
        let contributions = positive_class_contributions(&raw, 0, POSITIVE_CLASS)?;

        let mut attributions: Vec<Attribution> = self
            .features
            .iter()
            .zip(contributions.values)
            .zip(&x)
            .map(|((feature, contribution), value)| Attribution {
                feature: feature.clone(),
                contribution,
                value: *value,
            })
            .collect();
        attributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(ScoreResponse {
            probability,
            decision,
            base_value: Some(contributions.base_value),
            attributions: Some(attributions),
        })
    }

    /// Mean |SHAP| per feature over a seeded random sample of customers.
    ///
    /// Rows whose values cannot be coerced under the configured policy are
    /// left out of the sample.
    pub fn global_importance(
        &self,
        sample_size: usize,
        seed: u64,
        max_display: usize,
    ) -> Result<(usize, Vec<FeatureImportance>), ScoreError> {
        let dataset = self.dataset.get()?;
        let projection = dataset.project(&self.features)?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for idx in sample_indices(dataset.len(), sample_size, seed) {
            match dataset.align(idx, &projection, self.options.coercion) {
                Ok(x) => rows.push(x),
                Err(_) => skipped += 1,
            }
        }
        if rows.is_empty() {
            return Err(AttributionError::EmptySample.into());
        }

        let raw = explain_pipeline(&self.pipeline, &rows)?;
        let importances = mean_abs_importance(&raw, &self.features, POSITIVE_CLASS, max_display)?;

        info!(
            sample = rows.len(),
            skipped,
            "Global feature importance computed"
        );
        Ok((rows.len(), importances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CustomerDataset;
    use crate::model::{Estimator, Node, Tree};

    const CSV: &str = "\
SK_ID_CURR,AMT_INCOME_TOTAL,EXTRA,AMT_CREDIT
100002,202500,x,406597.5
100003,abc,y,1293502.5
";

    fn features() -> Vec<String> {
        vec!["AMT_CREDIT".to_string(), "AMT_INCOME_TOTAL".to_string()]
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            vec![],
            Estimator::TreeEnsemble {
                trees: vec![
                    Tree::new(vec![
                        Node::split(0, 500000.0, 1, 2, 10.0),
                        Node::leaf(-1.2, 7.0),
                        Node::leaf(0.8, 3.0),
                    ]),
                    Tree::new(vec![
                        Node::split(1, 100000.0, 1, 2, 10.0),
                        Node::leaf(0.4, 4.0),
                        Node::leaf(-0.3, 6.0),
                    ]),
                ],
                base_score: 0.0,
                feature_names: None,
            },
        )
    }

    fn scorer(policy: CoercionPolicy) -> Scorer {
        let ds = CustomerDataset::from_reader(CSV.as_bytes(), "SK_ID_CURR").unwrap();
        Scorer::new(
            Arc::new(pipeline()),
            features(),
            DatasetSource::Preloaded(Arc::new(ds)),
            ScoringOptions {
                coercion: policy,
                ..Default::default()
            },
        )
    }

    #[test]
    fn known_customer_gets_a_percentage() {
        let resp = scorer(CoercionPolicy::Zero).score(100002, false).unwrap();
        // margin = -1.2 - 0.3
        let expected = round2(100.0 / (1.0 + 1.5_f64.exp()));
        assert_eq!(resp.probability, expected);
        assert_eq!(resp.decision, Decision::Granted);
        assert!(resp.attributions.is_none());
        assert!(resp.base_value.is_none());
    }

    #[test]
    fn unknown_customer_is_not_found() {
        let err = scorer(CoercionPolicy::Zero).score(999999, false).unwrap_err();
        assert!(matches!(
            err,
            ScoreError::NotFound {
                identifier: 999999,
                ..
            }
        ));
        assert_eq!(err.to_string(), "no customer found with SK_ID_CURR = 999999");
    }

    #[test]
    fn attributions_are_complete_sorted_and_additive() {
        let s = scorer(CoercionPolicy::Zero);
        let resp = s.score(100002, true).unwrap();
        let attributions = resp.attributions.unwrap();
        assert_eq!(attributions.len(), 2);
        assert!(attributions[0].contribution.abs() >= attributions[1].contribution.abs());

        let x = s.aligned_vector(100002).unwrap();
        let margin = s.pipeline().raw_margin(&x).unwrap();
        let total: f64 =
            attributions.iter().map(|a| a.contribution).sum::<f64>() + resp.base_value.unwrap();
        assert!((total - margin).abs() < 1e-9);
    }

    #[test]
    fn coercion_policy_decides_non_numeric_rows() {
        let zero = scorer(CoercionPolicy::Zero);
        assert_eq!(zero.aligned_vector(100003).unwrap(), vec![1293502.5, 0.0]);

        let reject = scorer(CoercionPolicy::Reject);
        assert!(matches!(
            reject.score(100003, false),
            Err(ScoreError::Dataset(DatasetError::NonNumeric { .. }))
        ));
    }

    #[test]
    fn missing_feature_column_is_schema_mismatch() {
        let ds = CustomerDataset::from_reader("SK_ID_CURR,AMT_CREDIT\n1,2\n".as_bytes(), "SK_ID_CURR")
            .unwrap();
        let s = Scorer::new(
            Arc::new(pipeline()),
            features(),
            DatasetSource::Preloaded(Arc::new(ds)),
            ScoringOptions::default(),
        );
        assert!(matches!(s.score(1, false), Err(ScoreError::SchemaMismatch(_))));
    }

    #[test]
    fn customer_listing_and_record() {
        let s = scorer(CoercionPolicy::Zero);
        assert_eq!(s.customer_ids().unwrap(), vec![100002, 100003]);

        let record = s.customer_record(100003).unwrap();
        assert_eq!(record["AMT_INCOME_TOTAL"], "abc");
        assert_eq!(record["EXTRA"], "y");
        assert!(matches!(
            s.customer_record(1),
            Err(ScoreError::NotFound { identifier: 1, .. })
        ));
    }

    #[test]
    fn global_importance_skips_rejected_rows() {
        let (n, ranked) = scorer(CoercionPolicy::Reject)
            .global_importance(100, 7, 10)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(ranked.len(), 2);
    }
}
