use ndarray::{Array2, Axis};
use thiserror::Error;

use crate::model::{Estimator, ModelError, Pipeline};

/// Index of the "default" class in a binary classifier's output.
pub const POSITIVE_CLASS: usize = 1;

/// Raw output of an attribution routine.
///
/// Explainers differ in shape: some return one matrix per class, others a
/// single margin-space matrix for the positive class.
/// [`positive_class_contributions`] hides that difference from callers.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAttribution {
    /// One `rows x features` matrix per class, each with its own base value.
    PerClass {
        values: Vec<Array2<f64>>,
        base_values: Vec<f64>,
    },
    /// A single `rows x features` matrix for the positive class.
    Margin { values: Array2<f64>, base_value: f64 },
}

/// Per-feature contributions for one row and one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributions {
    pub values: Vec<f64>,
    pub base_value: f64,
}

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("attribution result has no class {0}")]
    MissingClass(usize),

    #[error("attribution result has {rows} rows, row {row} requested")]
    MissingRow { row: usize, rows: usize },

    #[error("attribution over an empty sample")]
    EmptySample,

    #[error("malformed attribution input: {0}")]
    Shape(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Produces raw attributions for a batch of estimator inputs.
pub trait Explainer {
    fn explain(&self, rows: &Array2<f64>) -> Result<RawAttribution, AttributionError>;
}

impl Explainer for Estimator {
    fn explain(&self, rows: &Array2<f64>) -> Result<RawAttribution, AttributionError> {
        match self {
            Estimator::TreeEnsemble {
                trees, base_score, ..
            } => {
                let mut values = Array2::<f64>::zeros(rows.raw_dim());
                for (x, mut phi) in rows.outer_iter().zip(values.outer_iter_mut()) {
                    let x = x.to_vec();
                    let mut acc = vec![0.0; x.len()];
                    for tree in trees {
                        tree.shap_values(&x, &mut acc);
                    }
                    for (dst, src) in phi.iter_mut().zip(acc) {
                        *dst = src;
                    }
                }
                let base_value =
                    base_score + trees.iter().map(|t| t.expected_value()).sum::<f64>();
                Ok(RawAttribution::Margin { values, base_value })
            }
            Estimator::LogisticRegression {
                coefficients,
                intercept,
                means,
                ..
            } => {
                if rows.ncols() != coefficients.len() {
                    return Err(ModelError::Width {
                        stage: self.kind().to_string(),
                        expected: coefficients.len(),
                        actual: rows.ncols(),
                    }
                    .into());
                }
                let zeros = vec![0.0; coefficients.len()];
                let means = means.as_deref().unwrap_or(&zeros);

                let mut positive = rows.clone();
                for mut row in positive.outer_iter_mut() {
                    for ((v, w), m) in row.iter_mut().zip(coefficients).zip(means) {
                        *v = w * (*v - m);
                    }
                }
                let base: f64 = intercept
                    + coefficients
                        .iter()
                        .zip(means)
                        .map(|(w, m)| w * m)
                        .sum::<f64>();
                let negative = positive.mapv(|v| -v);

                Ok(RawAttribution::PerClass {
                    values: vec![negative, positive],
                    base_values: vec![-base, base],
                })
            }
        }
    }
}

/// Preprocesses `rows` through the pipeline and explains its terminal estimator.
pub fn explain_pipeline(
    pipeline: &Pipeline,
    rows: &[Vec<f64>],
) -> Result<RawAttribution, AttributionError> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        flat.extend(pipeline.transform(row)?);
    }
    let matrix = Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| AttributionError::Shape(e.to_string()))?;
    pipeline.terminal().explain(&matrix)
}

/// The `rows x features` matrix and base value for `class`.
pub fn class_matrix(
    raw: &RawAttribution,
    class: usize,
) -> Result<(Array2<f64>, f64), AttributionError> {
    match raw {
        RawAttribution::PerClass {
            values,
            base_values,
        } => {
            let matrix = values
                .get(class)
                .ok_or(AttributionError::MissingClass(class))?;
            let base = base_values
                .get(class)
                .copied()
                .ok_or(AttributionError::MissingClass(class))?;
            Ok((matrix.clone(), base))
        }
        RawAttribution::Margin { values, base_value } => match class {
            POSITIVE_CLASS => Ok((values.clone(), *base_value)),
            0 => Ok((values.mapv(|v| -v), -base_value)),
            other => Err(AttributionError::MissingClass(other)),
        },
    }
}

/// Flat per-feature contribution vector for `row` and `class`.
pub fn positive_class_contributions(
    raw: &RawAttribution,
    row: usize,
    class: usize,
) -> Result<Contributions, AttributionError> {
    let (matrix, base_value) = class_matrix(raw, class)?;
    let rows = matrix.nrows();
    if row >= rows {
        return Err(AttributionError::MissingRow { row, rows });
    }
    Ok(Contributions {
        values: matrix.index_axis(Axis(0), row).to_vec(),
        base_value,
    })
}
