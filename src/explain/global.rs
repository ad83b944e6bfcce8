use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::attribution::{class_matrix, AttributionError, RawAttribution};
use crate::models::FeatureImportance;

/// Picks `sample_size` distinct row indices out of `n_rows`, reproducibly for a
/// given seed. Returns every row, in order, when the table is small enough.
pub fn sample_indices(n_rows: usize, sample_size: usize, seed: u64) -> Vec<usize> {
    if sample_size >= n_rows {
        return (0..n_rows).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, n_rows, sample_size).into_vec();
    picked.sort_unstable();
    picked
}

/// Mean absolute contribution per feature, highest first, truncated to `max_display`.
pub fn mean_abs_importance(
    raw: &RawAttribution,
    features: &[String],
    class: usize,
    max_display: usize,
) -> Result<Vec<FeatureImportance>, AttributionError> {
    let (matrix, _) = class_matrix(raw, class)?;
    if matrix.ncols() != features.len() {
        return Err(AttributionError::Shape(format!(
            "{} attribution columns for {} features",
            matrix.ncols(),
            features.len()
        )));
    }
    let means = matrix
        .mapv(f64::abs)
        .mean_axis(Axis(0))
        .ok_or(AttributionError::EmptySample)?;

    let mut importances: Vec<FeatureImportance> = features
        .iter()
        .zip(means.iter())
        .map(|(feature, mean)| FeatureImportance {
            feature: feature.clone(),
            mean_abs_contribution: *mean,
        })
        .collect();

    importances.sort_by(|a, b| {
        b.mean_abs_contribution
            .partial_cmp(&a.mean_abs_contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    importances.truncate(max_display);
    Ok(importances)
}
