//! Startup-time artifact loading.
//!
//! Everything here runs before the listener binds; any failure aborts the
//! process instead of surfacing on a request.

use anyhow::Context;
use std::sync::Arc;

use crate::config::Config;
use crate::dataset::{CustomerDataset, DatasetSource};
use crate::model::loader::{ensure_exists, load_pipeline};
use crate::scoring::{Scorer, ScoringOptions};

/// Loaded, validated artifacts ready to be handed to the HTTP layer.
pub struct Artifacts {
    pub scorer: Scorer,
    pub fingerprint: String,
}

pub fn load(config: &Config) -> anyhow::Result<Artifacts> {
    ensure_exists(&config.model_path, "pipeline")?;
    if let Some(ref scaler) = config.scaler_path {
        ensure_exists(scaler, "scaler")?;
    }
    ensure_exists(&config.data_path, "CSV")?;

    let loaded = load_pipeline(&config.model_path, config.scaler_path.as_deref())
        .context("Failed to load pipeline artifact")?;

    // The header is needed to resolve bare pipelines even when rows are re-read per request
    let dataset = CustomerDataset::from_path(&config.data_path, &config.id_column)
        .context("Failed to load customer dataset")?;

    let bundle = loaded
        .resolve(dataset.columns(), &config.id_column)
        .context("Pipeline does not fit the expected feature list")?;

    if let Err(e) = dataset.project(&bundle.features) {
        // Requests will answer 500 until the dataset is fixed
        tracing::warn!("Dataset does not cover the model: {}", e);
    }

    tracing::info!(
        features = bundle.features.len(),
        customers = dataset.len(),
        fingerprint = %bundle.fingerprint,
        "Artifacts ready"
    );

    let source = if config.reload_dataset_per_request {
        DatasetSource::PerRequest {
            path: config.data_path.clone(),
            id_column: config.id_column.clone(),
        }
    } else {
        DatasetSource::Preloaded(Arc::new(dataset))
    };

    let scorer = Scorer::new(
        Arc::new(bundle.pipeline),
        bundle.features,
        source,
        ScoringOptions {
            coercion: config.coercion_policy,
            decision_threshold: config.decision_threshold,
        },
    );

    Ok(Artifacts {
        scorer,
        fingerprint: bundle.fingerprint,
    })
}
