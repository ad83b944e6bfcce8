//! Pipeline artifact loading.
//!
//! Three packagings are accepted:
//!
//! - a bundle: `{"pipeline": {...}, "features": ["AMT_CREDIT", ...]}`
//! - a bare pipeline: `{"steps": [...], "estimator": {...}}`
//! - either of the above plus a separately stored `standard_scaler` step
//!
//! Every artifact's bytes are folded into a SHA-256 fingerprint so a running
//! service can report exactly which model it is serving.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use super::pipeline::Pipeline;
use super::preprocess::Step;
use super::ModelError;

/// Pipeline as read from disk, before its feature list is resolved.
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub pipeline: Pipeline,
    /// Feature list shipped in the bundle, if any.
    pub features: Option<Vec<String>>,
    /// Hex-encoded SHA-256 over all artifact files that were read.
    pub fingerprint: String,
}

/// A pipeline paired with the ordered feature list it expects.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub pipeline: Pipeline,
    pub features: Vec<String>,
    pub fingerprint: String,
}

/// Fails with [`ModelError::Missing`] when `path` does not exist.
pub fn ensure_exists(path: &Path, label: &str) -> Result<(), ModelError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ModelError::Missing {
            label: label.to_string(),
            path: path.display().to_string(),
        })
    }
}

fn read_bytes(path: &Path, label: &str) -> Result<Vec<u8>, ModelError> {
    ensure_exists(path, label)?;
    std::fs::read(path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, value: Value) -> Result<T, ModelError> {
    serde_json::from_value(value).map_err(|source| ModelError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Parses a pipeline artifact from raw JSON bytes.
pub fn parse_pipeline(
    bytes: &[u8],
    path: &Path,
) -> Result<(Pipeline, Option<Vec<String>>), ModelError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| ModelError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    match value {
        Value::Object(mut map) if map.contains_key("pipeline") => {
            let pipeline = map.remove("pipeline").unwrap_or(Value::Null);
            let features = map.remove("features").unwrap_or(Value::Null);
            let pipeline: Pipeline = parse(path, pipeline)?;
            let features: Option<Vec<String>> = parse(path, features)?;
            debug!(path = %path.display(), "Parsed bundled pipeline artifact");
            Ok((pipeline, features))
        }
        other => {
            let pipeline: Pipeline = parse(path, other)?;
            debug!(path = %path.display(), "Parsed bare pipeline artifact");
            Ok((pipeline, None))
        }
    }
}

/// Reads the pipeline (and the optional separate scaler) from disk.
pub fn load_pipeline(
    model_path: &Path,
    scaler_path: Option<&Path>,
) -> Result<LoadedPipeline, ModelError> {
    let mut hasher = Sha256::new();

    let model_bytes = read_bytes(model_path, "pipeline")?;
    hasher.update(&model_bytes);
    let (mut pipeline, features) = parse_pipeline(&model_bytes, model_path)?;

    if let Some(scaler_path) = scaler_path {
        let scaler_bytes = read_bytes(scaler_path, "scaler")?;
        hasher.update(&scaler_bytes);
        let value: Value =
            serde_json::from_slice(&scaler_bytes).map_err(|source| ModelError::Parse {
                path: scaler_path.display().to_string(),
                source,
            })?;
        let scaler = scaler_step(scaler_path, value)?;
        info!(path = %scaler_path.display(), "Separate scaler prepended to pipeline");
        pipeline = pipeline.with_leading_step(scaler);
    }

    let fingerprint = hex::encode(hasher.finalize());
    info!(
        path = %model_path.display(),
        estimator = pipeline.terminal().kind(),
        steps = pipeline.steps.len(),
        fingerprint = %fingerprint,
        "Pipeline artifact loaded"
    );

    Ok(LoadedPipeline {
        pipeline,
        features,
        fingerprint,
    })
}

/// A scaler file may omit the `type` tag; it can only ever be a standard scaler.
fn scaler_step(path: &Path, mut value: Value) -> Result<Step, ModelError> {
    if let Value::Object(map) = &mut value {
        map.entry("type")
            .or_insert_with(|| Value::String("standard_scaler".to_string()));
    }
    let step: Step = parse(path, value)?;
    match step {
        Step::StandardScaler { .. } => Ok(step),
        other => Err(ModelError::Invalid(format!(
            "scaler artifact contains a {} step",
            other.name()
        ))),
    }
}

impl LoadedPipeline {
    /// Settles the expected feature list and validates the pipeline against it.
    ///
    /// Precedence: the bundle's list, then the estimator's own names, then
    /// the dataset header without the identifier column.
    pub fn resolve(
        self,
        dataset_columns: &[String],
        id_column: &str,
    ) -> Result<ModelBundle, ModelError> {
        let features = match (self.features, self.pipeline.terminal().feature_names()) {
            (Some(features), _) => features,
            (None, Some(names)) => names.to_vec(),
            (None, None) => {
                info!("Artifact carries no feature list, using dataset header");
                dataset_columns
                    .iter()
                    .filter(|c| c.as_str() != id_column)
                    .cloned()
                    .collect()
            }
        };

        if features.is_empty() {
            return Err(ModelError::Invalid("expected feature list is empty".to_string()));
        }
        self.pipeline.validate(features.len())?;

        Ok(ModelBundle {
            pipeline: self.pipeline,
            features,
            fingerprint: self.fingerprint,
        })
    }
}
