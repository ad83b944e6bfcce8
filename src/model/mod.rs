//! Inference pipeline: preprocessing steps, terminal estimators and artifact loading.

pub mod estimator;
pub mod loader;
pub mod pipeline;
pub mod preprocess;
pub mod tree;

pub use estimator::Estimator;
pub use loader::{load_pipeline, LoadedPipeline, ModelBundle};
pub use pipeline::Pipeline;
pub use preprocess::Step;
pub use tree::{Node, Tree};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{label} file not found: {path}")]
    Missing { label: String, path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("{stage} expects {expected} features, got {actual}")]
    Width {
        stage: String,
        expected: usize,
        actual: usize,
    },
}
