//! Feature attribution: per-row SHAP values, global importance and its chart.

pub mod attribution;
pub mod global;
pub mod summary;

pub use attribution::{
    explain_pipeline, positive_class_contributions, AttributionError, Contributions, Explainer,
    RawAttribution, POSITIVE_CLASS,
};
