//! Credit Scoring API Library
//!
//! Scores loan applicants with a pre-trained classification pipeline and a
//! table of precomputed customer features, and explains each score with
//! SHAP values.
//!
//! # Modules
//!
//! - `artifacts`: Startup loading of the pipeline and dataset.
//! - `config`: Configuration management.
//! - `dataset`: Customer feature table, column alignment and coercion.
//! - `errors`: Error handling types.
//! - `explain`: Per-row and global feature attribution.
//! - `handlers`: HTTP request handlers.
//! - `model`: Pipeline steps, estimators and artifact parsing.
//! - `models`: Request and response models.
//! - `openapi`: OpenAPI document.
//! - `routes`: Router assembly.
//! - `scoring`: The lookup → align → infer → explain operation.

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod explain;
pub mod handlers;
pub mod model;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod scoring;
