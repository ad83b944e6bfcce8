use utoipa::OpenApi;

use crate::handlers;
use crate::models::{
    Attribution, CustomerListResponse, CustomerRecordResponse, Decision, ErrorResponse,
    FeatureImportance, GlobalExplanationResponse, HealthResponse, PredictRequest, ScoreResponse,
};

/// OpenAPI document for the scoring endpoints.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Credit Scoring API",
        description = "Default probability and SHAP explanations per customer"
    ),
    paths(
        handlers::predict,
        handlers::shap_global,
        handlers::list_customers,
        handlers::get_customer,
        handlers::health
    ),
    components(schemas(
        PredictRequest,
        ScoreResponse,
        Attribution,
        Decision,
        FeatureImportance,
        GlobalExplanationResponse,
        CustomerListResponse,
        CustomerRecordResponse,
        HealthResponse,
        ErrorResponse
    )),
    tags((name = "scoring", description = "Customer scoring"))
)]
pub struct ApiDoc;
