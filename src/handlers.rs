use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::explain::summary::{encode_base64, render_bar_chart};
use crate::models::*;
use crate::scoring::Scorer;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Pipeline, feature list and dataset, fixed at startup.
    pub scorer: Scorer,
    /// SHA-256 of the pipeline artifacts.
    pub model_fingerprint: String,
    pub loaded_at: DateTime<Utc>,
    /// Explained responses per customer. Disabled when the dataset is re-read
    /// on every request, since rows may change between reads.
    pub explain_cache: Option<Cache<CustomerId, ScoreResponse>>,
    /// Global importance summary; computed once on first request.
    pub global_cache: Cache<(), GlobalExplanationResponse>,
}

impl AppState {
    pub fn new(config: Config, scorer: Scorer, model_fingerprint: String) -> Self {
        let explain_cache = (!config.reload_dataset_per_request).then(|| {
            Cache::builder()
                .time_to_live(Duration::from_secs(config.explain_cache_ttl_secs))
                .max_capacity(config.explain_cache_capacity)
                .build()
        });
        let global_cache = Cache::builder().max_capacity(1).build();

        Self {
            config,
            scorer,
            model_fingerprint,
            loaded_at: Utc::now(),
            explain_cache,
            global_cache,
        }
    }
}

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Credit Scoring API</title>
</head>
<body>
    <h1>Credit Scoring API</h1>
    <p>POST <code>/predict</code> with <code>{"SK_ID_CURR": 100002, "with_shap": true}</code>.</p>
    <p>See <a href="/docs">/docs</a> for the full API.</p>
</body>
</html>
"#;

/// GET /
///
/// Serves the landing page template, or a built-in page when the template
/// file is not deployed.
///
/// # Returns
///
/// * `Html<String>` - The landing page.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    match tokio::fs::read_to_string(&state.config.template_path).await {
        Ok(content) => Html(content),
        Err(e) => {
            tracing::debug!(
                "Template {} unavailable ({}), serving built-in page",
                state.config.template_path.display(),
                e
            );
            Html(FALLBACK_INDEX.to_string())
        }
    }
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_fingerprint: state.model_fingerprint.clone(),
            estimator: state.scorer.pipeline().terminal().kind().to_string(),
            feature_count: state.scorer.features().len(),
            customer_count: state.scorer.dataset().preloaded_len(),
            loaded_at: state.loaded_at,
        }),
    )
}

async fn score_blocking(
    scorer: Scorer,
    request: ScoreRequest,
) -> Result<ScoreResponse, AppError> {
    let response = tokio::task::spawn_blocking(move || {
        scorer.score(request.identifier, request.explain)
    })
    .await??;
    Ok(response)
}

/// POST /predict
///
/// Scores one customer. With `with_shap` set, also returns the per-feature
/// contributions sorted by magnitude.
///
/// The body is validated before the dataset is consulted, so a missing or
/// malformed identifier never triggers a lookup.
///
/// # Arguments
///
/// * `state` - The shared application state.
/// * `body` - The raw JSON body, or the rejection axum produced for it.
///
/// # Returns
///
/// * `Result<Json<ScoreResponse>, AppError>` - The probability and decision,
///   or a 400/404/500 error body.
#[utoipa::path(
    post,
    path = "/predict",
    request_body = PredictRequest,
    responses(
        (status = 200, description = "Default probability", body = ScoreResponse),
        (status = 400, description = "Identifier missing or malformed", body = ErrorResponse),
        (status = 404, description = "Unknown customer", body = ErrorResponse),
        (status = 500, description = "Schema mismatch or inference failure", body = ErrorResponse)
    )
)]
pub async fn predict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ScoreResponse>, AppError> {
    let Json(body) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let request = ScoreRequest::from_json(&body, &state.config.id_column)?;

    tracing::info!(
        "POST /predict - {}: {}, explain: {}",
        state.config.id_column,
        request.identifier,
        request.explain
    );

    let response = match (&state.explain_cache, request.explain) {
        (Some(cache), true) => {
            let scorer = state.scorer.clone();
            cache
                .try_get_with(request.identifier, score_blocking(scorer, request))
                .await
                .map_err(|e| (*e).clone())?
        }
        _ => score_blocking(state.scorer.clone(), request).await?,
    };

    Ok(Json(response))
}

/// GET /shap_global
///
/// Mean absolute SHAP value per feature over a random sample of customers,
/// with a base64-encoded SVG bar chart. The summary is computed once and
/// cached unless the dataset is re-read on every request.
///
/// # Arguments
///
/// * `state` - The shared application state.
///
/// # Returns
///
/// * `Result<Json<GlobalExplanationResponse>, AppError>` - The ranked
///   importances and the chart, or a 500 error body.
#[utoipa::path(
    get,
    path = "/shap_global",
    responses(
        (status = 200, description = "Global feature importance", body = GlobalExplanationResponse),
        (status = 500, description = "Attribution failure", body = ErrorResponse)
    )
)]
pub async fn shap_global(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GlobalExplanationResponse>, AppError> {
    let scorer = state.scorer.clone();
    let sample_size = state.config.global_sample_size;
    let seed = state.config.global_sample_seed;
    let max_display = state.config.global_max_display;

    let compute = async move {
        let (sampled, importances) = tokio::task::spawn_blocking(move || {
            scorer.global_importance(sample_size, seed, max_display)
        })
        .await
        .context("Global importance task failed")??;

        let svg = render_bar_chart(&importances, "Mean |SHAP value| (default class)")?;
        Ok::<_, AppError>(GlobalExplanationResponse {
            sample_size: sampled,
            importances,
            image: encode_base64(&svg),
            image_format: "image/svg+xml".to_string(),
        })
    };

    let response = if state.config.reload_dataset_per_request {
        compute.await?
    } else {
        state
            .global_cache
            .try_get_with((), compute)
            .await
            .map_err(|e| (*e).clone())?
    };

    Ok(Json(response))
}

/// GET /customers
///
/// Lists the identifiers present in the dataset, in file order.
///
/// # Returns
///
/// * `Result<Json<CustomerListResponse>, AppError>` - The identifiers, or a
///   500 error body when the identifier column is missing.
#[utoipa::path(
    get,
    path = "/customers",
    responses(
        (status = 200, description = "Known customer identifiers", body = CustomerListResponse),
        (status = 500, description = "Identifier column missing", body = ErrorResponse)
    )
)]
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CustomerListResponse>, AppError> {
    let scorer = state.scorer.clone();
    let identifiers = tokio::task::spawn_blocking(move || scorer.customer_ids()).await??;

    Ok(Json(CustomerListResponse {
        id_column: state.config.id_column.clone(),
        count: identifiers.len(),
        identifiers,
    }))
}

/// GET /customers/:id
///
/// Returns the customer's row exactly as stored in the dataset.
///
/// # Arguments
///
/// * `state` - The shared application state.
/// * `id` - The customer identifier from the path.
///
/// # Returns
///
/// * `Result<Json<CustomerRecordResponse>, AppError>` - The row keyed by
///   column, 400 for a non-integer id, or 404 for an unknown customer.
#[utoipa::path(
    get,
    path = "/customers/{id}",
    params(("id" = i64, Path, description = "Customer identifier")),
    responses(
        (status = 200, description = "Raw customer row", body = CustomerRecordResponse),
        (status = 400, description = "Identifier is not an integer", body = ErrorResponse),
        (status = 404, description = "Unknown customer", body = ErrorResponse)
    )
)]
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CustomerRecordResponse>, AppError> {
    let identifier: CustomerId = id.trim().parse().map_err(|_| {
        AppError::BadRequest(format!("Customer id must be an integer, got '{}'", id))
    })?;

    tracing::info!("GET /customers/{}", identifier);

    let scorer = state.scorer.clone();
    let record =
        tokio::task::spawn_blocking(move || scorer.customer_record(identifier)).await??;

    Ok(Json(CustomerRecordResponse { identifier, record }))
}

/// Serves the generated OpenAPI document.
///
/// The document is generated from the `utoipa::path` annotations on the
/// handlers in this module.
///
/// # Returns
///
/// * `impl IntoResponse` - The HTTP response containing the OpenAPI JSON.
pub async fn serve_openapi_spec() -> impl IntoResponse {
    use utoipa::OpenApi;
    Json(crate::openapi::ApiDoc::openapi())
}

/// Serves the Swagger UI HTML page.
///
/// This endpoint returns an HTML page that embeds the Swagger UI, configured to
/// load the OpenAPI document served by `serve_openapi_spec`.
///
/// # Returns
///
/// * `impl IntoResponse` - The HTTP response containing the Swagger UI HTML.
pub async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Credit Scoring API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}
