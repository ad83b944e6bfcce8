use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::handlers::{self, AppState};

/// Endpoints that read the dataset or run the model. Kept separate so callers
/// can put a rate limiter in front of them only.
pub fn scoring_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict", post(handlers::predict))
        .route("/shap_global", get(handlers::shap_global))
        .route("/customers", get(handlers::list_customers))
        .route("/customers/:id", get(handlers::get_customer))
}

/// Landing page, health check and API documentation.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/docs", get(handlers::serve_swagger_ui))
        .route("/api-docs/openapi.json", get(handlers::serve_openapi_spec))
}

/// Assembles the application around an already-layered set of scoring routes.
pub fn build_router(state: Arc<AppState>, scoring: Router<Arc<AppState>>) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    public_routes()
        .merge(scoring)
        .with_state(state)
        // Request size limit sits below the trace/CORS stack
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// The full application without rate limiting.
pub fn app(state: Arc<AppState>) -> Router {
    build_router(state, scoring_routes())
}
