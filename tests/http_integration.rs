/// End-to-end tests of the HTTP surface
/// Builds the router over temporary artifacts and drives it with `oneshot`
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use credit_scoring_api::artifacts;
use credit_scoring_api::config::Config;
use credit_scoring_api::dataset::CoercionPolicy;
use credit_scoring_api::handlers::AppState;
use credit_scoring_api::routes;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const MODEL: &str = r#"{
    "pipeline": {
        "steps": [
            {"type": "simple_imputer", "statistics": [500000.0, 150000.0, 0.5]}
        ],
        "estimator": {
            "type": "tree_ensemble",
            "base_score": -0.5,
            "trees": [
                {"nodes": [
                    {"feature": 0, "threshold": 500000.0, "left": 1, "right": 2, "cover": 100.0},
                    {"feature": 2, "threshold": 0.4, "left": 3, "right": 4, "cover": 60.0},
                    {"leaf": 0.9, "cover": 40.0},
                    {"leaf": 0.6, "cover": 25.0},
                    {"leaf": -0.7, "cover": 35.0}
                ]},
                {"nodes": [
                    {"feature": 1, "threshold": 120000.0, "left": 1, "right": 2, "cover": 100.0},
                    {"leaf": 0.3, "cover": 30.0},
                    {"leaf": -0.2, "cover": 70.0}
                ]}
            ]
        }
    },
    "features": ["AMT_CREDIT", "AMT_INCOME_TOTAL", "EXT_SOURCE_2"]
}"#;

const CSV: &str = "\
SK_ID_CURR,EXT_SOURCE_2,NAME_CONTRACT_TYPE,AMT_INCOME_TOTAL,AMT_CREDIT
100002,0.262949,Cash loans,202500,406597.5
100003,0.622246,Cash loans,270000,1293502.5
100004,0.555912,Revolving loans,abc,135000
";

fn write_artifacts(csv: &str) -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("pipeline.json");
    let data_path = dir.path().join("features_for_prediction.csv");
    std::fs::write(&model_path, MODEL).unwrap();
    std::fs::write(&data_path, csv).unwrap();
    let config = Config {
        model_path,
        data_path,
        template_path: dir.path().join("missing_index.html"),
        global_sample_size: 10,
        ..Config::default()
    };
    (dir, config)
}

fn app_from(config: Config) -> Router {
    let loaded = artifacts::load(&config).unwrap();
    let state = Arc::new(AppState::new(config, loaded.scorer, loaded.fingerprint));
    routes::app(state)
}

fn test_app() -> (TempDir, Router) {
    let (dir, config) = write_artifacts(CSV);
    (dir, app_from(config))
}

async fn post_predict(app: Router, body: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_known_customer_is_scored() {
    let (_dir, app) = test_app();
    let (status, body) = post_predict(app, r#"{"SK_ID_CURR": 100002}"#).await;

    assert_eq!(status, StatusCode::OK);
    // AMT_CREDIT <= 500000 and EXT_SOURCE_2 <= 0.4 -> 0.6; income > 120000 -> -0.2
    let margin: f64 = -0.5 + 0.6 - 0.2;
    let expected = (100.0 / (1.0 + (-margin).exp()) * 100.0).round() / 100.0;
    assert_eq!(body["probability"].as_f64().unwrap(), expected);
    assert_eq!(body["decision"], "granted");
    assert!(body.get("attributions").is_none());
}

#[tokio::test]
async fn test_attributions_cover_every_feature_and_add_up() {
    let (_dir, app) = test_app();
    let (status, body) =
        post_predict(app, r#"{"SK_ID_CURR": 100003, "with_shap": true}"#).await;

    assert_eq!(status, StatusCode::OK);
    let attributions = body["attributions"].as_array().unwrap();
    assert_eq!(attributions.len(), 3);

    let magnitudes: Vec<f64> = attributions
        .iter()
        .map(|a| a["contribution"].as_f64().unwrap().abs())
        .collect();
    assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));

    // AMT_CREDIT > 500000 -> 0.9; income > 120000 -> -0.2
    let margin = -0.5 + 0.9 - 0.2;
    let total: f64 = attributions
        .iter()
        .map(|a| a["contribution"].as_f64().unwrap())
        .sum::<f64>()
        + body["base_value"].as_f64().unwrap();
    assert!((total - margin).abs() < 1e-9);
}

#[tokio::test]
async fn test_explained_response_is_stable_across_calls() {
    let (_dir, app) = test_app();
    let body = r#"{"SK_ID_CURR": 100002, "with_shap": true}"#;
    let (_, first) = post_predict(app.clone(), body).await;
    let (_, second) = post_predict(app, body).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unknown_customer_is_not_found() {
    let (_dir, app) = test_app();
    let (status, body) = post_predict(app, r#"{"SK_ID_CURR": 999999}"#).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999999"));
}

#[tokio::test]
async fn test_missing_identifier_is_bad_request() {
    let (_dir, app) = test_app();
    let (status, body) = post_predict(app, r#"{"with_shap": true}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Field 'SK_ID_CURR' is required");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (_dir, app) = test_app();
    let (status, body) = post_predict(app, "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_string_identifier_is_bad_request() {
    let (_dir, app) = test_app();
    let (status, _) = post_predict(app, r#"{"SK_ID_CURR": "100002"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_numeric_cell_follows_coercion_policy() {
    let (_dir, app) = test_app();
    let (status, body) =
        post_predict(app, r#"{"SK_ID_CURR": 100004, "with_shap": true}"#).await;
    assert_eq!(status, StatusCode::OK);
    let income = body["attributions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["feature"] == "AMT_INCOME_TOTAL")
        .unwrap();
    assert_eq!(income["value"].as_f64().unwrap(), 0.0);

    let (_dir, mut config) = write_artifacts(CSV);
    config.coercion_policy = CoercionPolicy::Reject;
    let (status, _) = post_predict(app_from(config), r#"{"SK_ID_CURR": 100004}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_missing_id_column_is_server_error() {
    let (_dir, config) =
        write_artifacts("CUSTOMER,AMT_CREDIT,AMT_INCOME_TOTAL,EXT_SOURCE_2\n100002,1,2,0.3\n");
    let (status, body) = post_predict(app_from(config), r#"{"SK_ID_CURR": 100002}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("SK_ID_CURR"));
}

#[tokio::test]
async fn test_reload_mode_sees_dataset_changes() {
    let (_dir, mut config) = write_artifacts(CSV);
    config.reload_dataset_per_request = true;
    let data_path = config.data_path.clone();
    let app = app_from(config);

    let (status, _) = post_predict(app.clone(), r#"{"SK_ID_CURR": 100005}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let appended = format!("{}100005,0.5,Cash loans,100000,200000\n", CSV);
    std::fs::write(&data_path, appended).unwrap();
    let (status, _) = post_predict(app, r#"{"SK_ID_CURR": 100005}"#).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_global_importance() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app, "/shap_global").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["sample_size"], 3);
    assert_eq!(body["image_format"], "image/svg+xml");
    assert!(!body["image"].as_str().unwrap().is_empty());

    let importances = body["importances"].as_array().unwrap();
    assert!(!importances.is_empty() && importances.len() <= 3);
    let values: Vec<f64> = importances
        .iter()
        .map(|i| i["mean_abs_contribution"].as_f64().unwrap())
        .collect();
    assert!(values.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_index_falls_back_to_builtin_page() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(bytes).unwrap().contains("/predict"));
}

#[tokio::test]
async fn test_index_serves_template() {
    let (dir, mut config) = write_artifacts(CSV);
    let template = dir.path().join("index.html");
    std::fs::write(&template, "<h1>Scoring</h1>").unwrap();
    config.template_path = template;

    let (status, bytes) = get(app_from(config), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"<h1>Scoring</h1>");
}

#[tokio::test]
async fn test_health_reports_model() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["estimator"], "tree_ensemble");
    assert_eq!(body["feature_count"], 3);
    assert_eq!(body["customer_count"], 3);
    assert_eq!(body["model_fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app, "/api-docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    let doc: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(doc["paths"]["/predict"].is_object());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (_dir, mut config) = write_artifacts(CSV);
    config.max_body_bytes = 32;
    let padding = "x".repeat(128);
    let (status, _) = post_predict(
        app_from(config),
        &json!({"SK_ID_CURR": 100002, "note": padding}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_missing_identifier_never_reads_dataset() {
    let (_dir, mut config) = write_artifacts(CSV);
    config.reload_dataset_per_request = true;
    let data_path = config.data_path.clone();
    let app = app_from(config);
    std::fs::remove_file(&data_path).unwrap();

    let (status, body) = post_predict(app.clone(), r#"{"with_shap": true}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Field 'SK_ID_CURR' is required");

    // A well-formed request does need the file
    let (status, _) = post_predict(app, r#"{"SK_ID_CURR": 100002}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cors_headers_on_responses() {
    let (_dir, app) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://dashboard.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_customer_listing() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app, "/customers").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id_column"], "SK_ID_CURR");
    assert_eq!(body["count"], 3);
    assert_eq!(body["identifiers"], json!([100002, 100003, 100004]));
}

#[tokio::test]
async fn test_customer_record() {
    let (_dir, app) = test_app();
    let (status, bytes) = get(app.clone(), "/customers/100004").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["identifier"], 100004);
    assert_eq!(body["record"]["NAME_CONTRACT_TYPE"], "Revolving loans");
    assert_eq!(body["record"]["AMT_INCOME_TOTAL"], "abc");
    assert_eq!(body["record"].as_object().unwrap().len(), 5);

    let (status, _) = get(app.clone(), "/customers/999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app, "/customers/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_short_rows_are_scored() {
    let csv = format!("{}100005,0.3\n", CSV);
    let (_dir, config) = write_artifacts(&csv);
    let (status, body) =
        post_predict(app_from(config), r#"{"SK_ID_CURR": 100005, "with_shap": true}"#).await;
    assert_eq!(status, StatusCode::OK);
    let credit = body["attributions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["feature"] == "AMT_CREDIT")
        .unwrap();
    assert_eq!(credit["value"].as_f64().unwrap(), 0.0);
}
