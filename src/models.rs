use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::errors::AppError;

/// Customer identifier as stored in the dataset's key column.
pub type CustomerId = i64;

// ============ Request Models ============

/// Body of `POST /predict`.
///
/// Only used to document the endpoint; the handler parses the raw JSON so it
/// can tell a missing identifier apart from a malformed one.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PredictRequest {
    /// Customer identifier.
    #[serde(rename = "SK_ID_CURR")]
    #[schema(example = 100002)]
    pub sk_id_curr: CustomerId,
    /// Also return per-feature SHAP contributions. Accepted as `explain` too.
    #[serde(default, alias = "explain")]
    pub with_shap: bool,
}

/// A validated scoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRequest {
    pub identifier: CustomerId,
    pub explain: bool,
}

impl ScoreRequest {
    /// Extracts the identifier and the explain flag from a JSON body.
    pub fn from_json(body: &Value, id_field: &str) -> Result<Self, AppError> {
        let identifier = match body.get(id_field) {
            None | Some(Value::Null) => {
                return Err(AppError::BadRequest(format!("Field '{}' is required", id_field)))
            }
            Some(value) => parse_identifier(value).ok_or_else(|| {
                AppError::BadRequest(format!("Field '{}' must be an integer", id_field))
            })?,
        };

        // A null flag counts as absent, so the alias still applies
        let raw_flag = ["with_shap", "explain"]
            .iter()
            .find_map(|key| body.get(*key).filter(|value| !value.is_null()));
        let explain = match raw_flag {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(AppError::BadRequest(
                    "Field 'with_shap' must be a boolean".to_string(),
                ))
            }
        };

        Ok(Self {
            identifier,
            explain,
        })
    }
}

/// Integers, and floats with no fractional part, match an integer key column.
fn parse_identifier(value: &Value) -> Option<CustomerId> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(id) = number.as_i64() {
        return Some(id);
    }
    let float = number.as_f64()?;
    if float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

// ============ Response Models ============

/// Lending decision derived from the default probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Granted,
    Refused,
}

impl Decision {
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability < threshold {
            Decision::Granted
        } else {
            Decision::Refused
        }
    }
}

/// One feature's signed contribution to the default log-odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Attribution {
    pub feature: String,
    pub contribution: f64,
    /// Aligned input value the contribution was computed for.
    pub value: f64,
}

/// Result of scoring one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoreResponse {
    /// Default probability in percent, rounded to two decimals.
    #[schema(example = 12.34)]
    pub probability: f64,
    pub decision: Decision,
    /// Expected model margin; attributions plus this equal the row's margin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    /// Sorted by descending absolute contribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributions: Option<Vec<Attribution>>,
}

/// Mean absolute contribution of one feature over a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_abs_contribution: f64,
}

/// Global attribution summary over a random sample of customers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GlobalExplanationResponse {
    pub sample_size: usize,
    pub importances: Vec<FeatureImportance>,
    /// Base64-encoded SVG bar chart of `importances`.
    pub image: String,
    #[schema(example = "image/svg+xml")]
    pub image_format: String,
}

/// Identifiers that `/predict` can score.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerListResponse {
    #[schema(example = "SK_ID_CURR")]
    pub id_column: String,
    pub count: usize,
    pub identifiers: Vec<CustomerId>,
}

/// One customer's dataset row as stored, keyed by column name.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerRecordResponse {
    pub identifier: CustomerId,
    pub record: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// SHA-256 of the loaded pipeline artifacts.
    pub model_fingerprint: String,
    pub estimator: String,
    pub feature_count: usize,
    /// Absent when the dataset is re-read on every request.
    pub customer_count: Option<usize>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_identifier_and_flag() {
        let req = ScoreRequest::from_json(&json!({"SK_ID_CURR": 100002, "with_shap": true}), "SK_ID_CURR")
            .unwrap();
        assert_eq!(req.identifier, 100002);
        assert!(req.explain);
    }

    #[test]
    fn explain_alias_is_accepted() {
        let req =
            ScoreRequest::from_json(&json!({"SK_ID_CURR": 7, "explain": true}), "SK_ID_CURR").unwrap();
        assert!(req.explain);
    }

    #[test]
    fn null_flag_falls_back_to_alias() {
        let req = ScoreRequest::from_json(
            &json!({"SK_ID_CURR": 7, "with_shap": null, "explain": true}),
            "SK_ID_CURR",
        )
        .unwrap();
        assert!(req.explain);

        let req =
            ScoreRequest::from_json(&json!({"SK_ID_CURR": 7, "with_shap": null}), "SK_ID_CURR")
                .unwrap();
        assert!(!req.explain);
    }

    #[test]
    fn whole_float_identifier_is_accepted() {
        let req = ScoreRequest::from_json(&json!({"SK_ID_CURR": 100002.0}), "SK_ID_CURR").unwrap();
        assert_eq!(req.identifier, 100002);
        assert!(!req.explain);
    }

    #[test]
    fn missing_or_null_identifier_is_bad_request() {
        for body in [json!({}), json!({"SK_ID_CURR": null}), json!([1, 2])] {
            let err = ScoreRequest::from_json(&body, "SK_ID_CURR").unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[test]
    fn wrongly_typed_fields_are_bad_request() {
        for body in [
            json!({"SK_ID_CURR": "100002"}),
            json!({"SK_ID_CURR": 1.5}),
            json!({"SK_ID_CURR": 1, "with_shap": "yes"}),
        ] {
            assert!(ScoreRequest::from_json(&body, "SK_ID_CURR").is_err());
        }
    }

    #[test]
    fn decision_threshold_is_exclusive() {
        assert_eq!(Decision::from_probability(0.49, 0.5), Decision::Granted);
        assert_eq!(Decision::from_probability(0.5, 0.5), Decision::Refused);
    }

    #[test]
    fn attributions_are_omitted_when_absent() {
        let resp = ScoreResponse {
            probability: 12.5,
            decision: Decision::Granted,
            base_value: None,
            attributions: None,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("attributions").is_none());
        assert_eq!(value["decision"], "granted");
    }
}
