use serde::Deserialize;
use std::path::PathBuf;

use crate::dataset::CoercionPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub model_path: PathBuf,
    pub scaler_path: Option<PathBuf>, // Only for artifacts that ship the scaler separately
    pub data_path: PathBuf,
    pub template_path: PathBuf,
    pub id_column: String,
    pub coercion_policy: CoercionPolicy,
    pub decision_threshold: f64,
    pub reload_dataset_per_request: bool,
    pub global_sample_size: usize,
    pub global_sample_seed: u64,
    pub global_max_display: usize,
    pub explain_cache_ttl_secs: u64,
    pub explain_cache_capacity: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            model_path: PathBuf::from("Simulations/Best_model/lgbm_pipeline1.json"),
            scaler_path: None,
            data_path: PathBuf::from("Simulations/Data/features_for_prediction.csv"),
            template_path: PathBuf::from("templates/index.html"),
            id_column: "SK_ID_CURR".to_string(),
            coercion_policy: CoercionPolicy::Zero,
            decision_threshold: 0.5,
            reload_dataset_per_request: false,
            global_sample_size: 1000,
            global_sample_seed: 42,
            global_max_display: 10,
            explain_cache_ttl_secs: 600,
            explain_cache_capacity: 10_000,
            rate_limit_per_second: 20,
            rate_limit_burst: 40,
            max_body_bytes: 64 * 1024,
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

fn path_var(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn bool_var(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be a boolean, got {}", name, raw),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            model_path: path_var("MODEL_PATH", defaults.model_path),
            scaler_path: std::env::var("SCALER_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            data_path: path_var("DATA_PATH", defaults.data_path),
            template_path: path_var("TEMPLATE_PATH", defaults.template_path),
            id_column: std::env::var("ID_COLUMN")
                .unwrap_or(defaults.id_column)
                .trim()
                .to_string(),
            coercion_policy: match std::env::var("COERCION_POLICY") {
                Ok(raw) if !raw.trim().is_empty() => {
                    raw.parse().map_err(|e: String| anyhow::anyhow!(e))?
                }
                _ => defaults.coercion_policy,
            },
            decision_threshold: parsed("DECISION_THRESHOLD", defaults.decision_threshold)?,
            reload_dataset_per_request: bool_var(
                "RELOAD_DATASET_PER_REQUEST",
                defaults.reload_dataset_per_request,
            )?,
            global_sample_size: parsed("GLOBAL_SAMPLE_SIZE", defaults.global_sample_size)?,
            global_sample_seed: parsed("GLOBAL_SAMPLE_SEED", defaults.global_sample_seed)?,
            global_max_display: parsed("GLOBAL_MAX_DISPLAY", defaults.global_max_display)?,
            explain_cache_ttl_secs: parsed(
                "EXPLAIN_CACHE_TTL_SECS",
                defaults.explain_cache_ttl_secs,
            )?,
            explain_cache_capacity: parsed(
                "EXPLAIN_CACHE_CAPACITY",
                defaults.explain_cache_capacity,
            )?,
            rate_limit_per_second: parsed("RATE_LIMIT_PER_SECOND", defaults.rate_limit_per_second)?,
            rate_limit_burst: parsed("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            max_body_bytes: parsed("MAX_BODY_BYTES", defaults.max_body_bytes)?,
        };

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Model path: {}", config.model_path.display());
        if let Some(ref scaler) = config.scaler_path {
            tracing::info!("Separate scaler configured: {}", scaler.display());
        }
        tracing::debug!("Data path: {}", config.data_path.display());
        tracing::debug!(
            "Coercion policy: {:?}, reload per request: {}",
            config.coercion_policy,
            config.reload_dataset_per_request
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id_column.is_empty() {
            anyhow::bail!("ID_COLUMN cannot be empty");
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            anyhow::bail!("DECISION_THRESHOLD must be strictly between 0 and 1");
        }
        if self.global_sample_size == 0 {
            anyhow::bail!("GLOBAL_SAMPLE_SIZE must be positive");
        }
        if self.global_max_display == 0 {
            anyhow::bail!("GLOBAL_MAX_DISPLAY must be positive");
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be positive");
        }
        Ok(())
    }
}
