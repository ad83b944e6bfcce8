//! Utility to inspect the configured model artifacts and customer dataset.
//!
//! Prints the feature list the pipeline expects, the artifact fingerprint and
//! which of those features the CSV is missing.

use credit_scoring_api::config::Config;
use credit_scoring_api::dataset::CustomerDataset;
use credit_scoring_api::model::loader::load_pipeline;

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let loaded = load_pipeline(&config.model_path, config.scaler_path.as_deref())?;
    let dataset = CustomerDataset::from_path(&config.data_path, &config.id_column)?;
    let bundle = loaded.resolve(dataset.columns(), &config.id_column)?;

    println!("Pipeline: {}", config.model_path.display());
    println!("  estimator:   {}", bundle.pipeline.terminal().kind());
    let steps: Vec<&str> = bundle.pipeline.steps.iter().map(|s| s.name()).collect();
    println!(
        "  steps:       {}",
        if steps.is_empty() {
            "(none)".to_string()
        } else {
            steps.join(" -> ")
        }
    );
    println!("  fingerprint: {}", bundle.fingerprint);
    println!();

    println!(
        "Dataset: {} ({} customers, {} columns)",
        config.data_path.display(),
        dataset.len(),
        dataset.columns().len()
    );
    println!();

    let missing: Vec<&String> = bundle
        .features
        .iter()
        .filter(|f| !dataset.columns().contains(*f))
        .collect();

    println!("Features ({}):", bundle.features.len());
    for (i, feature) in bundle.features.iter().enumerate() {
        let marker = if missing.contains(&feature) { "MISSING" } else { "ok" };
        println!("  {:>4}. {} [{}]", i, feature, marker);
    }
    println!();

    if missing.is_empty() {
        println!("Dataset covers every model feature.");
    } else {
        println!("{} feature(s) missing from the dataset.", missing.len());
        std::process::exit(1);
    }

    Ok(())
}
