use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use plotters::prelude::*;
use plotters_svg::SVGBackend;
use thiserror::Error;

use crate::models::FeatureImportance;

const WIDTH: u32 = 760;
const ROW_HEIGHT: u32 = 28;
const CHROME_HEIGHT: u32 = 90;
// Rough glyph width of a 13px sans-serif label
const LABEL_CHAR_WIDTH: u32 = 8;

#[derive(Debug, Error)]
#[error("chart rendering failed: {0}")]
pub struct ChartError(String);

/// Horizontal bar chart of mean |SHAP| per feature, largest on top, as SVG.
///
/// The label column grows with the longest feature name so long names stay
/// inside the image.
pub fn render_bar_chart(
    importances: &[FeatureImportance],
    title: &str,
) -> Result<String, ChartError> {
    let rows = importances.len().max(1);
    let height = CHROME_HEIGHT + ROW_HEIGHT * rows as u32;
    let longest = importances
        .iter()
        .map(|i| i.feature.chars().count() as u32)
        .max()
        .unwrap_or(0);
    let label_area = (longest * LABEL_CHAR_WIDTH + 16).min(WIDTH / 2);

    let mut svg = String::new();
    draw(&mut svg, importances, title, (WIDTH, height), label_area)
        .map_err(|e| ChartError(e.to_string()))?;
    Ok(svg)
}

fn draw(
    buffer: &mut String,
    importances: &[FeatureImportance],
    title: &str,
    size: (u32, u32),
    label_area: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = importances.len().max(1);
    let x_max = importances
        .iter()
        .map(|i| i.mean_abs_contribution)
        .fold(0.0_f64, f64::max);
    let x_max = if x_max > 0.0 { x_max * 1.1 } else { 1.0 };

    // Segment 0 is drawn at the bottom, so the first (largest) feature gets the top one
    let labels: Vec<&str> = importances.iter().rev().map(|i| i.feature.as_str()).collect();

    let root = SVGBackend::with_string(buffer, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 18).into_font())
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(label_area)
        .build_cartesian_2d(0f64..x_max, (0usize..rows).into_segmented())?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(rows)
        .y_label_formatter(&|v| match v {
            SegmentValue::CenterOf(k) | SegmentValue::Exact(k) => {
                labels.get(*k).map(|s| s.to_string()).unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        })
        .x_desc("mean |SHAP value|")
        .label_style(("sans-serif", 13))
        .draw()?;

    let n = importances.len();
    chart.draw_series(
        Histogram::horizontal(&chart)
            .style(RGBColor(0x1e, 0x88, 0xe5).filled())
            .margin(4)
            .data(
                importances
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (n - 1 - i, item.mean_abs_contribution)),
            ),
    )?;

    root.present()?;
    Ok(())
}

pub fn encode_base64(svg: &str) -> String {
    BASE64.encode(svg.as_bytes())
}
