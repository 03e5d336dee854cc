//! SVG charts for training and evaluation output
//!
//! Charts are rendered into strings so they can be inspected in tests and
//! written wherever the caller wants.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::metrics::ConfusionMatrix;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const HEATMAP_CELL: f64 = 70.0;
const HEATMAP_MARGIN_LEFT: f64 = 160.0;
const HEATMAP_MARGIN_TOP: f64 = 70.0;
const HEATMAP_MARGIN_BOTTOM: f64 = 140.0;
const HEATMAP_MARGIN_RIGHT: f64 = 40.0;

const COLOR_PRIMARY: &str = "#3498db";
const COLOR_SECONDARY: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const FONT: &str = "Arial, sans-serif";

/// One named line on a line chart
#[derive(Debug, Clone)]
pub struct LossSeries {
    pub name: String,
    /// Value per epoch, epoch numbers start at 1
    pub values: Vec<f64>,
    pub color: String,
}

impl LossSeries {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
            color: COLOR_PRIMARY.to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Training and validation loss per epoch
pub fn render_loss_curve(train: &[f64], valid: &[f64]) -> String {
    let series = [
        LossSeries::new("train", train.to_vec()),
        LossSeries::new("validation", valid.to_vec()).with_color(COLOR_SECONDARY),
    ];
    render_line_chart("Loss per Epoch", "Epoch", "Loss", &series)
}

pub fn render_line_chart(title: &str, x_label: &str, y_label: &str, series: &[LossSeries]) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let epochs = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let y_max = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let x_of = |epoch: usize| {
        if epochs <= 1 {
            MARGIN_LEFT + plot_width / 2.0
        } else {
            MARGIN_LEFT + ((epoch - 1) as f64 / (epochs - 1) as f64) * plot_width
        }
    };
    let y_of = |value: f64| MARGIN_TOP + plot_height - (value / y_max) * plot_height;

    let mut svg = svg_open(CHART_WIDTH, CHART_HEIGHT);
    svg.push_str(&title_text(CHART_WIDTH / 2.0, title));

    for i in 0..=5 {
        let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
        let value = (i as f64 / 5.0) * y_max;
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{:.3}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, FONT, COLOR_TEXT, value
        ));
    }

    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    ));

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, FONT, COLOR_TEXT, escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, FONT, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    ));

    for epoch in 1..=epochs {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{}</text>"#,
            x_of(epoch), MARGIN_TOP + plot_height + 20.0, FONT, COLOR_TEXT, epoch
        ));
    }

    for s in series {
        let points: Vec<(f64, f64)> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (x_of(i + 1), y_of(v)))
            .collect();
        if points.is_empty() {
            continue;
        }

        let path = points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| format!("{} {} {}", if i == 0 { "M" } else { "L" }, x, y))
            .collect::<Vec<_>>()
            .join(" ");
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path, s.color
        ));
        for (x, y) in points {
            svg.push_str(&format!(
                r#"<circle cx="{}" cy="{}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                x, y, s.color
            ));
        }
    }

    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 110.0, legend_y, s.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 90.0, legend_y + 12.0, FONT, COLOR_TEXT, escape_xml(&s.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

/// Annotated heatmap of a confusion matrix, true classes on rows
pub fn render_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> String {
    let n = cm.num_classes;
    let grid = n as f64 * HEATMAP_CELL;
    let width = HEATMAP_MARGIN_LEFT + grid + HEATMAP_MARGIN_RIGHT;
    let height = HEATMAP_MARGIN_TOP + grid + HEATMAP_MARGIN_BOTTOM;
    let max_count = cm.max_count().max(1) as f64;

    let name = |i: usize| {
        class_names
            .get(i)
            .map(String::as_str)
            .map(escape_xml)
            .unwrap_or_else(|| i.to_string())
    };

    let mut svg = svg_open(width, height);
    svg.push_str(&title_text(HEATMAP_MARGIN_LEFT + grid / 2.0, "Confusion Matrix"));

    for row in 0..n {
        for col in 0..n {
            let count = cm.get(row, col);
            let intensity = count as f64 / max_count;
            let x = HEATMAP_MARGIN_LEFT + col as f64 * HEATMAP_CELL;
            let y = HEATMAP_MARGIN_TOP + row as f64 * HEATMAP_CELL;
            let text_color = if intensity > 0.5 { "white" } else { COLOR_TEXT };

            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x, y, HEATMAP_CELL, HEATMAP_CELL, blue_shade(intensity)
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">{}</text>"#,
                x + HEATMAP_CELL / 2.0, y + HEATMAP_CELL / 2.0 + 5.0, FONT, text_color, count
            ));
        }
    }

    for i in 0..n {
        let center = i as f64 * HEATMAP_CELL + HEATMAP_CELL / 2.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            HEATMAP_MARGIN_LEFT - 8.0, HEATMAP_MARGIN_TOP + center + 4.0, FONT, COLOR_TEXT, name(i)
        ));
        let x = HEATMAP_MARGIN_LEFT + center;
        let y = HEATMAP_MARGIN_TOP + grid + 14.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}" transform="rotate(-45 {} {})">{}</text>"#,
            x, y, FONT, COLOR_TEXT, x, y, name(i)
        ));
    }

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">Predicted Labels</text>"#,
        HEATMAP_MARGIN_LEFT + grid / 2.0, height - 20.0, FONT, COLOR_TEXT
    ));
    let label_y = HEATMAP_MARGIN_TOP + grid / 2.0;
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">True Labels</text>"#,
        label_y, FONT, COLOR_TEXT, label_y
    ));

    svg.push_str("</svg>");
    svg
}

/// Write an SVG document, creating parent directories
pub fn write_svg(svg: &str, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(output_path, svg)
        .with_context(|| format!("Failed to write chart to {}", output_path.display()))
}

fn svg_open(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}"><rect width="{}" height="{}" fill="white"/>"#,
        width, height, width, height, width, height
    )
}

fn title_text(x: f64, title: &str) -> String {
    format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        x, FONT, COLOR_TEXT, escape_xml(title)
    )
}

/// White to dark blue
fn blue_shade(intensity: f64) -> String {
    let t = intensity.clamp(0.0, 1.0);
    let lerp = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
