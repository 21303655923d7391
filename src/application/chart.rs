//! Radar chart enrichment for data records.
//!
//! Reads labelled 0-100 scores from the record, draws them as an SVG radar
//! chart and stores the base64 SVG back into the record for templates.

use std::f64::consts::PI;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::ChartSettings;

const MAX_VALUE: f64 = 100.0;
const GRID_STEPS: [f64; 4] = [25.0, 50.0, 75.0, 100.0];
const MIN_AXES: usize = 3;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart source `{pointer}` is missing from the data record")]
    MissingSource { pointer: String },
    #[error("chart source `{pointer}` must be an object or an array")]
    NotACollection { pointer: String },
    #[error("chart entry {position} is invalid: {reason}")]
    InvalidEntry { position: usize, reason: String },
    #[error("a radar chart needs at least three entries, found {found}")]
    TooFewEntries { found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadarPoint {
    pub label: String,
    pub value: f64,
}

/// Insert the chart under `settings.target`, replacing any existing value.
pub fn enrich(
    mut data: Map<String, Value>,
    settings: &ChartSettings,
) -> Result<Map<String, Value>, ChartError> {
    let source = lookup(&data, &settings.source).ok_or_else(|| ChartError::MissingSource {
        pointer: settings.source.clone(),
    })?;
    let points = extract_points(source, settings)?;
    let svg = render_svg(&points);
    data.insert(
        settings.target.clone(),
        Value::String(STANDARD.encode(svg.as_bytes())),
    );

    debug!(
        target = "reportpress::application::chart",
        op = "enrich",
        axes = points.len(),
        field = %settings.target,
        "Radar chart added to data record"
    );
    Ok(data)
}

/// Resolve a JSON pointer against the top-level record.
fn lookup<'a>(data: &'a Map<String, Value>, pointer: &str) -> Option<&'a Value> {
    let path = pointer.strip_prefix('/')?;
    let (first, rest) = match path.split_once('/') {
        Some((first, rest)) => (first, format!("/{rest}")),
        None => (path, String::new()),
    };
    let key = first.replace("~1", "/").replace("~0", "~");
    data.get(&key)?.pointer(&rest)
}

/// Read the labelled scores from the chart source value.
pub fn extract_points(
    source: &Value,
    settings: &ChartSettings,
) -> Result<Vec<RadarPoint>, ChartError> {
    let entries: Vec<&Value> = match source {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => {
            return Err(ChartError::NotACollection {
                pointer: settings.source.clone(),
            });
        }
    };

    if entries.len() < MIN_AXES {
        return Err(ChartError::TooFewEntries {
            found: entries.len(),
        });
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| point_from_entry(position, entry, settings))
        .collect()
}

fn point_from_entry(
    position: usize,
    entry: &Value,
    settings: &ChartSettings,
) -> Result<RadarPoint, ChartError> {
    let invalid = |reason: String| ChartError::InvalidEntry { position, reason };

    let label = match entry.get(&settings.label_field) {
        Some(Value::String(label)) => label.clone(),
        Some(other) => other.to_string(),
        None => return Err(invalid(format!("missing `{}`", settings.label_field))),
    };

    let value = match entry.get(&settings.value_field) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(format!("`{}` must be a number", settings.value_field)))?;

    if !(0.0..=MAX_VALUE).contains(&value) {
        return Err(invalid(format!("value {value} is outside 0-100")));
    }

    Ok(RadarPoint { label, value })
}

/// Axis angles: the first axis points straight up, the rest follow clockwise.
fn axis_angles(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| PI / 2.0 - 2.0 * PI * i as f64 / count as f64)
        .collect()
}

/// Chart coordinates have y pointing up; SVG has y pointing down.
fn to_svg(radius: f64, theta: f64) -> (f64, f64) {
    (radius * theta.cos(), -(radius * theta.sin()))
}

fn polygon_points(radii: impl Iterator<Item = f64>, angles: &[f64]) -> String {
    radii
        .zip(angles)
        .map(|(radius, theta)| {
            let (x, y) = to_svg(radius, *theta);
            format!("{x:.2},{y:.2}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_svg(points: &[RadarPoint]) -> String {
    let angles = axis_angles(points.len());
    let mut svg = String::from(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"-120 -120 240 240\" width=\"480\" height=\"480\">\n",
    );
    let title: Vec<&str> = points.iter().map(|point| point.label.as_str()).collect();
    svg.push_str(&format!("<title>{}</title>\n", escape_xml(&title.join(", "))));

    for step in GRID_STEPS {
        let outline = polygon_points(std::iter::repeat_n(step, angles.len()), &angles);
        let line = if step == MAX_VALUE {
            format!(
                r##"<polygon points="{outline}" fill="none" stroke="#333333" stroke-width="1.5"/>"##
            )
        } else {
            format!(
                r#"<polygon points="{outline}" fill="none" stroke="gray" stroke-width="0.5" stroke-dasharray="3 2" stroke-opacity="0.7"/>"#
            )
        };
        svg.push_str(&line);
        svg.push('\n');
    }

    for theta in &angles {
        let (x, y) = to_svg(MAX_VALUE, *theta);
        svg.push_str(&format!(
            r#"<line x1="0" y1="0" x2="{x:.2}" y2="{y:.2}" stroke="gray" stroke-width="0.5" stroke-dasharray="3 2" stroke-opacity="0.5"/>"#
        ));
        svg.push('\n');
    }

    let label_angle = -PI / 6.0;
    for step in GRID_STEPS {
        let (x, y) = to_svg(step * 0.9, label_angle);
        svg.push_str(&format!(
            r#"<text x="{x:.2}" y="{y:.2}" text-anchor="end" dominant-baseline="hanging" font-family="Arial" font-size="9" fill="gray">{step:.0}%</text>"#
        ));
        svg.push('\n');
    }

    let data = polygon_points(points.iter().map(|point| point.value), &angles);
    svg.push_str(&format!(
        r##"<polygon points="{data}" fill="#E6E6FA" fill-opacity="0.2" stroke="#6A1B9A" stroke-width="2"/>"##
    ));
    svg.push('\n');
    svg.push_str(r#"<circle cx="0" cy="0" r="3" fill="black"/>"#);
    svg.push('\n');
    svg.push_str(
        r#"<text x="0" y="4" text-anchor="middle" dominant-baseline="hanging" font-family="Arial" font-size="9" fill="black">0%</text>"#,
    );
    svg.push_str("\n</svg>\n");
    svg
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
