use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const PAGES_RENDERED_TOTAL: &str = "reportpress_pages_rendered_total";
pub const PAGE_RENDER_FAILURES_TOTAL: &str = "reportpress_page_render_failures_total";
pub const PAGE_RENDER_MS: &str = "reportpress_page_render_ms";
pub const GENERATION_MS: &str = "reportpress_generation_ms";
pub const ASSETS_MISSING_TOTAL: &str = "reportpress_assets_missing_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            PAGES_RENDERED_TOTAL,
            Unit::Count,
            "Total number of pages captured as PDF."
        );
        describe_counter!(
            PAGE_RENDER_FAILURES_TOTAL,
            Unit::Count,
            "Total number of page render attempts that failed."
        );
        describe_histogram!(
            PAGE_RENDER_MS,
            Unit::Milliseconds,
            "Latency of a single page render in milliseconds."
        );
        describe_histogram!(
            GENERATION_MS,
            Unit::Milliseconds,
            "End-to-end generation latency in milliseconds."
        );
        describe_counter!(
            ASSETS_MISSING_TOTAL,
            Unit::Count,
            "Total number of configured assets that could not be read at warm-up."
        );
    });
}
