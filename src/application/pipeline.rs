//! Render every page template for one request with bounded concurrency.

use std::{num::NonZeroU32, time::Instant};

use futures::{StreamExt, TryStreamExt, stream};
use metrics::{counter, histogram};
use minijinja::{Value, context};
use serde_json::Map;
use tracing::{info, warn};

use crate::{
    application::{
        assets::AssetCache,
        error::{GenerateError, PageError},
        style::SharedRenderContext,
        templates::{PageTemplate, TemplateCache},
    },
    config::EngineSettings,
    domain::{PageBuffer, error::DomainError},
    infra::{
        engine::RenderEngine,
        telemetry::{PAGE_RENDER_FAILURES_TOTAL, PAGE_RENDER_MS, PAGES_RENDERED_TOTAL},
    },
};

/// Names the pipeline injects into every page; data fields with these names are shadowed.
pub const RESERVED_GLOBALS: [&str; 6] = [
    "fonts",
    "styles",
    "page_styles",
    "assets",
    "asset_uris",
    "page",
];

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub concurrency: NonZeroU32,
    pub retries: u32,
}

impl From<&EngineSettings> for PipelineOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            concurrency: settings.page_concurrency,
            retries: settings.page_retries,
        }
    }
}

/// Everything shared by the pages of one request.
pub struct PageInputs<'a> {
    pub templates: &'a TemplateCache,
    pub shared: &'a SharedRenderContext,
    pub assets: &'a AssetCache,
    pub engine: &'a dyn RenderEngine,
}

/// Produce one buffer per template, in template order.
///
/// Pages run concurrently up to `options.concurrency`; results are delivered in
/// index order whatever order they finish in. The first irrecoverable failure
/// cancels the pages still in flight.
pub async fn run(
    inputs: &PageInputs<'_>,
    data: &Map<String, serde_json::Value>,
    options: PipelineOptions,
) -> Result<Vec<PageBuffer>, GenerateError> {
    let started_at = Instant::now();
    let record: Vec<(String, Value)> = data
        .iter()
        .filter(|(key, _)| !RESERVED_GLOBALS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), Value::from_serialize(value)))
        .collect();

    let pages = inputs.templates.pages();
    let total = pages.len();
    let buffers: Vec<PageBuffer> = stream::iter(
        pages
            .iter()
            .enumerate()
            .map(|(position, page)| render_one(inputs, &record, page, position, total, options.retries)),
    )
    .buffered(options.concurrency.get() as usize)
    .try_collect()
    .await?;

    verify_order(pages, &buffers)?;

    info!(
        target = "reportpress::application::pipeline",
        op = "run",
        result = "ok",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        pages = buffers.len(),
        concurrency = options.concurrency.get(),
        "All pages rendered"
    );
    Ok(buffers)
}

async fn render_one(
    inputs: &PageInputs<'_>,
    record: &[(String, Value)],
    page: &PageTemplate,
    position: usize,
    total: usize,
    retries: u32,
) -> Result<PageBuffer, GenerateError> {
    let context = page_context(inputs, record, page, position, total);
    let markup = inputs
        .templates
        .render(page, context)
        .map_err(|err| GenerateError::page(page.index, PageError::Template(err)))?;

    let mut attempt = 0;
    loop {
        let started_at = Instant::now();
        let outcome = inputs.engine.render_page(&markup).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match outcome {
            Ok(bytes) if !bytes.is_empty() => {
                counter!(PAGES_RENDERED_TOTAL).increment(1);
                histogram!(PAGE_RENDER_MS).record(elapsed_ms as f64);
                info!(
                    target = "reportpress::application::pipeline",
                    op = "render_page",
                    result = "ok",
                    elapsed_ms,
                    index = page.index,
                    template = %page.name,
                    bytes = bytes.len(),
                    attempt,
                    "Page rendered"
                );
                return Ok(PageBuffer::new(page.index, bytes));
            }
            Ok(_) => {
                counter!(PAGE_RENDER_FAILURES_TOTAL).increment(1);
                return Err(GenerateError::page(page.index, PageError::EmptyCapture));
            }
            Err(err) => {
                counter!(PAGE_RENDER_FAILURES_TOTAL).increment(1);
                if err.is_fatal() {
                    warn!(
                        target = "reportpress::application::pipeline",
                        op = "render_page",
                        result = "engine_lost",
                        elapsed_ms,
                        index = page.index,
                        error = %err,
                        "Render engine lost while rendering page"
                    );
                    return Err(GenerateError::EngineUnavailable);
                }
                if attempt < retries {
                    attempt += 1;
                    warn!(
                        target = "reportpress::application::pipeline",
                        op = "render_page",
                        result = "retry",
                        elapsed_ms,
                        index = page.index,
                        attempt,
                        error = %err,
                        "Page render failed; retrying"
                    );
                    continue;
                }
                warn!(
                    target = "reportpress::application::pipeline",
                    op = "render_page",
                    result = "error",
                    elapsed_ms,
                    index = page.index,
                    error = %err,
                    "Page render failed"
                );
                return Err(GenerateError::page(page.index, PageError::Engine(err)));
            }
        }
    }
}

/// Data fields at the top level, in record order, followed by the reserved globals.
fn page_context(
    inputs: &PageInputs<'_>,
    record: &[(String, Value)],
    page: &PageTemplate,
    position: usize,
    total: usize,
) -> Value {
    let globals = [
        ("fonts", inputs.shared.fonts_value()),
        ("styles", inputs.shared.styles_value()),
        (
            "page_styles",
            Value::from_safe_string(page.page_styles.clone().unwrap_or_default()),
        ),
        ("assets", inputs.assets.payloads_value()),
        ("asset_uris", inputs.assets.uris_value()),
        (
            "page",
            context! {
                index => page.index,
                name => page.name.as_str(),
                number => position + 1,
                count => total,
            },
        ),
    ];
    record
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .chain(globals.into_iter().map(|(key, value)| (key.to_string(), value)))
        .collect()
}

fn verify_order(pages: &[PageTemplate], buffers: &[PageBuffer]) -> Result<(), DomainError> {
    if pages.len() != buffers.len() {
        return Err(DomainError::invariant(format!(
            "expected {} page buffers, got {}",
            pages.len(),
            buffers.len()
        )));
    }
    for (page, buffer) in pages.iter().zip(buffers) {
        if page.index != buffer.index {
            return Err(DomainError::invariant(format!(
                "page buffer for index {} arrived where index {} belongs",
                buffer.index, page.index
            )));
        }
    }
    Ok(())
}
