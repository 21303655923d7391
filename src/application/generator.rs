//! Generation orchestrator: warm caches once, keep one engine, run requests.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::histogram;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::{
    application::{
        assemble::assemble_blocking,
        assets::AssetCache,
        chart,
        error::{GenerateError, RequestError, SetupError},
        pipeline::{self, PageInputs, PipelineOptions},
        style::{self, SharedRenderContext},
        templates::TemplateCache,
    },
    config::Settings,
    domain::GenerationRequest,
    infra::{
        engine::{ChromeLauncher, ChromeOptions, EngineError, EngineLauncher, RenderEngine},
        output,
        telemetry::GENERATION_MS,
    },
    util::bytes::format_bytes,
};

/// Process-lifetime caches, built by the first warm-up and never rebuilt.
#[derive(Debug)]
pub struct WarmState {
    pub assets: AssetCache,
    pub shared: SharedRenderContext,
    pub templates: TemplateCache,
}

/// Summary of one successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub output: PathBuf,
    pub pages: usize,
    pub bytes: u64,
    pub sha256: String,
    pub elapsed: Duration,
}

impl GenerationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} ({} pages, {}, sha256 {}) in {}ms",
            self.output.display(),
            self.pages,
            format_bytes(self.bytes),
            self.sha256,
            self.elapsed.as_millis()
        )
    }
}

enum EngineSlot {
    Idle,
    Ready(Arc<dyn RenderEngine>),
    Dead,
}

pub struct Generator {
    settings: Settings,
    launcher: Arc<dyn EngineLauncher>,
    warm: OnceCell<Arc<WarmState>>,
    engine: Mutex<EngineSlot>,
}

impl Generator {
    pub fn new(settings: Settings, launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            settings,
            launcher,
            warm: OnceCell::new(),
            engine: Mutex::new(EngineSlot::Idle),
        }
    }

    /// Generator backed by headless Chromium configured from `settings.engine`.
    pub fn with_chrome(settings: Settings) -> Self {
        let launcher = ChromeLauncher::new(ChromeOptions::from(&settings.engine));
        Self::new(settings, Arc::new(launcher))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load assets, compose styles and compile templates. Later calls return the
    /// same state without touching the filesystem.
    pub async fn warm_up(&self) -> Result<Arc<WarmState>, SetupError> {
        self.warm
            .get_or_try_init(|| async {
                let started_at = Instant::now();
                let assets = AssetCache::from_settings(&self.settings.assets).await;
                let base_styles = style::load_base_styles(&self.settings.styles).await?;
                let shared = style::compose(&self.settings.assets.fonts, &assets, base_styles);
                let templates = TemplateCache::discover_and_compile(&self.settings.templates).await?;

                info!(
                    target = "reportpress::application::generator",
                    op = "warm_up",
                    result = "ok",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    assets = assets.len(),
                    pages = templates.len(),
                    "Caches warmed"
                );
                Ok::<_, SetupError>(Arc::new(WarmState {
                    assets,
                    shared,
                    templates,
                }))
            })
            .await
            .cloned()
    }

    /// Render, assemble and persist one request.
    ///
    /// After the engine is lost every call fails with
    /// [`GenerateError::EngineUnavailable`] until [`Generator::reinitialize_engine`] succeeds.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReport, GenerateError> {
        let started_at = Instant::now();
        let warm = self.warm_up().await?;

        let (mut data, output_path) = request.into_parts();
        if let Some(chart_settings) = self.settings.chart.as_ref() {
            data = chart::enrich(data, chart_settings).map_err(RequestError::from)?;
        }

        let engine = self.acquire_engine().await?;

        let inputs = PageInputs {
            templates: &warm.templates,
            shared: &warm.shared,
            assets: &warm.assets,
            engine: engine.as_ref(),
        };
        let options = PipelineOptions::from(&self.settings.engine);
        let pages = match pipeline::run(&inputs, &data, options).await {
            Ok(pages) => pages,
            Err(GenerateError::EngineUnavailable) => {
                self.retire_engine(&engine).await;
                return Err(GenerateError::EngineUnavailable);
            }
            Err(err) => return Err(err),
        };

        let document = assemble_blocking(pages).await?;
        let sha256 = hex::encode(Sha256::digest(&document.bytes));
        let page_count = document.page_count;
        let bytes = output::persist(output_path.clone(), document.bytes).await?;

        let report = GenerationReport {
            output: output_path,
            pages: page_count,
            bytes,
            sha256,
            elapsed: started_at.elapsed(),
        };
        histogram!(GENERATION_MS).record(report.elapsed.as_millis() as f64);
        info!(
            target = "reportpress::application::generator",
            op = "generate",
            result = "ok",
            elapsed_ms = report.elapsed.as_millis() as u64,
            output = %report.output.display(),
            pages = report.pages,
            bytes = report.bytes,
            sha256 = %report.sha256,
            "Document generated"
        );
        Ok(report)
    }

    /// Replace the engine, whatever state it is in.
    pub async fn reinitialize_engine(&self) -> Result<(), GenerateError> {
        let mut slot = self.engine.lock().await;
        if let EngineSlot::Ready(engine) = std::mem::replace(&mut *slot, EngineSlot::Idle) {
            shutdown_quietly(engine.as_ref()).await;
        }

        let engine = self.launch().await?;
        *slot = EngineSlot::Ready(engine);
        info!(
            target = "reportpress::application::generator",
            op = "reinitialize_engine",
            result = "ok",
            "Render engine reinitialized"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let mut slot = self.engine.lock().await;
        match std::mem::replace(&mut *slot, EngineSlot::Idle) {
            EngineSlot::Ready(engine) => engine.shutdown().await,
            EngineSlot::Idle | EngineSlot::Dead => Ok(()),
        }
    }

    async fn acquire_engine(&self) -> Result<Arc<dyn RenderEngine>, GenerateError> {
        let mut slot = self.engine.lock().await;
        match &*slot {
            EngineSlot::Ready(engine) if engine.is_alive() => Ok(Arc::clone(engine)),
            EngineSlot::Ready(engine) => {
                warn!(
                    target = "reportpress::application::generator",
                    op = "acquire_engine",
                    result = "dead",
                    "Render engine died between requests"
                );
                shutdown_quietly(engine.as_ref()).await;
                *slot = EngineSlot::Dead;
                Err(GenerateError::EngineUnavailable)
            }
            EngineSlot::Dead => Err(GenerateError::EngineUnavailable),
            EngineSlot::Idle => {
                let engine = self.launch().await?;
                *slot = EngineSlot::Ready(Arc::clone(&engine));
                Ok(engine)
            }
        }
    }

    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, SetupError> {
        self.launcher.launch().await.map_err(|err| {
            warn!(
                target = "reportpress::application::generator",
                op = "launch_engine",
                result = "error",
                error = %err,
                "Render engine failed to launch"
            );
            SetupError::EngineLaunch(err)
        })
    }

    /// Mark `engine` dead if it is still the current one.
    async fn retire_engine(&self, engine: &Arc<dyn RenderEngine>) {
        let mut slot = self.engine.lock().await;
        if let EngineSlot::Ready(current) = &*slot
            && Arc::ptr_eq(current, engine)
        {
            shutdown_quietly(current.as_ref()).await;
            *slot = EngineSlot::Dead;
        }
    }
}

async fn shutdown_quietly(engine: &dyn RenderEngine) {
    if let Err(err) = engine.shutdown().await {
        warn!(
            target = "reportpress::application::generator",
            op = "shutdown_engine",
            result = "error",
            error = %err,
            "Render engine did not shut down cleanly"
        );
    }
}
