#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use reportpress::{
    config::{
        AssetSettings, EngineSettings, LogFormat, LoggingSettings, Settings, StyleSettings,
        TemplateSettings,
    },
    infra::engine::{EngineError, EngineLauncher, RenderEngine},
};
use tracing::level_filters::LevelFilter;

/// A one-page PDF whose content stream shows `label`.
pub fn single_page_pdf(label: &str) -> Vec<u8> {
    let escaped = label
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)");

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = format!("BT /F1 12 Tf 36 800 Td ({escaped}) Tj ET");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture pdf serializes");
    bytes
}

/// Content stream text of every page of the PDF at `path`, in page order.
pub fn page_texts(path: &Path) -> Vec<String> {
    let doc = Document::load(path).expect("output is a readable pdf");
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    pages
        .into_iter()
        .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).expect("page content")).into_owned())
        .collect()
}

pub fn write_templates(dir: &Path, templates: &[(&str, &str)]) {
    fs::create_dir_all(dir).expect("template dir");
    for (name, body) in templates {
        fs::write(dir.join(name), body).expect("write template");
    }
}

pub fn settings_for(template_dir: &Path) -> Settings {
    Settings {
        logging: LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        },
        templates: TemplateSettings {
            directory: template_dir.to_path_buf(),
            extension: "html".to_string(),
            expected_pages: None,
        },
        assets: AssetSettings::default(),
        styles: StyleSettings::default(),
        engine: EngineSettings::default(),
        chart: None,
    }
}

type DelayFn = dyn Fn(&str) -> Duration + Send + Sync;

/// In-process stand-in for the browser: prints each markup string as a one-page PDF.
pub struct FakeEngine {
    alive: AtomicBool,
    delay: Option<Box<DelayFn>>,
    transient_failures: Mutex<Vec<(String, usize)>>,
    die_on: Option<String>,
    corrupt_on: Option<String>,
    rendered: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            alive: AtomicBool::new(true),
            delay: None,
            transient_failures: Mutex::new(Vec::new()),
            die_on: None,
            corrupt_on: None,
            rendered: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl FakeEngine {
    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Fail the first `times` renders whose markup contains `needle`.
    pub fn failing(self, needle: &str, times: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .push((needle.to_string(), times));
        self
    }

    /// Lose the engine when markup containing `needle` is rendered.
    pub fn dying_on(mut self, needle: &str) -> Self {
        self.die_on = Some(needle.to_string());
        self
    }

    /// Return bytes that are not a PDF for markup containing `needle`.
    pub fn corrupting(mut self, needle: &str) -> Self {
        self.corrupt_on = Some(needle.to_string());
        self
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn take_transient_failure(&self, markup: &str) -> bool {
        let mut failures = self.transient_failures.lock().unwrap();
        for (needle, remaining) in failures.iter_mut() {
            if *remaining > 0 && markup.contains(needle.as_str()) {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn render_page(&self, markup: &str) -> Result<Vec<u8>, EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay.as_ref() {
            tokio::time::sleep(delay(markup)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .die_on
            .as_deref()
            .is_some_and(|needle| markup.contains(needle))
        {
            self.alive.store(false, Ordering::SeqCst);
            return Err(EngineError::Unavailable);
        }
        if self.take_transient_failure(markup) {
            return Err(EngineError::Protocol("target crashed".to_string()));
        }

        self.rendered.lock().unwrap().push(markup.to_string());
        if self
            .corrupt_on
            .as_deref()
            .is_some_and(|needle| markup.contains(needle))
        {
            return Ok(b"<html>definitely not a pdf</html>".to_vec());
        }
        Ok(single_page_pdf(markup))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.alive.store(false, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type EngineFactory = dyn Fn() -> FakeEngine + Send + Sync;

/// Hands out a fresh [`FakeEngine`] per launch and keeps them for inspection.
pub struct FakeLauncher {
    factory: Box<EngineFactory>,
    fail: AtomicBool,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeLauncher {
    pub fn new(factory: impl Fn() -> FakeEngine + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            factory: Box::new(factory),
            fail: AtomicBool::new(false),
            engines: Mutex::new(Vec::new()),
        })
    }

    pub fn plain() -> Arc<Self> {
        Self::new(FakeEngine::default)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    pub fn engine(&self, nth: usize) -> Arc<FakeEngine> {
        Arc::clone(&self.engines.lock().unwrap()[nth])
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Launch("chromium not installed".to_string()));
        }
        let engine = Arc::new((self.factory)());
        self.engines.lock().unwrap().push(Arc::clone(&engine));
        Ok(engine)
    }
}
