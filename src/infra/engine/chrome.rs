//! Headless Chromium engine driven over the DevTools protocol.

use std::{
    path::PathBuf,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::{
        browser_protocol::{
            network::{
                EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
                EventRequestWillBeSent,
            },
            page::PrintToPdfParams,
        },
        js_protocol::runtime::EvaluateParams,
    },
};
use futures::{Stream, StreamExt, stream};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{config::EngineSettings, util::lock::mutex_lock};

use super::{
    EngineError, EngineLauncher, RenderEngine,
    context::ContextGuard,
    readiness::{self, NetworkActivity, Readiness},
};

const LOCK_TARGET: &str = "reportpress::infra::engine::chrome";

const DOCUMENT_READY_SCRIPT: &str = r#"new Promise((resolve) => {
    if (document.readyState === "complete") {
        resolve(true);
    } else {
        window.addEventListener("load", () => resolve(true), { once: true });
    }
})"#;

const FONTS_READY_SCRIPT: &str = "document.fonts.ready.then(() => document.fonts.status)";

type ActivityStream = Pin<Box<dyn Stream<Item = NetworkActivity> + Send>>;

/// How long the page must go without an open request to count as network-idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub chrome_path: Option<PathBuf>,
    pub no_sandbox: bool,
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub font_timeout: Duration,
}

impl From<&EngineSettings> for ChromeOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            chrome_path: settings.chrome_path.clone(),
            no_sandbox: settings.no_sandbox,
            launch_timeout: settings.launch_timeout,
            navigation_timeout: settings.navigation_timeout,
            font_timeout: settings.font_timeout,
        }
    }
}

/// Launches [`ChromeEngine`] instances with fixed options.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    options: ChromeOptions,
}

impl ChromeLauncher {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        let engine = ChromeEngine::launch(self.options.clone()).await?;
        Ok(Arc::new(engine))
    }
}

pub struct ChromeEngine {
    browser: Mutex<Option<Arc<Browser>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
    options: ChromeOptions,
}

impl ChromeEngine {
    pub async fn launch(options: ChromeOptions) -> Result<Self, EngineError> {
        let started_at = Instant::now();

        let mut builder = BrowserConfig::builder()
            .request_timeout(options.navigation_timeout)
            .arg("--disable-gpu")
            .arg("--font-render-hinting=none");
        if let Some(path) = options.chrome_path.as_ref() {
            builder = builder.chrome_executable(path);
        }
        if options.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(EngineError::Launch)?;

        let (browser, mut handler) = timeout(options.launch_timeout, Browser::launch(config))
            .await
            .map_err(|_| {
                EngineError::Launch(format!(
                    "browser did not start within {}s",
                    options.launch_timeout.as_secs()
                ))
            })?
            .map_err(|err| EngineError::Launch(err.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(
                        target = "reportpress::infra::engine",
                        op = "chrome::handler",
                        error = %err,
                        "Browser connection reported an error"
                    );
                }
            }
            flag.store(false, Ordering::SeqCst);
            warn!(
                target = "reportpress::infra::engine",
                op = "chrome::handler",
                result = "closed",
                "Browser connection closed"
            );
        });

        info!(
            target = "reportpress::infra::engine",
            op = "chrome::launch",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            chrome_path = options
                .chrome_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "auto".to_string()),
            no_sandbox = options.no_sandbox,
            "Browser launched"
        );

        Ok(Self {
            browser: Mutex::new(Some(Arc::new(browser))),
            handler: Mutex::new(Some(handle)),
            alive,
            options,
        })
    }

    fn current_browser(&self) -> Result<Arc<Browser>, EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable);
        }
        mutex_lock(&self.browser, LOCK_TARGET, "current_browser")
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::Unavailable)
    }

    /// A failure observed after the connection dropped is an engine failure, not a page one.
    fn classify(&self, err: EngineError) -> EngineError {
        if self.is_alive() {
            err
        } else {
            EngineError::Unavailable
        }
    }

    async fn capture(&self, page: &Page, markup: &str) -> Result<Vec<u8>, EngineError> {
        let navigation = self.options.navigation_timeout;
        let activity = network_activity(page).await?;
        timeout(navigation, async {
            page.set_content(markup)
                .await
                .map_err(|err| EngineError::Protocol(err.to_string()))?;
            evaluate(page, DOCUMENT_READY_SCRIPT).await?;
            readiness::network_idle(activity, NETWORK_QUIET).await;
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|_| EngineError::NavigationTimeout(navigation))??;

        let font_wait_started = Instant::now();
        match readiness::best_effort(self.options.font_timeout, evaluate(page, FONTS_READY_SCRIPT))
            .await
        {
            Readiness::Ready => {}
            Readiness::Failed(err) => warn!(
                target = "reportpress::infra::engine",
                op = "chrome::wait_fonts",
                result = "error",
                error = %err,
                "Font readiness check failed; capturing anyway"
            ),
            Readiness::TimedOut => warn!(
                target = "reportpress::infra::engine",
                op = "chrome::wait_fonts",
                result = "timeout",
                elapsed_ms = font_wait_started.elapsed().as_millis() as u64,
                "Fonts not ready before timeout; capturing anyway"
            ),
        }

        page.pdf(print_params())
            .await
            .map_err(|err| EngineError::Protocol(err.to_string()))
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn render_page(&self, markup: &str) -> Result<Vec<u8>, EngineError> {
        let browser = self.current_browser()?;
        let guard = ContextGuard::open(browser)
            .await
            .map_err(|err| self.classify(err))?;

        let captured = self.capture(guard.page(), markup).await;

        if let Err(err) = guard.release().await {
            warn!(
                target = "reportpress::infra::engine",
                op = "chrome::release_context",
                result = "error",
                error = %err,
                "Failed to release browsing context"
            );
        }

        captured.map_err(|err| self.classify(err))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
            && mutex_lock(&self.browser, LOCK_TARGET, "is_alive").is_some()
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        let browser = mutex_lock(&self.browser, LOCK_TARGET, "shutdown").take();
        let handler = mutex_lock(&self.handler, LOCK_TARGET, "shutdown").take();

        let Some(browser) = browser else {
            return Ok(());
        };

        let outcome = match Arc::try_unwrap(browser) {
            Ok(mut browser) => {
                let closed = browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|err| EngineError::Protocol(err.to_string()));
                if let Err(err) = browser.wait().await {
                    warn!(
                        target = "reportpress::infra::engine",
                        op = "chrome::shutdown",
                        result = "wait_error",
                        error = %err,
                        "Failed to reap browser process"
                    );
                }
                closed
            }
            Err(shared) => {
                warn!(
                    target = "reportpress::infra::engine",
                    op = "chrome::shutdown",
                    result = "in_flight",
                    holders = Arc::strong_count(&shared),
                    "Renders still hold the browser; it closes when they finish"
                );
                Ok(())
            }
        };

        if let Some(handle) = handler {
            handle.abort();
        }
        self.alive.store(false, Ordering::SeqCst);

        info!(
            target = "reportpress::infra::engine",
            op = "chrome::shutdown",
            result = if outcome.is_ok() { "ok" } else { "error" },
            "Browser shut down"
        );
        outcome
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        if let Some(handle) = mutex_lock(&self.handler, LOCK_TARGET, "drop").take() {
            handle.abort();
        }
    }
}

/// Request lifecycle events of `page`, subscribed before any content is loaded.
async fn network_activity(page: &Page) -> Result<ActivityStream, EngineError> {
    let protocol = |err: chromiumoxide::error::CdpError| EngineError::Protocol(err.to_string());

    page.execute(NetworkEnableParams::default())
        .await
        .map_err(protocol)?;
    let started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(protocol)?
        .map(|event| NetworkActivity::Started(event.request_id.inner().clone()));
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(protocol)?
        .map(|event| NetworkActivity::Settled(event.request_id.inner().clone()));
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(protocol)?
        .map(|event| NetworkActivity::Settled(event.request_id.inner().clone()));

    let activity: ActivityStream = Box::pin(stream::select(started, stream::select(finished, failed)));
    Ok(activity)
}

async fn evaluate(page: &Page, expression: &str) -> Result<(), EngineError> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(EngineError::Protocol)?;
    page.evaluate_expression(params)
        .await
        .map(|_| ())
        .map_err(|err| EngineError::Protocol(err.to_string()))
}

fn print_params() -> PrintToPdfParams {
    PrintToPdfParams {
        print_background: Some(true),
        prefer_css_page_size: Some(true),
        margin_top: Some(0.0),
        margin_bottom: Some(0.0),
        margin_left: Some(0.0),
        margin_right: Some(0.0),
        ..Default::default()
    }
}
