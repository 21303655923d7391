//! Scoped ownership of one isolated browsing context and its page.

use std::sync::Arc;

use chromiumoxide::{
    Browser, Page,
    cdp::browser_protocol::{
        browser::BrowserContextId,
        target::{CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams},
    },
};
use tracing::{debug, warn};

use super::EngineError;

/// Holds a browser context for the duration of one render call.
///
/// Call [`ContextGuard::release`] once capture is done. If the guard is dropped
/// without it (cancelled future, panic) the context is disposed from a spawned task.
pub(super) struct ContextGuard {
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    page: Page,
    released: bool,
}

impl ContextGuard {
    pub(super) async fn open(browser: Arc<Browser>) -> Result<Self, EngineError> {
        let created = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|err| EngineError::Context(err.to_string()))?;
        let context_id = created.result.browser_context_id.clone();

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Context)?;

        match browser.new_page(params).await {
            Ok(page) => Ok(Self {
                browser,
                context_id,
                page,
                released: false,
            }),
            Err(err) => {
                dispose_context(&browser, context_id).await;
                Err(EngineError::Context(err.to_string()))
            }
        }
    }

    pub(super) fn page(&self) -> &Page {
        &self.page
    }

    /// Close the page and dispose the context.
    pub(super) async fn release(mut self) -> Result<(), EngineError> {
        self.released = true;
        let page_closed = self.page.clone().close().await;
        let disposed = self
            .browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await;

        page_closed.map_err(|err| EngineError::Context(err.to_string()))?;
        disposed.map_err(|err| EngineError::Context(err.to_string()))?;
        Ok(())
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                target = "reportpress::infra::engine",
                op = "context::drop",
                result = "leaked",
                "No runtime available to dispose browsing context"
            );
            return;
        };

        debug!(
            target = "reportpress::infra::engine",
            op = "context::drop",
            result = "deferred_cleanup",
            "Browsing context dropped without release; disposing in background"
        );
        let browser = Arc::clone(&self.browser);
        let page = self.page.clone();
        let context_id = self.context_id.clone();
        runtime.spawn(async move {
            let _ = page.close().await;
            dispose_context(&browser, context_id).await;
        });
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(err) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        warn!(
            target = "reportpress::infra::engine",
            op = "context::dispose",
            result = "error",
            error = %err,
            "Failed to dispose browsing context"
        );
    }
}
