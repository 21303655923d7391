//! Render engine abstraction: markup in, single-document PDF bytes out.

mod chrome;
mod context;
mod readiness;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use chrome::{ChromeEngine, ChromeLauncher, ChromeOptions};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser process is no longer available")]
    Unavailable,
    #[error("page did not become ready within {}ms", .0.as_millis())]
    NavigationTimeout(Duration),
    #[error("failed to prepare browsing context: {0}")]
    Context(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Fatal errors mean the shared engine itself is gone; retrying a page is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Unavailable)
    }
}

/// A long-lived layout engine that captures one page of markup at a time.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Load `markup` as a complete document in an isolated context and print it.
    async fn render_page(&self, markup: &str) -> Result<Vec<u8>, EngineError>;

    fn is_alive(&self) -> bool;

    /// Release the engine process. Later renders fail with [`EngineError::Unavailable`].
    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// Creates engines on demand so the orchestrator can launch lazily and relaunch after death.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError>;
}
