use std::{error::Error as StdError, io, path::PathBuf};

use thiserror::Error;

use crate::{
    application::{assemble::AssemblyError, chart::ChartError},
    config::LoadError,
    domain::error::DomainError,
    infra::{engine::EngineError, error::InfraError, output::OutputError},
};

/// Which side of the boundary a failure belongs to: the process set-up or one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Setup,
    Request,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Request => "request",
        }
    }
}

/// Warm-up and engine launch failures. None of these are per-request.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("template directory `{}` is not readable: {source}", path.display())]
    TemplateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template directory `{}` contains no page templates", path.display())]
    NoTemplates { path: PathBuf },
    #[error("failed to read `{}`: {source}", path.display())]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template `{name}` has an unusable page index")]
    TemplateName {
        name: String,
        #[source]
        source: DomainError,
    },
    #[error("page index {index} is claimed by both `{first}` and `{second}`")]
    DuplicateIndex {
        index: u32,
        first: String,
        second: String,
    },
    #[error("page indices jump from {previous} to {next}")]
    IndexGap { previous: u32, next: u32 },
    #[error("expected {expected} page templates, found {found}")]
    PageCountMismatch { expected: u32, found: usize },
    #[error("template `{name}` failed to compile")]
    Compile {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("base stylesheet `{}` is not readable: {source}", path.display())]
    BaseStylesheet {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("render engine could not be started")]
    EngineLaunch(#[source] EngineError),
}

/// Why one page could not be produced.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("template rendering failed")]
    Template(#[source] minijinja::Error),
    #[error(transparent)]
    Engine(EngineError),
    #[error("engine returned an empty capture")]
    EmptyCapture,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Record(#[from] DomainError),
    #[error(transparent)]
    Chart(#[from] ChartError),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("page {index} failed: {source}")]
    Page {
        index: u32,
        #[source]
        source: PageError,
    },
    #[error("render engine is unavailable; reinitialize it before generating again")]
    EngineUnavailable,
    #[error("failed to assemble document: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("failed to write document: {0}")]
    Output(#[from] OutputError),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Internal(DomainError),
}

impl GenerateError {
    pub fn page(index: u32, source: PageError) -> Self {
        Self::Page { index, source }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Setup(_) => FailureKind::Setup,
            Self::Page { .. }
            | Self::EngineUnavailable
            | Self::Assembly(_)
            | Self::Output(_)
            | Self::InvalidRequest(_)
            | Self::Internal(_) => FailureKind::Request,
        }
    }
}

impl From<DomainError> for GenerateError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation { .. } => Self::InvalidRequest(RequestError::Record(error)),
            DomainError::Invariant { .. } => Self::Internal(error),
        }
    }
}

/// Top-level error for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("failed to read data record: {message}")]
    Input { message: String },
}

impl AppError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::Infra(_) => FailureKind::Setup,
            Self::Generate(error) => error.kind(),
            Self::Input { .. } => FailureKind::Request,
        }
    }
}

/// Collect the display text of an error and each of its sources, outermost first.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
