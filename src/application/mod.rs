//! Generation services: caches, page pipeline, assembly and orchestration.

pub mod assemble;
pub mod assets;
pub mod chart;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod style;
pub mod templates;

pub use generator::{GenerationReport, Generator, WarmState};
