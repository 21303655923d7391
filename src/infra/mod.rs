//! Infrastructure adapters: telemetry, the browser engine and output persistence.

pub mod engine;
pub mod error;
pub mod output;
pub mod telemetry;
