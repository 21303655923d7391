//! Data-driven multi-page PDF generation through a headless browser.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
