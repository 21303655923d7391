use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the reportpress binary.
#[derive(Debug, Parser)]
#[command(
    name = "reportpress",
    version,
    about = "Render page templates through headless Chromium into one PDF"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REPORTPRESS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render every page template with a data record and write the merged PDF.
    Generate(Box<GenerateArgs>),
    /// Warm the template, asset and style caches and print the page order.
    Check(CheckArgs),
}

#[derive(Debug, Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub input: DataInput,

    /// Destination of the merged PDF. Its parent directory must exist.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct DataInput {
    /// Inline JSON data record.
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    /// Path to a JSON file holding the data record.
    #[arg(long = "data-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data_file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the directory scanned for page templates.
    #[arg(long = "template-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub template_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the Chromium executable used for rendering.
    #[arg(long = "chrome-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub chrome_path: Option<PathBuf>,

    /// Launch Chromium without its sandbox (needed in most containers).
    #[arg(
        long = "no-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub no_sandbox: Option<bool>,

    /// Override the number of pages rendered concurrently.
    #[arg(long = "page-concurrency", value_name = "COUNT")]
    pub page_concurrency: Option<u32>,

    /// Override the per-page navigation timeout.
    #[arg(long = "navigation-timeout-seconds", value_name = "SECONDS")]
    pub navigation_timeout_seconds: Option<u64>,

    /// Override how long a page waits for web fonts before capturing anyway.
    #[arg(long = "font-timeout-ms", value_name = "MILLIS")]
    pub font_timeout_ms: Option<u64>,
}
