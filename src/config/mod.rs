//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CheckArgs, CliArgs, Command, DataInput, GenerateArgs, RenderOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "reportpress";
const ENV_PREFIX: &str = "REPORTPRESS";
const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_TEMPLATE_EXTENSION: &str = "html";
const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FONT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_PAGE_CONCURRENCY: u32 = 4;
const DEFAULT_PAGE_RETRIES: u32 = 1;
const DEFAULT_FONT_STYLE: &str = "normal";
const DEFAULT_FONT_WEIGHT: &str = "400";
const DEFAULT_FONT_DISPLAY: &str = "swap";
pub(crate) const DEFAULT_CHART_LABEL_FIELD: &str = "holland_code";
pub(crate) const DEFAULT_CHART_VALUE_FIELD: &str = "result";
pub(crate) const DEFAULT_CHART_TARGET: &str = "RadarGraphBase64";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub templates: TemplateSettings,
    pub assets: AssetSettings,
    pub styles: StyleSettings,
    pub engine: EngineSettings,
    pub chart: Option<ChartSettings>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub directory: PathBuf,
    pub extension: String,
    /// When set, warm-up fails unless exactly this many templates are found.
    pub expected_pages: Option<NonZeroU32>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetSettings {
    pub fonts: Vec<FontSettings>,
    pub images: Vec<ImageSettings>,
    pub image_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSettings {
    pub key: String,
    pub path: PathBuf,
    pub family: String,
    pub style: String,
    pub weight: String,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct StyleSettings {
    pub base_stylesheet: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chrome_path: Option<PathBuf>,
    pub no_sandbox: bool,
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub font_timeout: Duration,
    pub page_concurrency: NonZeroU32,
    pub page_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            no_sandbox: false,
            launch_timeout: Duration::from_secs(DEFAULT_LAUNCH_TIMEOUT_SECS),
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            font_timeout: Duration::from_millis(DEFAULT_FONT_TIMEOUT_MS),
            page_concurrency: NonZeroU32::new(DEFAULT_PAGE_CONCURRENCY).unwrap_or(NonZeroU32::MIN),
            page_retries: DEFAULT_PAGE_RETRIES,
        }
    }
}

/// Radar chart enrichment: read the entries under `source` (a JSON pointer)
/// and store the base64 SVG under `target` in the data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSettings {
    pub source: String,
    pub label_field: String,
    pub value_field: String,
    pub target: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Generate(args) => raw.apply_render_overrides(&args.overrides),
        Command::Check(args) => raw.apply_render_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    templates: RawTemplateSettings,
    assets: RawAssetSettings,
    styles: RawStyleSettings,
    engine: RawEngineSettings,
    chart: RawChartSettings,
}

impl RawSettings {
    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(dir) = overrides.template_dir.as_ref() {
            self.templates.directory = Some(dir.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.chrome_path.as_ref() {
            self.engine.chrome_path = Some(path.clone());
        }
        if let Some(no_sandbox) = overrides.no_sandbox {
            self.engine.no_sandbox = Some(no_sandbox);
        }
        if let Some(value) = overrides.page_concurrency {
            self.engine.page_concurrency = Some(value);
        }
        if let Some(seconds) = overrides.navigation_timeout_seconds {
            self.engine.navigation_timeout_seconds = Some(seconds);
        }
        if let Some(millis) = overrides.font_timeout_ms {
            self.engine.font_timeout_ms = Some(millis);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            templates,
            assets,
            styles,
            engine,
            chart,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            templates: build_template_settings(templates)?,
            assets: build_asset_settings(assets)?,
            styles: build_style_settings(styles)?,
            engine: build_engine_settings(engine)?,
            chart: build_chart_settings(chart)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let directory = templates
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "templates.directory",
            "path must not be empty",
        ));
    }

    let extension = templates
        .extension
        .map(|value| value.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_TEMPLATE_EXTENSION.to_string());
    if extension.is_empty() {
        return Err(LoadError::invalid(
            "templates.extension",
            "extension must not be empty",
        ));
    }
    if extension.eq_ignore_ascii_case("css") {
        return Err(LoadError::invalid(
            "templates.extension",
            "`css` is reserved for per-page style overrides",
        ));
    }

    let expected_pages = templates
        .expected_pages
        .map(|value| non_zero_u32(value, "templates.expected_pages"))
        .transpose()?;

    Ok(TemplateSettings {
        directory,
        extension,
        expected_pages,
    })
}

fn build_asset_settings(assets: RawAssetSettings) -> Result<AssetSettings, LoadError> {
    let fonts = assets
        .fonts
        .into_iter()
        .map(build_font_settings)
        .collect::<Result<Vec<_>, _>>()?;

    let images = assets
        .images
        .into_iter()
        .map(|image| {
            let key = required_text(image.key, "assets.images.key")?;
            let path = required_path(image.path, "assets.images.path")?;
            Ok(ImageSettings { key, path })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    let image_directory = assets
        .image_directory
        .filter(|path| !path.as_os_str().is_empty());

    Ok(AssetSettings {
        fonts,
        images,
        image_directory,
    })
}

fn build_font_settings(font: RawFontSettings) -> Result<FontSettings, LoadError> {
    let key = required_text(font.key, "assets.fonts.key")?;
    let path = required_path(font.path, "assets.fonts.path")?;
    let family = required_text(font.family, "assets.fonts.family")?;

    let style = font
        .style
        .unwrap_or_else(|| DEFAULT_FONT_STYLE.to_string());
    if !matches!(style.as_str(), "normal" | "italic" | "oblique") {
        return Err(LoadError::invalid(
            "assets.fonts.style",
            format!("unsupported font style `{style}`"),
        ));
    }

    let weight = font
        .weight
        .unwrap_or_else(|| DEFAULT_FONT_WEIGHT.to_string());
    let display = font
        .display
        .unwrap_or_else(|| DEFAULT_FONT_DISPLAY.to_string());
    if !matches!(
        display.as_str(),
        "auto" | "block" | "swap" | "fallback" | "optional"
    ) {
        return Err(LoadError::invalid(
            "assets.fonts.display",
            format!("unsupported font-display policy `{display}`"),
        ));
    }

    Ok(FontSettings {
        key,
        path,
        family,
        style,
        weight,
        display,
    })
}

fn build_style_settings(styles: RawStyleSettings) -> Result<StyleSettings, LoadError> {
    let base_stylesheet = match styles.base_stylesheet {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "styles.base_stylesheet",
                "path must not be empty",
            ));
        }
        other => other,
    };

    Ok(StyleSettings { base_stylesheet })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let chrome_path = engine
        .chrome_path
        .filter(|path| !path.as_os_str().is_empty());

    let launch_secs = engine
        .launch_timeout_seconds
        .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS);
    if launch_secs == 0 {
        return Err(LoadError::invalid(
            "engine.launch_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let navigation_secs = engine
        .navigation_timeout_seconds
        .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS);
    if navigation_secs == 0 {
        return Err(LoadError::invalid(
            "engine.navigation_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let font_millis = engine.font_timeout_ms.unwrap_or(DEFAULT_FONT_TIMEOUT_MS);
    let navigation_timeout = Duration::from_secs(navigation_secs);
    let font_timeout = Duration::from_millis(font_millis);
    if font_timeout >= navigation_timeout {
        return Err(LoadError::invalid(
            "engine.font_timeout_ms",
            "must be shorter than the navigation timeout",
        ));
    }

    let concurrency = engine
        .page_concurrency
        .unwrap_or(DEFAULT_PAGE_CONCURRENCY);

    Ok(EngineSettings {
        chrome_path,
        no_sandbox: engine.no_sandbox.unwrap_or(false),
        launch_timeout: Duration::from_secs(launch_secs),
        navigation_timeout,
        font_timeout,
        page_concurrency: non_zero_u32(concurrency.into(), "engine.page_concurrency")?,
        page_retries: engine.page_retries.unwrap_or(DEFAULT_PAGE_RETRIES),
    })
}

fn build_chart_settings(chart: RawChartSettings) -> Result<Option<ChartSettings>, LoadError> {
    let Some(source) = chart.source else {
        return Ok(None);
    };

    let source = source.trim().to_string();
    if !source.is_empty() && !source.starts_with('/') {
        return Err(LoadError::invalid(
            "chart.source",
            "must be a JSON pointer starting with `/`",
        ));
    }
    if source.is_empty() {
        return Ok(None);
    }

    let target = chart
        .target
        .unwrap_or_else(|| DEFAULT_CHART_TARGET.to_string());
    if target.trim().is_empty() {
        return Err(LoadError::invalid("chart.target", "must not be empty"));
    }

    Ok(Some(ChartSettings {
        source,
        label_field: chart
            .label_field
            .unwrap_or_else(|| DEFAULT_CHART_LABEL_FIELD.to_string()),
        value_field: chart
            .value_field
            .unwrap_or_else(|| DEFAULT_CHART_VALUE_FIELD.to_string()),
        target,
    }))
}

fn required_text(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid(key, "value is required"))
}

fn required_path(value: Option<PathBuf>, key: &'static str) -> Result<PathBuf, LoadError> {
    value
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| LoadError::invalid(key, "path is required"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    directory: Option<PathBuf>,
    extension: Option<String>,
    expected_pages: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAssetSettings {
    fonts: Vec<RawFontSettings>,
    images: Vec<RawImageSettings>,
    image_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFontSettings {
    key: Option<String>,
    path: Option<PathBuf>,
    family: Option<String>,
    style: Option<String>,
    weight: Option<String>,
    display: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageSettings {
    key: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStyleSettings {
    base_stylesheet: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    chrome_path: Option<PathBuf>,
    no_sandbox: Option<bool>,
    launch_timeout_seconds: Option<u64>,
    navigation_timeout_seconds: Option<u64>,
    font_timeout_ms: Option<u64>,
    page_concurrency: Option<u32>,
    page_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawChartSettings {
    source: Option<String>,
    label_field: Option<String>,
    value_field: Option<String>,
    target: Option<String>,
}
