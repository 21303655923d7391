//! Shared style payload: `@font-face` rules for loaded fonts plus the base stylesheet.

use minijinja::Value;
use tracing::{info, warn};

use crate::{
    application::{
        assets::{AssetCache, AssetEntry},
        error::SetupError,
    },
    config::{FontSettings, StyleSettings},
};

/// Built once per process and handed by reference to every page render.
#[derive(Debug, Clone)]
pub struct SharedRenderContext {
    fonts: String,
    base_styles: String,
    fonts_value: Value,
    styles_value: Value,
}

impl SharedRenderContext {
    pub fn fonts(&self) -> &str {
        &self.fonts
    }

    pub fn base_styles(&self) -> &str {
        &self.base_styles
    }

    /// `fonts` template global, marked safe so it is emitted verbatim.
    pub fn fonts_value(&self) -> Value {
        self.fonts_value.clone()
    }

    /// `styles` template global, marked safe so it is emitted verbatim.
    pub fn styles_value(&self) -> Value {
        self.styles_value.clone()
    }
}

/// Compose the shared context. Fonts whose asset did not load are left out.
pub fn compose(fonts: &[FontSettings], assets: &AssetCache, base_styles: String) -> SharedRenderContext {
    let mut css = String::new();
    for font in fonts {
        let Some(asset) = assets.get(&font.key) else {
            warn!(
                target = "reportpress::application::style",
                op = "compose",
                result = "font_skipped",
                key = %font.key,
                family = %font.family,
                "Font asset missing; pages fall back to system fonts"
            );
            continue;
        };

        css.push_str(&font_face(font, asset));
    }

    SharedRenderContext {
        fonts_value: Value::from_safe_string(css.clone()),
        styles_value: Value::from_safe_string(base_styles.clone()),
        fonts: css,
        base_styles,
    }
}

fn font_face(font: &FontSettings, asset: &AssetEntry) -> String {
    let src = match asset.extension().and_then(font_format) {
        Some(format) => format!("url(\"{}\") format(\"{format}\")", asset.data_uri()),
        None => format!("url(\"{}\")", asset.data_uri()),
    };
    format!(
        "@font-face {{\n  font-family: \"{family}\";\n  src: {src};\n  font-style: {style};\n  font-weight: {weight};\n  font-display: {display};\n}}\n",
        family = font.family.replace('"', "\\\""),
        style = font.style,
        weight = font.weight,
        display = font.display,
    )
}

/// Read the configured base stylesheet. A configured but unreadable file is fatal.
pub async fn load_base_styles(settings: &StyleSettings) -> Result<String, SetupError> {
    let Some(path) = settings.base_stylesheet.as_ref() else {
        return Ok(String::new());
    };

    let styles = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SetupError::BaseStylesheet {
            path: path.clone(),
            source,
        })?;
    info!(
        target = "reportpress::application::style",
        op = "load_base_styles",
        result = "ok",
        path = %path.display(),
        bytes = styles.len(),
        "Base stylesheet loaded"
    );
    Ok(styles)
}

fn font_format(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "ttf" => Some("truetype"),
        "otf" => Some("opentype"),
        "woff" => Some("woff"),
        "woff2" => Some("woff2"),
        _ => None,
    }
}
