//! Binary assets (fonts, images) read once and exposed as base64 payloads.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::future::join_all;
use metrics::counter;
use minijinja::Value;
use tracing::{info, warn};

use crate::{config::AssetSettings, infra::telemetry::ASSETS_MISSING_TOTAL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub key: String,
    pub path: PathBuf,
    pub mime: String,
    pub encoded: String,
}

impl AssetEntry {
    fn from_bytes(key: String, path: PathBuf, bytes: &[u8]) -> Self {
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            key,
            path,
            mime,
            encoded: STANDARD.encode(bytes),
        }
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.encoded)
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}

/// Immutable key → asset map plus the template views derived from it.
#[derive(Debug, Clone)]
pub struct AssetCache {
    entries: HashMap<String, Arc<AssetEntry>>,
    payloads: Value,
    uris: Value,
}

impl AssetCache {
    /// Read every `(key, path)` pair concurrently. Unreadable files are skipped with a
    /// warning; a repeated key keeps its first registration.
    pub async fn load(sources: Vec<(String, PathBuf)>) -> Self {
        let started_at = Instant::now();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(sources.len());
        for (key, path) in sources {
            if seen.insert(key.clone()) {
                unique.push((key, path));
            } else {
                warn!(
                    target = "reportpress::application::assets",
                    op = "load",
                    result = "duplicate_key",
                    key = %key,
                    path = %path.display(),
                    "Asset key registered twice; keeping the first"
                );
            }
        }

        let reads = unique.into_iter().map(|(key, path)| async move {
            let read = tokio::fs::read(&path).await;
            (key, path, read)
        });

        let mut entries = HashMap::new();
        let mut missing = 0_usize;
        for (key, path, read) in join_all(reads).await {
            match read {
                Ok(bytes) => {
                    let entry = AssetEntry::from_bytes(key.clone(), path, &bytes);
                    entries.insert(key, Arc::new(entry));
                }
                Err(err) => {
                    missing += 1;
                    counter!(ASSETS_MISSING_TOTAL).increment(1);
                    warn!(
                        target = "reportpress::application::assets",
                        op = "load",
                        result = "missing",
                        key = %key,
                        path = %path.display(),
                        error = %err,
                        "Asset could not be read; continuing without it"
                    );
                }
            }
        }

        info!(
            target = "reportpress::application::assets",
            op = "load",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            loaded = entries.len(),
            missing,
            "Assets loaded"
        );

        Self::from_entries(entries)
    }

    /// Load configured fonts, then configured images, then the optional image directory.
    pub async fn from_settings(settings: &AssetSettings) -> Self {
        let mut sources: Vec<(String, PathBuf)> = settings
            .fonts
            .iter()
            .map(|font| (font.key.clone(), font.path.clone()))
            .collect();
        sources.extend(
            settings
                .images
                .iter()
                .map(|image| (image.key.clone(), image.path.clone())),
        );
        if let Some(dir) = settings.image_directory.as_deref() {
            sources.extend(scan_directory(dir).await);
        }

        Self::load(sources).await
    }

    fn from_entries(entries: HashMap<String, Arc<AssetEntry>>) -> Self {
        // Base64 and data URIs are emitted verbatim, even by autoescaping templates.
        let sorted: BTreeMap<&str, &Arc<AssetEntry>> =
            entries.iter().map(|(key, entry)| (key.as_str(), entry)).collect();
        let payloads = sorted
            .iter()
            .map(|(key, entry)| (*key, Value::from_safe_string(entry.encoded.clone())))
            .collect();
        let uris = sorted
            .iter()
            .map(|(key, entry)| (*key, Value::from_safe_string(entry.data_uri())))
            .collect();

        Self {
            payloads,
            uris,
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<AssetEntry>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `assets` template global: key → raw base64 payload.
    pub fn payloads_value(&self) -> Value {
        self.payloads.clone()
    }

    /// `asset_uris` template global: key → `data:` URI.
    pub fn uris_value(&self) -> Value {
        self.uris.clone()
    }
}

/// Regular files directly under `dir`, keyed by file stem, in name order.
async fn scan_directory(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) => {
            counter!(ASSETS_MISSING_TOTAL).increment(1);
            warn!(
                target = "reportpress::application::assets",
                op = "scan_directory",
                result = "unreadable",
                path = %dir.display(),
                error = %err,
                "Image directory could not be read; skipping"
            );
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(
                    target = "reportpress::application::assets",
                    op = "scan_directory",
                    result = "partial",
                    path = %dir.display(),
                    error = %err,
                    "Stopped scanning image directory early"
                );
                break;
            }
        };

        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        found.push((stem.to_string(), path.clone()));
    }

    found.sort_by(|a, b| a.1.cmp(&b.1));
    found
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        fs::write(&logo, [0x89, b'P', b'N', b'G']).unwrap();

        let cache = AssetCache::load(vec![
            ("logo".to_string(), logo),
            ("ghost".to_string(), dir.path().join("ghost.woff2")),
        ])
        .await;

        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("ghost"));
        let logo = cache.get("logo").unwrap();
        assert_eq!(logo.mime, "image/png");
        assert_eq!(logo.encoded, STANDARD.encode([0x89, b'P', b'N', b'G']));
        assert!(logo.data_uri().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.svg");
        let second = dir.path().join("second.svg");
        fs::write(&first, "<svg>1</svg>").unwrap();
        fs::write(&second, "<svg>2</svg>").unwrap();

        let cache = AssetCache::load(vec![
            ("mark".to_string(), first.clone()),
            ("mark".to_string(), second),
        ])
        .await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("mark").unwrap().path, first);
    }

    #[tokio::test]
    async fn image_directory_is_keyed_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        fs::write(images.join("cover.jpg"), b"jpeg").unwrap();
        fs::write(images.join("badge.svg"), b"<svg/>").unwrap();
        fs::create_dir(images.join("nested")).unwrap();

        let settings = AssetSettings {
            image_directory: Some(images),
            ..AssetSettings::default()
        };
        let cache = AssetCache::from_settings(&settings).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("cover").unwrap().mime, "image/jpeg");
        assert_eq!(cache.get("badge").unwrap().mime, "image/svg+xml");
    }

    #[tokio::test]
    async fn template_views_expose_payloads_and_uris() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.gif");
        fs::write(&path, b"GIF89a").unwrap();

        let cache = AssetCache::load(vec![("dot".to_string(), path)]).await;

        let payload = cache.payloads_value().get_attr("dot").unwrap();
        assert_eq!(payload.as_str(), Some(STANDARD.encode(b"GIF89a").as_str()));
        let uri = cache.uris_value().get_attr("dot").unwrap();
        assert!(uri.as_str().unwrap().starts_with("data:image/gif;base64,"));
        assert!(uri.is_safe());
    }
}
