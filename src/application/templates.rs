//! Page template discovery and compilation.
//!
//! Every file with the configured extension directly under the template
//! directory is one page. Its position comes from the first integer in the file
//! stem; indices must be unique and contiguous. Other files (partials in
//! subdirectories, `.css` overrides) are only reachable through includes or as
//! page style siblings.

use std::{
    borrow::Cow,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Instant,
};

use minijinja::{Environment, Value, path_loader};
use tracing::{debug, info};

use crate::{application::error::SetupError, config::TemplateSettings, domain::page_index_from_stem};

/// One compiled page, addressed in the environment by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTemplate {
    pub index: u32,
    pub name: String,
    pub path: PathBuf,
    pub page_styles: Option<String>,
}

#[derive(Debug)]
pub struct TemplateCache {
    env: Environment<'static>,
    pages: Vec<PageTemplate>,
}

struct Candidate {
    index: u32,
    name: String,
    path: PathBuf,
}

impl TemplateCache {
    pub async fn discover_and_compile(settings: &TemplateSettings) -> Result<Self, SetupError> {
        let started_at = Instant::now();
        let root = settings.directory.clone();

        let mut candidates = discover(&root, &settings.extension).await?;
        candidates.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
        validate_order(&candidates)?;

        if let Some(expected) = settings.expected_pages
            && expected.get() as usize != candidates.len()
        {
            return Err(SetupError::PageCountMismatch {
                expected: expected.get(),
                found: candidates.len(),
            });
        }

        let mut env = build_environment(&root);
        let mut pages = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let source = tokio::fs::read_to_string(&candidate.path)
                .await
                .map_err(|source| SetupError::ReadTemplate {
                    path: candidate.path.clone(),
                    source,
                })?;
            env.add_template_owned(candidate.name.clone(), source)
                .map_err(|source| SetupError::Compile {
                    name: candidate.name.clone(),
                    source,
                })?;

            let page_styles = read_sibling_styles(&candidate.path).await?;
            debug!(
                target = "reportpress::application::templates",
                op = "compile",
                index = candidate.index,
                name = %candidate.name,
                page_styles = page_styles.is_some(),
                "Compiled page template"
            );

            pages.push(PageTemplate {
                index: candidate.index,
                name: candidate.name,
                path: candidate.path,
                page_styles,
            });
        }

        info!(
            target = "reportpress::application::templates",
            op = "discover_and_compile",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            directory = %root.display(),
            pages = pages.len(),
            "Page templates compiled"
        );

        Ok(Self { env, pages })
    }

    /// Pages in ascending index order.
    pub fn pages(&self) -> &[PageTemplate] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn render(&self, page: &PageTemplate, context: Value) -> Result<String, minijinja::Error> {
        self.env.get_template(&page.name)?.render(context)
    }
}

async fn discover(root: &Path, extension: &str) -> Result<Vec<Candidate>, SetupError> {
    let dir_error = |source| SetupError::TemplateDir {
        path: root.to_path_buf(),
        source,
    };

    let mut reader = tokio::fs::read_dir(root).await.map_err(dir_error)?;
    let mut candidates = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(dir_error)? {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches_extension {
            continue;
        }
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let (Some(name), Some(stem)) = (
            path.file_name().and_then(|name| name.to_str()),
            path.file_stem().and_then(|stem| stem.to_str()),
        ) else {
            continue;
        };

        let index = page_index_from_stem(stem).map_err(|source| SetupError::TemplateName {
            name: name.to_string(),
            source,
        })?;
        candidates.push(Candidate {
            index,
            name: name.to_string(),
            path: path.clone(),
        });
    }

    if candidates.is_empty() {
        return Err(SetupError::NoTemplates {
            path: root.to_path_buf(),
        });
    }
    Ok(candidates)
}

/// Sorted candidates must form one run of consecutive indices.
fn validate_order(sorted: &[Candidate]) -> Result<(), SetupError> {
    for pair in sorted.windows(2) {
        let (previous, next) = (&pair[0], &pair[1]);
        if previous.index == next.index {
            return Err(SetupError::DuplicateIndex {
                index: next.index,
                first: previous.name.clone(),
                second: next.name.clone(),
            });
        }
        if next.index != previous.index + 1 {
            return Err(SetupError::IndexGap {
                previous: previous.index,
                next: next.index,
            });
        }
    }
    Ok(())
}

fn build_environment(root: &Path) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_loader(path_loader(root));

    let lookup_root = root.to_path_buf();
    env.set_path_join_callback(move |name, parent| {
        include_path(&lookup_root, name, parent)
    });
    env
}

/// Resolve an include next to the including template, falling back to the root.
fn include_path<'s>(root: &Path, name: &'s str, parent: &'s str) -> Cow<'s, str> {
    let Some((parent_dir, _)) = parent.rsplit_once('/') else {
        return Cow::Borrowed(name);
    };
    let candidate = format!("{parent_dir}/{name}");
    if root.join(&candidate).is_file() {
        Cow::Owned(candidate)
    } else {
        Cow::Borrowed(name)
    }
}

async fn read_sibling_styles(template: &Path) -> Result<Option<String>, SetupError> {
    let css = template.with_extension("css");
    match tokio::fs::read_to_string(&css).await {
        Ok(styles) => Ok(Some(styles)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SetupError::ReadTemplate { path: css, source }),
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, num::NonZeroU32};

    use minijinja::context;

    use super::*;

    fn settings(dir: &Path) -> TemplateSettings {
        TemplateSettings {
            directory: dir.to_path_buf(),
            extension: "html".to_string(),
            expected_pages: None,
        }
    }

    #[tokio::test]
    async fn pages_are_sorted_by_first_integer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_3.html"), "three").unwrap();
        fs::write(dir.path().join("page_1.html"), "one").unwrap();
        fs::write(dir.path().join("page_2.html"), "two").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let cache = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap();

        let order: Vec<u32> = cache.pages().iter().map(|page| page.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        let rendered = cache.render(&cache.pages()[0], context! {}).unwrap();
        assert_eq!(rendered, "one");
    }

    #[tokio::test]
    async fn duplicate_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_1.html"), "a").unwrap();
        fs::write(dir.path().join("cover_1.html"), "b").unwrap();

        let err = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::DuplicateIndex { index: 1, .. }));
    }

    #[tokio::test]
    async fn gaps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_1.html"), "a").unwrap();
        fs::write(dir.path().join("page_3.html"), "c").unwrap();

        let err = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SetupError::IndexGap {
                previous: 1,
                next: 3
            }
        ));
    }

    #[tokio::test]
    async fn empty_or_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::NoTemplates { .. }));

        let err = TemplateCache::discover_and_compile(&settings(&dir.path().join("absent")))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::TemplateDir { .. }));
    }

    #[tokio::test]
    async fn compile_errors_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_1.html"), "{% if %}").unwrap();

        let err = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Compile { ref name, .. } if name == "page_1.html"));
    }

    #[tokio::test]
    async fn expected_page_count_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_1.html"), "a").unwrap();
        fs::write(dir.path().join("page_2.html"), "b").unwrap();

        let mut pinned = settings(dir.path());
        pinned.expected_pages = NonZeroU32::new(3);
        let err = TemplateCache::discover_and_compile(&pinned).await.unwrap_err();
        assert!(matches!(
            err,
            SetupError::PageCountMismatch {
                expected: 3,
                found: 2
            }
        ));
    }

    #[tokio::test]
    async fn sibling_css_becomes_page_styles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page_1.html"), "a").unwrap();
        fs::write(dir.path().join("page_1.css"), "body { color: red; }").unwrap();
        fs::write(dir.path().join("page_2.html"), "b").unwrap();

        let cache = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap();

        assert_eq!(
            cache.pages()[0].page_styles.as_deref(),
            Some("body { color: red; }")
        );
        assert!(cache.pages()[1].page_styles.is_none());
    }

    #[tokio::test]
    async fn includes_resolve_next_to_the_including_file() {
        let dir = tempfile::tempdir().unwrap();
        let partials = dir.path().join("partials");
        fs::create_dir(&partials).unwrap();
        fs::write(partials.join("header.html"), "[{% include 'title.html' %}]").unwrap();
        fs::write(partials.join("title.html"), "{{ title }}").unwrap();
        fs::write(partials.join("footer.txt"), "-end").unwrap();
        fs::write(
            dir.path().join("page_1.html"),
            "{% include 'partials/header.html' %}{% include 'partials/footer.txt' %}",
        )
        .unwrap();

        let cache = TemplateCache::discover_and_compile(&settings(dir.path()))
            .await
            .unwrap();
        let rendered = cache
            .render(&cache.pages()[0], context! { title => "Report" })
            .unwrap();
        assert_eq!(rendered, "[Report]-end");
    }

    #[test]
    fn include_path_falls_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("partials")).unwrap();
        fs::write(dir.path().join("partials/local.html"), "").unwrap();

        assert_eq!(
            include_path(dir.path(), "local.html", "partials/header.html"),
            "partials/local.html"
        );
        assert_eq!(
            include_path(dir.path(), "shared.html", "partials/header.html"),
            "shared.html"
        );
        assert_eq!(include_path(dir.path(), "x.html", "page_1.html"), "x.html");
    }
}
