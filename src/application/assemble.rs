//! Merge single-page PDF captures into one document.

use std::time::Instant;

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use thiserror::Error;
use tracing::info;

use crate::domain::{FinalDocument, PageBuffer};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no pages to assemble")]
    Empty,
    #[error("page {index} is not a readable PDF")]
    Parse {
        index: u32,
        #[source]
        source: lopdf::Error,
    },
    #[error("page {index} is encrypted")]
    Encrypted { index: u32 },
    #[error("page {index} contains no pages")]
    NoPages { index: u32 },
    #[error("page {index} has a malformed page tree: {reason}")]
    Malformed { index: u32, reason: String },
    #[error("failed to serialize document: {0}")]
    Write(String),
    #[error("assembly task failed: {0}")]
    Task(String),
}

/// Concatenate `pages` in the given order. Any unusable buffer fails the whole document.
pub fn assemble(pages: Vec<PageBuffer>) -> Result<FinalDocument, AssemblyError> {
    if pages.is_empty() {
        return Err(AssemblyError::Empty);
    }

    let started_at = Instant::now();
    let inputs = pages.len();
    let mut output = Document::with_version("1.7");
    let pages_id = output.new_object_id();
    let mut kids: Vec<ObjectId> = Vec::new();

    for page in pages {
        let index = page.index;
        let mut source =
            Document::load_mem(&page.bytes).map_err(|source| AssemblyError::Parse { index, source })?;
        if source.is_encrypted() {
            return Err(AssemblyError::Encrypted { index });
        }

        source.renumber_objects_with(output.max_id + 1);
        let page_ids: Vec<ObjectId> = source.get_pages().values().copied().collect();
        if page_ids.is_empty() {
            return Err(AssemblyError::NoPages { index });
        }

        for page_id in &page_ids {
            let inherited = inherited_attributes(&source, *page_id);
            let dict = source
                .get_object_mut(*page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|err| AssemblyError::Malformed {
                    index,
                    reason: err.to_string(),
                })?;
            for (key, value) in inherited {
                dict.set(key, value);
            }
            dict.set("Parent", pages_id);
        }

        if source.max_id > output.max_id {
            output.max_id = source.max_id;
        }
        output.objects.extend(source.objects);
        kids.extend(page_ids);
    }

    let page_count = kids.len();
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
        "Count" => page_count as i64,
    };
    output.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = output.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    output.trailer.set("Root", catalog_id);

    // Drops the source catalogs and page-tree nodes that nothing references anymore.
    output.prune_objects();

    let mut bytes = Vec::new();
    output
        .save_to(&mut bytes)
        .map_err(|err| AssemblyError::Write(err.to_string()))?;

    info!(
        target = "reportpress::application::assemble",
        op = "assemble",
        result = "ok",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        inputs,
        pages = page_count,
        bytes = bytes.len(),
        "Document assembled"
    );

    Ok(FinalDocument { bytes, page_count })
}

/// Run [`assemble`] on the blocking pool.
pub async fn assemble_blocking(pages: Vec<PageBuffer>) -> Result<FinalDocument, AssemblyError> {
    tokio::task::spawn_blocking(move || assemble(pages))
        .await
        .map_err(|err| AssemblyError::Task(err.to_string()))?
}

/// Attributes the page lacks but an ancestor defines, nearest ancestor first.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(&'static [u8], Object)> {
    let mut found: Vec<(&'static [u8], Object)> = Vec::new();
    let Ok(page) = doc.get_dictionary(page_id) else {
        return found;
    };

    let mut parent = parent_of(page);
    let mut depth = 0;
    while let Some(node_id) = parent {
        depth += 1;
        if depth > 64 {
            break;
        }
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };
        for key in INHERITABLE {
            let already = page.has(key) || found.iter().any(|(known, _)| *known == key);
            if already {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key, value.clone()));
            }
        }
        parent = parent_of(node);
    }
    found
}

fn parent_of(node: &Dictionary) -> Option<ObjectId> {
    node.get(b"Parent").and_then(Object::as_reference).ok()
}
