//! Domain layer types and invariants.

pub mod error;
pub mod types;

pub use types::{FinalDocument, GenerationRequest, PageBuffer, page_index_from_stem};
