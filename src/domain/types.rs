//! Request and page value types that flow through a generation.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::error::DomainError;

/// One invocation of the generator: a data record and where the PDF goes.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    data: Map<String, Value>,
    output: PathBuf,
}

impl GenerationRequest {
    /// Build a request from a JSON value. The record must be a JSON object so
    /// its fields can be exposed to templates as top-level variables.
    pub fn new(data: Value, output: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let output = output.into();
        if output.as_os_str().is_empty() {
            return Err(DomainError::validation("output path must not be empty"));
        }

        match data {
            Value::Object(data) => Ok(Self { data, output }),
            other => Err(DomainError::validation(format!(
                "data record must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Split the request so the data record can be enriched before rendering.
    pub fn into_parts(self) -> (Map<String, Value>, PathBuf) {
        (self.data, self.output)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Raw PDF bytes for exactly one rendered page, tagged with the index of the
/// template that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBuffer {
    pub index: u32,
    pub bytes: Vec<u8>,
}

impl PageBuffer {
    pub fn new(index: u32, bytes: Vec<u8>) -> Self {
        Self { index, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The assembled multi-page document, held only until it is persisted.
#[derive(Debug, Clone)]
pub struct FinalDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Extract the ordering index from a template file stem: the first run of
/// ASCII digits, or 0 when the stem has none.
pub fn page_index_from_stem(stem: &str) -> Result<u32, DomainError> {
    let digits: String = stem
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();

    if digits.is_empty() {
        return Ok(0);
    }

    digits.parse::<u32>().map_err(|err| {
        DomainError::validation(format!("page index `{digits}` in `{stem}` is out of range: {err}"))
    })
}
