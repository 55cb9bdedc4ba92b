//! CSV document loader.
//!
//! Turns a staged CSV file into one [`Document`] per data row. The header
//! row names the fields; each document's text is the `column: value` lines
//! of its row, and its metadata carries the same fields plus `source` and
//! `row`.

use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::ChatError;
use crate::drive::StagedFile;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A single indexed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }
}

/// Loads the staged file's rows.
pub fn load(staged: &StagedFile, encoding: &str) -> Result<Vec<Document>, ChatError> {
    let bytes = fs::read(staged.path())
        .map_err(|e| ChatError::Parse(format!("cannot read staged file: {}", e)))?;
    parse_csv(&bytes, staged.identifier(), encoding)
}

pub fn parse_csv(bytes: &[u8], source: &str, encoding: &str) -> Result<Vec<Document>, ChatError> {
    ensure_supported_encoding(encoding)?;

    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map_err(|e| ChatError::Parse(format!("file is not valid {}: {}", encoding, e)))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ChatError::Parse("file has no header row".to_string()));
    }

    let mut documents = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;

        let mut lines = Vec::with_capacity(headers.len());
        let mut metadata = Map::new();
        for (column, value) in headers.iter().zip(record.iter()) {
            let value = value.trim();
            lines.push(format!("{}: {}", column, value));
            metadata.insert(column.clone(), Value::String(value.to_string()));
        }
        metadata.insert("source".to_string(), Value::String(source.to_string()));
        metadata.insert("row".to_string(), Value::from(row as u64));

        documents.push(Document {
            text: lines.join("\n"),
            metadata,
        });
    }

    if documents.is_empty() {
        return Err(ChatError::Parse("file contains no data rows".to_string()));
    }

    Ok(documents)
}

fn ensure_supported_encoding(encoding: &str) -> Result<(), ChatError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "utf-8-sig" => Ok(()),
        other => Err(ChatError::Parse(format!("unsupported encoding '{}'", other))),
    }
}

fn csv_error(err: csv::Error) -> ChatError {
    match err.position() {
        Some(pos) => ChatError::Parse(format!("line {}: {}", pos.line(), err)),
        None => ChatError::Parse(err.to_string()),
    }
}
