//! Core domain model, key derivation and error taxonomy for RCL.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod key;

pub use key::{HashAlgorithm, KeyDeriver, KEY_HASH_PREFIX, KEY_SNIPPET_CHARS};

pub const CRATE_NAME: &str = "rcl-core";

/// Canonical date rendering used in keys, datasets and documents.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("schema error: {message}{}", render_suggestions(.suggestions))]
    Schema {
        message: String,
        suggestions: Vec<String>,
    },
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid pipeline state: {0}")]
    InvalidPipelineState(String),
}

fn render_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// Untyped spreadsheet contents: a header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One normalized question/response row from a survey export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub client: String,
    pub rfp_type: String,
    pub consultant: String,
    pub date: Option<NaiveDate>,
    pub question: String,
    pub response: String,
    pub sme: Option<String>,
    /// Zero-based data row in the source sheet, kept for audit logs.
    pub source_row: usize,
}

impl Record {
    pub fn date_string(&self) -> String {
        self.date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default()
    }
}

/// A record frozen into the canonical dataset together with its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub record: Record,
    pub key: String,
    pub key_hash: String,
}

/// One row of the published (file name -> external reference) table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub file_name: String,
    pub preview_url: String,
}
