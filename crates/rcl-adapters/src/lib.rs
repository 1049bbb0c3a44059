//! Format codecs and external platform adapters.

use thiserror::Error;

pub mod document;
pub mod mirror;
pub mod search_index;
pub mod spreadsheet;

pub use document::render_docx;
pub use mirror::{
    list_all, GraphMirror, GraphMirrorConfig, MemoryMirror, MirrorItem, MirrorPage,
    MirrorPlatform,
};
pub use search_index::{MemorySearchIndex, RestSearchIndex, SearchIndexConfig, SearchIndexService};
pub use spreadsheet::{read_workbook, write_workbook};

pub const CRATE_NAME: &str = "rcl-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("document render error: {0}")]
    Document(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Turns a non-success response into `HttpStatus`, keeping the body text for logs.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AdapterError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}
