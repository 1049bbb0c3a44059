//! One document per canonical record, named by its key hash.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use rcl_adapters::{read_workbook, render_docx};
use rcl_core::{CoreError, RawTable};
use rcl_storage::DocumentStore;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::mirror::has_extension;
use crate::pipeline::latest_content_library;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub dataset: Option<String>,
    pub written: usize,
    pub skipped_blank_key: usize,
    pub removed_stale: usize,
}

/// Label and column for each rendered field, in output order.
struct FieldColumns {
    client: Option<usize>,
    rfp_type: Option<usize>,
    consultant: Option<usize>,
    date: Option<usize>,
    question: Option<usize>,
    response: usize,
    response_label: &'static str,
    sme: Option<usize>,
    key_hash: usize,
}

impl FieldColumns {
    fn resolve(table: &RawTable) -> Result<Self, CoreError> {
        let columns = table
            .columns
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect::<Vec<_>>();
        let find = |name: &str| columns.iter().position(|c| c == name);

        let (response, response_label) = match (find("response"), find("fixed answer")) {
            (Some(idx), _) => (idx, "Response"),
            (None, Some(idx)) => (idx, "Fixed Answer"),
            (None, None) => {
                return Err(CoreError::Schema {
                    message: "dataset has neither 'response' nor 'fixed answer'".into(),
                    suggestions: Vec::new(),
                })
            }
        };
        let key_hash = find("key_hash").ok_or_else(|| CoreError::Schema {
            message: "dataset has no 'key_hash' column".into(),
            suggestions: Vec::new(),
        })?;

        Ok(Self {
            client: find("client name").or_else(|| find("client")),
            rfp_type: find("rfp type"),
            consultant: find("consultant"),
            date: find("date"),
            question: find("question"),
            response,
            response_label,
            sme: find("sme"),
            key_hash,
        })
    }
}

/// Labeled lines for one row; blank fields are omitted.
fn render_lines(dataset: &str, table: &RawTable, row: usize, cols: &FieldColumns) -> Vec<String> {
    let value = |idx: Option<usize>| {
        idx.and_then(|i| table.cell(row, i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let mut lines = vec![format!("Source File Name: {dataset}")];
    for (label, idx) in [
        ("Client Name", cols.client),
        ("RFP Type", cols.rfp_type),
        ("Consultant", cols.consultant),
        ("Date", cols.date),
        ("Question", cols.question),
        (cols.response_label, Some(cols.response)),
        ("SME", cols.sme),
    ] {
        if let Some(v) = value(idx) {
            lines.push(format!("{label}: {v}"));
        }
    }
    lines
}

pub struct DocumentMaterializer {
    store: Arc<dyn DocumentStore>,
    content_library: String,
    doc_library: String,
    extension: String,
}

impl DocumentMaterializer {
    pub fn new(config: &PipelineConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            content_library: config.storage.containers.content_library.clone(),
            doc_library: config.storage.containers.doc_library.clone(),
            extension: config.managed_extension(),
        }
    }

    fn document_name(&self, key_hash: &str) -> String {
        if has_extension(key_hash, &self.extension) {
            key_hash.to_string()
        } else {
            format!("{key_hash}.{}", self.extension)
        }
    }

    /// Renders the latest dataset into the document container and removes stale documents.
    pub async fn materialize(&self) -> Result<MaterializeReport> {
        let names = self
            .store
            .list(&self.content_library)
            .await
            .with_context(|| format!("listing {}", self.content_library))?;
        let Some(dataset) = latest_content_library(&names) else {
            error!(
                container = %self.content_library,
                "no canonical dataset found; nothing materialized"
            );
            return Ok(MaterializeReport::default());
        };

        let bytes = self
            .store
            .read(&self.content_library, &dataset)
            .await
            .with_context(|| format!("reading {dataset}"))?;
        let table = read_workbook(&bytes).with_context(|| format!("parsing {dataset}"))?;
        let cols = FieldColumns::resolve(&table)
            .with_context(|| format!("resolving columns of {dataset}"))?;

        let mut report = MaterializeReport {
            dataset: Some(dataset.clone()),
            ..MaterializeReport::default()
        };
        let mut current = BTreeSet::new();
        for row in 0..table.len() {
            let Some(key_hash) = table
                .cell(row, cols.key_hash)
                .map(str::trim)
                .filter(|k| !k.is_empty())
            else {
                report.skipped_blank_key += 1;
                continue;
            };
            let name = self.document_name(key_hash);
            let doc = render_docx(&render_lines(&dataset, &table, row, &cols))
                .with_context(|| format!("rendering {name}"))?;
            self.store
                .write(&self.doc_library, &name, &doc)
                .await
                .with_context(|| format!("writing {name}"))?;
            current.insert(name);
        }
        report.written = current.len();
        if report.skipped_blank_key > 0 {
            warn!(rows = report.skipped_blank_key, "rows without key_hash skipped");
        }

        let existing = self
            .store
            .list(&self.doc_library)
            .await
            .with_context(|| format!("listing {}", self.doc_library))?;
        for stale in existing
            .iter()
            .filter(|n| has_extension(n, &self.extension) && !current.contains(*n))
        {
            self.store
                .delete(&self.doc_library, stale)
                .await
                .with_context(|| format!("deleting stale document {stale}"))?;
            report.removed_stale += 1;
        }

        info!(
            dataset = %dataset,
            written = report.written,
            removed_stale = report.removed_stale,
            "documents materialized"
        );
        Ok(report)
    }
}
