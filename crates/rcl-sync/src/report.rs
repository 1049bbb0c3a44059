//! Per-run report directory: summary JSON, markdown brief, parquet snapshot.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use rcl_core::CanonicalRecord;
use rcl_storage::sha256_hex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::dedup::{DedupStats, SimilarityReviewItem};
use crate::normalize::NormalizeStats;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_name: String,
    pub dataset_name: String,
    pub canonical_records: usize,
    pub normalize: NormalizeStats,
    pub dedup: DedupStats,
    pub review: Vec<SimilarityReviewItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `{reports_root}/{run_id}/` and returns that directory.
pub async fn write_run_reports(
    reports_root: &Path,
    summary: &RunSummary,
    records: &[CanonicalRecord],
) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("run_summary.json"), json)
        .await
        .context("writing run_summary.json")?;
    fs::write(run_dir.join("run_brief.md"), run_brief(summary))
        .await
        .context("writing run_brief.md")?;

    let parquet_path = snapshot_dir.join("canonical_records.parquet");
    write_records_parquet(&parquet_path, records)?;
    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![manifest_entry("canonical_records", &run_dir, &parquet_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    Ok(run_dir)
}

pub fn run_brief(summary: &RunSummary) -> String {
    let n = &summary.normalize;
    let d = &summary.dedup;
    let mut brief = format!(
        "# RFP Content Library Run\n\n\
         - Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Source: {}\n- Dataset: {}\n\n\
         ## Normalizer\n\
         - Input rows: {}\n- Blank response: {}\n- Unparsable date: {}\n\
         - Outside retention: {}\n- Placeholder: {}\n- Confirmations rewritten: {}\n- Kept: {}\n\n\
         ## Deduplicator\n\
         - Exact duplicates removed: {} ({} groups)\n- Older answers removed: {}\n\
         - Shorter answers removed: {}\n- Canonical records: {}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.source_name,
        summary.dataset_name,
        n.input_rows,
        n.blank_response,
        n.unparsable_date,
        n.outside_retention,
        n.placeholder,
        n.confirmations_rewritten,
        n.kept,
        d.exact_duplicates_removed,
        d.exact_duplicate_groups,
        d.older_answers_removed,
        d.shorter_answers_removed,
        summary.canonical_records,
    );
    if !summary.review.is_empty() {
        brief.push_str("\n## Similar Questions\n");
        for item in &summary.review {
            brief.push_str(&format!(
                "- {:.3} `{}` / `{}`\n",
                item.score, item.key_hash_a, item.key_hash_b
            ));
        }
    }
    brief
}

fn write_records_parquet(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("key_hash", DataType::Utf8, false),
        ArrowField::new("key", DataType::Utf8, false),
        ArrowField::new("client", DataType::Utf8, false),
        ArrowField::new("rfp_type", DataType::Utf8, false),
        ArrowField::new("consultant", DataType::Utf8, false),
        ArrowField::new("date", DataType::Utf8, true),
        ArrowField::new("question", DataType::Utf8, false),
        ArrowField::new("response", DataType::Utf8, false),
        ArrowField::new("sme", DataType::Utf8, true),
        ArrowField::new("source_row", DataType::UInt64, false),
    ]));

    let dates = StringArray::from(
        records
            .iter()
            .map(|r| r.record.date.map(|_| r.record.date_string()))
            .collect::<Vec<_>>(),
    );
    let smes = StringArray::from(
        records
            .iter()
            .map(|r| r.record.sme.as_deref())
            .collect::<Vec<_>>(),
    );
    let rows = UInt64Array::from(
        records
            .iter()
            .map(|r| r.record.source_row as u64)
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text_column(records, |r| r.key_hash.as_str())),
            Arc::new(text_column(records, |r| r.key.as_str())),
            Arc::new(text_column(records, |r| r.record.client.as_str())),
            Arc::new(text_column(records, |r| r.record.rfp_type.as_str())),
            Arc::new(text_column(records, |r| r.record.consultant.as_str())),
            Arc::new(dates),
            Arc::new(text_column(records, |r| r.record.question.as_str())),
            Arc::new(text_column(records, |r| r.record.response.as_str())),
            Arc::new(smes),
            Arc::new(rows),
        ],
    )
    .context("building canonical records batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn text_column(records: &[CanonicalRecord], f: fn(&CanonicalRecord) -> &str) -> StringArray {
    StringArray::from(records.iter().map(|r| Some(f(r))).collect::<Vec<_>>())
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(SnapshotFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
