//! Cleaning pipeline: archive raw input, normalize, dedup, key, publish.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rcl_adapters::{read_workbook, write_workbook};
use rcl_core::{CanonicalRecord, CoreError, KeyDeriver, RawTable};
use rcl_storage::{DocumentStore, SpreadsheetSource};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::{ContainerNames, PipelineConfig};
use crate::dedup::{similarity_review, DedupRun, DedupStats, SimilarityReviewItem};
use crate::normalize::{NormalizeStats, Normalizer};

pub const DATASET_PREFIX: &str = "RFP_content_library_";

pub const DATASET_COLUMNS: [&str; 9] = [
    "client name",
    "rfp type",
    "consultant",
    "date",
    "question",
    "response",
    "sme",
    "key",
    "key_hash",
];

static DATASET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RFP_content_library_(\d{8})\.xlsx$").expect("static dataset name regex")
});

pub fn dataset_name(run_date: NaiveDate) -> String {
    format!("{DATASET_PREFIX}{}.xlsx", run_date.format("%Y%m%d"))
}

/// Latest dataset by the date embedded in its name; unparsable names are ignored.
pub fn latest_content_library<S: AsRef<str>>(names: &[S]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            let caps = DATASET_NAME.captures(name)?;
            let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;
            Some((date, name))
        })
        .max_by_key(|(date, _)| *date)
        .map(|(_, name)| name.to_string())
}

/// In-memory result of cleaning one table.
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    pub records: Vec<CanonicalRecord>,
    pub normalize: NormalizeStats,
    pub dedup: DedupStats,
    pub review: Vec<SimilarityReviewItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleaningOutcome {
    pub source_name: String,
    pub dataset_name: String,
    pub normalize: NormalizeStats,
    pub dedup: DedupStats,
    pub review: Vec<SimilarityReviewItem>,
    #[serde(skip)]
    pub records: Vec<CanonicalRecord>,
}

pub struct CleaningPipeline {
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn SpreadsheetSource>,
    containers: ContainerNames,
    input_folder: String,
    retention_months: u32,
    deriver: KeyDeriver,
    similarity_threshold: f64,
}

impl CleaningPipeline {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn SpreadsheetSource>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            source,
            containers: config.storage.containers.clone(),
            input_folder: config.source.input_folder.clone(),
            retention_months: config.cleaning.retention_months,
            deriver: KeyDeriver::new(config.hash_algorithm()?),
            similarity_threshold: config.cleaning.similarity_review_threshold,
        })
    }

    /// Pure part of the run: no I/O, deterministic for a given table and date.
    pub fn clean_table(
        &self,
        table: &RawTable,
        today: NaiveDate,
    ) -> Result<CleanedDataset, CoreError> {
        let batch = Normalizer::new(self.retention_months, today).normalize(table)?;
        let (records, dedup) = DedupRun::new(batch.records, batch.has_date_column).run_all()?;
        let records = records
            .into_iter()
            .map(|record| self.deriver.derive(record))
            .collect::<Vec<_>>();
        let review = similarity_review(&records, self.similarity_threshold);
        Ok(CleanedDataset {
            records,
            normalize: batch.stats,
            dedup,
            review,
        })
    }

    pub async fn run(&self, today: NaiveDate) -> Result<CleaningOutcome> {
        let latest = self
            .source
            .list_latest(&self.input_folder)
            .await
            .with_context(|| format!("locating latest spreadsheet in {}", self.input_folder))?;
        info!(source = %latest.name, bytes = latest.bytes.len(), "raw spreadsheet located");

        self.store
            .write(&self.containers.raw_data, &latest.name, &latest.bytes)
            .await
            .with_context(|| format!("archiving raw input {}", latest.name))?;
        info!(container = %self.containers.raw_data, name = %latest.name, "raw input archived");

        let table = read_workbook(&latest.bytes)
            .with_context(|| format!("reading workbook {}", latest.name))?;
        let cleaned = self
            .clean_table(&table, today)
            .with_context(|| format!("cleaning {}", latest.name))?;
        if !cleaned.review.is_empty() {
            info!(pairs = cleaned.review.len(), "near-identical questions flagged for review");
        }

        let dataset_name = dataset_name(today);
        let rows = dataset_rows(&cleaned.records);
        let bytes = write_workbook(&DATASET_COLUMNS, &rows).context("encoding canonical dataset")?;
        self.store
            .write(&self.containers.content_library, &dataset_name, &bytes)
            .await
            .with_context(|| format!("publishing {dataset_name}"))?;
        info!(
            dataset = %dataset_name,
            records = cleaned.records.len(),
            "canonical dataset published"
        );

        Ok(CleaningOutcome {
            source_name: latest.name,
            dataset_name,
            normalize: cleaned.normalize,
            dedup: cleaned.dedup,
            review: cleaned.review,
            records: cleaned.records,
        })
    }
}

fn dataset_rows(records: &[CanonicalRecord]) -> Vec<Vec<Option<String>>> {
    records
        .iter()
        .map(|c| {
            let r = &c.record;
            vec![
                Some(r.client.clone()),
                Some(r.rfp_type.clone()),
                Some(r.consultant.clone()),
                r.date.map(|_| r.date_string()),
                Some(r.question.clone()),
                Some(r.response.clone()),
                r.sme.clone(),
                Some(c.key.clone()),
                Some(c.key_hash.clone()),
            ]
        })
        .collect()
}
