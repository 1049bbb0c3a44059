mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use rcl_adapters::{read_workbook, write_workbook, MemoryMirror, MemorySearchIndex};
use rcl_storage::{DocumentStore, FsDocumentStore, FsSpreadsheetSource};
use rcl_sync::{PipelineConfig, RunLog, Services, Stage};

use common::{config_yaml, CITATIONS, DOCS, FOLDER, MAPPING};

/// Empty strings become missing cells.
fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| (!v.is_empty()).then(|| v.to_string())).collect()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

fn survey_workbook() -> Vec<u8> {
    let sso = "Do you support SSO?";
    let long = "Yes. We support SAML 2.0 and OIDC single sign-on with all major providers.";
    let encrypted = "Is data encrypted at rest?";
    write_workbook(
        &["Client Name", "RFP Type", "Consultant", "Date", "Question", "Response", "SME"],
        &[
            row(&["Acme", "New", "Jane", "01/15/2025", sso, "Yes.", ""]),
            row(&["Acme", "New", "Raj", "01/15/2025", sso, long, "IAM team"]),
            row(&["Acme", "New", "Raj", "03/02/2024", sso, "No", ""]),
            row(&["Beta", "Renewal", "Jane", "2026-02-01", encrypted, "CONFIRMED", ""]),
            row(&["Beta", "Renewal", "Jane", "2026-02-01", encrypted, "CONFIRMED", ""]),
            row(&["Beta", "Renewal", "Jane", "2026-02-01", "Contact", "ops@beta.example", ""]),
            row(&["Gamma", "New", "Lee", "not a date", "Uptime?", "99.9%", ""]),
            row(&["Gamma", "New", "Lee", "2020-06-01", "Legacy question?", "Old", ""]),
            row(&["Gamma", "New", "Lee", "2025-06-01", "Support hours?", "  ", ""]),
        ],
    )
    .unwrap()
}

struct Harness {
    _dir: tempfile::TempDir,
    config: PipelineConfig,
    store: Arc<FsDocumentStore>,
    mirror: Arc<MemoryMirror>,
    search: Arc<MemorySearchIndex>,
}

impl Harness {
    fn new(with_index: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut yaml = config_yaml(dir.path(), 3);
        if with_index {
            yaml.push_str(concat!(
                "index:\n",
                "  endpoint: https://search.example\n",
                "  index_name: rfp-index\n",
                "  indexer_name: rfp-indexer\n",
            ));
        }
        let config = PipelineConfig::from_yaml_str(&yaml).unwrap();
        let inbox = config.storage_root().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("survey_2026_10.xlsx"), survey_workbook()).unwrap();

        Self {
            store: Arc::new(FsDocumentStore::new(config.storage_root())),
            mirror: Arc::new(MemoryMirror::with_page_size(2)),
            search: Arc::new(MemorySearchIndex::with_documents(7)),
            config,
            _dir: dir,
        }
    }

    fn services(&self, with_search: bool) -> Services {
        Services {
            config: self.config.clone(),
            store: self.store.clone(),
            source: Arc::new(FsSpreadsheetSource::new(self.config.storage_root())),
            mirror: Some(self.mirror.clone()),
            search: with_search
                .then(|| self.search.clone() as Arc<dyn rcl_adapters::SearchIndexService>),
            run_log: RunLog::new(),
        }
    }
}

#[tokio::test]
async fn full_run_publishes_every_artifact() {
    let harness = Harness::new(true);
    let report = harness.services(true).run(Stage::All, today()).await.unwrap();

    let cleaning = report.cleaning.expect("cleaning outcome");
    assert_eq!(cleaning.dataset_name, "RFP_content_library_20261017.xlsx");
    assert_eq!(cleaning.records.len(), 2);
    let sso = &cleaning.records[0];
    assert_eq!(sso.record.question, "Do you support SSO?");
    assert!(sso.record.response.starts_with("Yes. We support SAML"));
    assert_eq!(sso.record.sme.as_deref(), Some("IAM team"));
    assert_eq!(cleaning.records[1].record.response, "Confirmed");
    assert!(cleaning
        .records
        .iter()
        .all(|r| r.key_hash.starts_with("RFP_Content_") && r.key_hash.len() == 12 + 32));

    let n = &cleaning.normalize;
    assert_eq!(n.input_rows, 9);
    assert_eq!(n.blank_response, 1);
    assert_eq!(n.unparsable_date, 1);
    assert_eq!(n.outside_retention, 1);
    assert_eq!(n.placeholder, 1);
    assert_eq!(cleaning.dedup.exact_duplicates_removed, 1);
    assert_eq!(cleaning.dedup.older_answers_removed, 1);
    assert_eq!(cleaning.dedup.shorter_answers_removed, 1);

    assert_eq!(
        harness.store.list("rfp-raw-data").await.unwrap(),
        vec!["survey_2026_10.xlsx"]
    );
    let expected_docs = cleaning
        .records
        .iter()
        .map(|r| format!("{}.docx", r.key_hash))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    assert_eq!(harness.store.list(DOCS).await.unwrap(), expected_docs);
    assert_eq!(harness.mirror.names(FOLDER).await, expected_docs);

    let mapping = read_workbook(&harness.store.read(CITATIONS, MAPPING).await.unwrap()).unwrap();
    assert_eq!(mapping.len(), 2);

    let index = report.index.expect("index refreshed");
    assert_eq!(index.purged, 7);
    assert_eq!(
        harness.search.calls().await,
        vec!["purge:rfp-index", "reset:rfp-indexer", "run:rfp-indexer"]
    );

    let report_dir = report.report_dir.expect("report dir");
    assert!(report_dir.starts_with(harness.config.reports_root()));
    assert!(report_dir.join("run_summary.json").exists());
    assert!(report_dir.join("snapshots/canonical_records.parquet").exists());

    assert_eq!(
        harness.store.list("rfp-logs").await.unwrap(),
        vec!["rcl_pipeline_logs_2026-10-17.log"]
    );
}

#[tokio::test]
async fn rerun_on_same_input_is_stable_and_uploads_nothing() {
    let harness = Harness::new(false);
    let services = harness.services(false);

    let first = services.run(Stage::All, today()).await.unwrap();
    let second = services.run(Stage::All, today()).await.unwrap();

    let hashes = |r: &rcl_sync::RunReport| {
        r.cleaning
            .as_ref()
            .map(|c| c.records.iter().map(|x| x.key_hash.clone()).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    assert_eq!(hashes(&first), hashes(&second));

    let second_sync = second.mirror.expect("mirror report");
    assert!(second_sync.uploaded.is_empty());
    assert!(second_sync.deleted.is_empty());
    assert_eq!(first.mirror.expect("mirror report").mapping, second_sync.mapping);
    assert!(second.index.is_none());
    assert_eq!(
        harness.store.list("rfp-content-library").await.unwrap(),
        vec!["RFP_content_library_20261017.xlsx"]
    );
}

#[tokio::test]
async fn failed_run_still_uploads_its_log() {
    let harness = Harness::new(false);
    std::fs::remove_file(harness.config.storage_root().join("inbox/survey_2026_10.xlsx")).unwrap();

    let err = harness
        .services(false)
        .run(Stage::Clean, today())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("cleaning stage"));
    assert_eq!(
        harness.store.list("rfp-logs").await.unwrap(),
        vec!["rcl_pipeline_logs_2026-10-17.log"]
    );
    assert!(harness.store.list("rfp-content-library").await.unwrap().is_empty());
}

#[tokio::test]
async fn configured_index_without_credentials_fails_reindex() {
    let harness = Harness::new(true);
    let err = harness
        .services(false)
        .run(Stage::Reindex, today())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("RCL_SEARCH_API_KEY"));
}

#[tokio::test]
async fn mirror_without_credentials_fails() {
    let harness = Harness::new(false);
    let mut services = harness.services(false);
    services.mirror = None;
    let err = services.run(Stage::Mirror, today()).await.unwrap_err();
    assert!(format!("{err:#}").contains("RCL_GRAPH_TOKEN"));
}
