#![allow(dead_code)]

use std::path::Path;

use rcl_adapters::MirrorItem;
use rcl_sync::PipelineConfig;

pub const DOCS: &str = "rfp-content-doc-library";
pub const CITATIONS: &str = "rfp-citation-map";
pub const FOLDER: &str = "RFP Content Docs";
pub const MAPPING: &str = "rfp_content_docx_preview_mapping.xlsx";

pub fn config_yaml(root: &Path, max_workers: usize) -> String {
    format!(
        r#"
storage:
  root: {root}/data
  containers:
    raw_data: rfp-raw-data
    content_library: rfp-content-library
    doc_library: {DOCS}
    citation_map: {CITATIONS}
    logs: rfp-logs
source:
  input_folder: inbox
mirror:
  drive_id: drive-1
  folder: {FOLDER}
  max_workers: {max_workers}
reports_dir: {root}/reports
"#,
        root = root.display()
    )
}

pub fn config(root: &Path, max_workers: usize) -> PipelineConfig {
    PipelineConfig::from_yaml_str(&config_yaml(root, max_workers)).expect("test config")
}

pub fn item(name: &str, id: &str, url: &str) -> MirrorItem {
    MirrorItem {
        name: name.into(),
        id: id.into(),
        web_url: Some(url.into()),
        created_at: None,
    }
}
