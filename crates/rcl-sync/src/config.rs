//! Typed pipeline configuration, loaded once and validated up front.

use std::path::{Path, PathBuf};

use rcl_core::HashAlgorithm;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "RCL_CONFIG";
pub const GRAPH_TOKEN_ENV: &str = "RCL_GRAPH_TOKEN";
pub const SEARCH_API_KEY_ENV: &str = "RCL_SEARCH_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("environment variable {0} is not set")]
    MissingSecret(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub containers: ContainerNames,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerNames {
    pub raw_data: String,
    pub content_library: String,
    pub doc_library: String,
    pub citation_map: String,
    pub logs: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub input_folder: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CleaningConfig {
    pub retention_months: u32,
    pub hash_algorithm: String,
    pub similarity_review_threshold: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            retention_months: 36,
            hash_algorithm: "md5".to_string(),
            similarity_review_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    pub drive_id: String,
    pub folder: String,
    #[serde(default = "default_managed_extension")]
    pub managed_extension: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_mapping_filename")]
    pub mapping_filename: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    pub endpoint: String,
    pub index_name: String,
    pub indexer_name: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub cron: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: vec!["0 0 6 * * *".to_string()],
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_managed_extension() -> String {
    "docx".to_string()
}

fn default_max_workers() -> usize {
    5
}

fn default_mapping_filename() -> String {
    "rfp_content_docx_preview_mapping.xlsx".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_key_field() -> String {
    "chunk_id".to_string()
}

fn default_api_version() -> String {
    "2024-07-01".to_string()
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        if config.workspace_root.is_relative() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.workspace_root = parent.join(&config.workspace_root);
            }
        }
        Ok(config)
    }

    /// Loads from `$RCL_CONFIG`, falling back to `rcl.yaml`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "rcl.yaml".to_string());
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let containers = &self.storage.containers;
        for (field, value) in [
            ("storage.containers.raw_data", &containers.raw_data),
            ("storage.containers.content_library", &containers.content_library),
            ("storage.containers.doc_library", &containers.doc_library),
            ("storage.containers.citation_map", &containers.citation_map),
            ("storage.containers.logs", &containers.logs),
            ("source.input_folder", &self.source.input_folder),
            ("mirror.drive_id", &self.mirror.drive_id),
            ("mirror.folder", &self.mirror.folder),
            ("mirror.mapping_filename", &self.mirror.mapping_filename),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.managed_extension().is_empty() {
            return Err(ConfigError::Invalid(
                "mirror.managed_extension must not be empty".into(),
            ));
        }
        if self.mirror.max_workers == 0 {
            return Err(ConfigError::Invalid("mirror.max_workers must be at least 1".into()));
        }
        if self.cleaning.retention_months == 0 {
            return Err(ConfigError::Invalid(
                "cleaning.retention_months must be at least 1".into(),
            ));
        }
        let threshold = self.cleaning.similarity_review_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "cleaning.similarity_review_threshold must be in (0, 1], got {threshold}"
            )));
        }
        self.hash_algorithm()?;
        if self.scheduler.enabled && self.scheduler.cron.is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.cron needs at least one expression when enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm, ConfigError> {
        self.cleaning
            .hash_algorithm
            .parse()
            .map_err(|e: rcl_core::CoreError| ConfigError::Invalid(e.to_string()))
    }

    /// Lower-cased extension without the leading dot.
    pub fn managed_extension(&self) -> String {
        self.mirror
            .managed_extension
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase()
    }

    pub fn storage_root(&self) -> PathBuf {
        self.resolve(&self.storage.root)
    }

    pub fn reports_root(&self) -> PathBuf {
        self.resolve(&self.reports_dir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

pub fn secret_from_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingSecret(name))
}

#[cfg(test)]
pub(crate) const SAMPLE_YAML: &str = r#"
storage:
  root: ./data
  containers:
    raw_data: rfp-raw-data
    content_library: rfp-content-library
    doc_library: rfp-content-doc-library
    citation_map: rfp-citation-map
    logs: rfp-logs
source:
  input_folder: inbox
mirror:
  drive_id: drive-1
  folder: RFP Content Docs
"#;
