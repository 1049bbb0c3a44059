//! Document store contract plus filesystem and in-memory implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "rcl-storage";

/// Workbook extensions accepted as raw survey exports.
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{container}/{name} not found")]
    NotFound { container: String, name: String },
    #[error("invalid object name {0:?}")]
    InvalidName(String),
    #[error("no spreadsheet found under {0}")]
    NoSpreadsheet(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub container: String,
    pub name: String,
    pub byte_size: usize,
    pub content_hash: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Flat, container-scoped blob storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError>;
    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError>;
    async fn write(
        &self,
        container: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument, StoreError>;
    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError>;
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..");
    if bad {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn stored(container: &str, name: &str, bytes: &[u8]) -> StoredDocument {
    StoredDocument {
        container: container.to_string(),
        name: name.to_string(),
        byte_size: bytes.len(),
        content_hash: sha256_hex(bytes),
    }
}

/// One directory per container under a shared root.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.container_dir(container)?.join(name))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.container_dir(container)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&dir, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            // Dot-files are in-flight temp writes.
            if is_file && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(container, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    /// Overwrites `name` atomically via a temp file in the same directory.
    async fn write(
        &self,
        container: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument, StoreError> {
        let dir = self.container_dir(container)?;
        let path = self.object_path(container, name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let temp_path = dir.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&path, err));
        }
        debug!(container, name, bytes = bytes.len(), "document written");
        Ok(stored(container, name, bytes))
    }

    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        let path = self.object_path(container, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }
}

/// Process-local store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let map = self.containers.lock().await;
        Ok(map
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let map = self.containers.lock().await;
        map.get(container)
            .and_then(|c| c.get(name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn write(
        &self,
        container: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument, StoreError> {
        validate_name(container)?;
        validate_name(name)?;
        let mut map = self.containers.lock().await;
        map.entry(container.to_string())
            .or_default()
            .insert(name.to_string(), bytes.to_vec());
        Ok(stored(container, name, bytes))
    }

    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        let mut map = self.containers.lock().await;
        map.get_mut(container)
            .and_then(|c| c.remove(name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct LatestSpreadsheet {
    pub name: String,
    pub bytes: Vec<u8>,
    pub modified_at: DateTime<Utc>,
}

/// Where raw survey exports are dropped.
#[async_trait]
pub trait SpreadsheetSource: Send + Sync {
    /// Newest workbook by modification time under `folder`.
    async fn list_latest(&self, folder: &str) -> Result<LatestSpreadsheet, StoreError>;
}

#[derive(Debug, Clone)]
pub struct FsSpreadsheetSource {
    root: PathBuf,
}

impl FsSpreadsheetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_spreadsheet(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|ok| e.eq_ignore_ascii_case(ok))
        })
        .unwrap_or(false)
}

#[async_trait]
impl SpreadsheetSource for FsSpreadsheetSource {
    async fn list_latest(&self, folder: &str) -> Result<LatestSpreadsheet, StoreError> {
        let dir = self.root.join(folder);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let mut latest: Option<(SystemTime, PathBuf, String)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !is_spreadsheet(&name) {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StoreError::io(&entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| StoreError::io(&entry.path(), e))?;
            let newer = latest
                .as_ref()
                .map(|(current, _, _)| modified > *current)
                .unwrap_or(true);
            if newer {
                latest = Some((modified, entry.path(), name));
            }
        }

        let Some((modified, path, name)) = latest else {
            return Err(StoreError::NoSpreadsheet(dir.display().to_string()));
        };
        let bytes = fs::read(&path).await.map_err(|e| StoreError::io(&path, e))?;
        Ok(LatestSpreadsheet {
            name,
            bytes,
            modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn content_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn fs_store_overwrites_and_lists_sorted() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());

        store.write("docs", "b.docx", b"one").await.expect("write b");
        store.write("docs", "a.docx", b"two").await.expect("write a");
        let again = store.write("docs", "b.docx", b"three").await.expect("rewrite b");

        assert_eq!(again.byte_size, 5);
        assert_eq!(store.list("docs").await.unwrap(), vec!["a.docx", "b.docx"]);
        assert_eq!(store.read("docs", "b.docx").await.unwrap(), b"three");
    }

    #[tokio::test]
    async fn fs_store_treats_missing_container_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());
        assert!(store.list("nothing-here").await.unwrap().is_empty());
        assert!(matches!(
            store.read("nothing-here", "x").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("nothing-here", "x").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn fs_store_rejects_path_escapes() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());
        for name in ["../evil", "a/b", "", ".hidden"] {
            assert!(matches!(
                store.write("docs", name, b"x").await,
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_deletes() {
        let store = MemoryDocumentStore::new();
        store.write("c", "x.docx", b"x").await.unwrap();
        assert_eq!(store.list("c").await.unwrap(), vec!["x.docx"]);
        store.delete("c", "x.docx").await.unwrap();
        assert!(store.list("c").await.unwrap().is_empty());
        assert!(store.delete("c", "x.docx").await.is_err());
    }

    #[tokio::test]
    async fn spreadsheet_source_picks_newest_workbook() {
        let dir = tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();

        let now = SystemTime::now();
        for (name, age_secs) in [("old.xlsx", 300u64), ("new.XLSX", 10), ("notes.txt", 0)] {
            let path = inbox.join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(now - Duration::from_secs(age_secs))
                .unwrap();
        }

        let source = FsSpreadsheetSource::new(dir.path());
        let latest = source.list_latest("inbox").await.expect("latest");
        assert_eq!(latest.name, "new.XLSX");
        assert_eq!(latest.bytes, b"new.XLSX");
    }

    #[tokio::test]
    async fn spreadsheet_source_errors_when_empty() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        let source = FsSpreadsheetSource::new(dir.path());
        assert!(matches!(
            source.list_latest("inbox").await,
            Err(StoreError::NoSpreadsheet(_))
        ));
    }
}
