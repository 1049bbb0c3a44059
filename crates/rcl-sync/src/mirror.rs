//! Mirror synchronizer: keeps the external folder equal, by name, to the document container.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use rcl_adapters::{list_all, write_workbook, MirrorItem, MirrorPlatform};
use rcl_core::MappingEntry;
use rcl_storage::DocumentStore;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;

pub const MAPPING_COLUMNS: [&str; 2] = ["file_name", "preview_url"];
const DUPLICATE_EXAMPLES: usize = 10;

/// Case-insensitive extension check; `ext` has no leading dot.
pub fn has_extension(name: &str, ext: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, e)| !stem.is_empty() && e.eq_ignore_ascii_case(ext))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_upload: Vec<String>,
    pub to_delete: Vec<MirrorItem>,
}

/// Decides uploads and deletes from two immutable listings.
pub fn plan(source_names: &[String], external: &[MirrorItem], extension: &str) -> SyncPlan {
    let source = source_names
        .iter()
        .filter(|n| has_extension(n, extension))
        .map(String::as_str)
        .collect::<BTreeSet<_>>();
    let external_names = external
        .iter()
        .filter(|i| has_extension(&i.name, extension))
        .map(|i| i.name.as_str())
        .collect::<HashSet<_>>();

    let to_upload = source
        .iter()
        .filter(|n| !external_names.contains(*n))
        .map(|n| n.to_string())
        .collect();
    let mut to_delete = external
        .iter()
        .filter(|i| has_extension(&i.name, extension) && !source.contains(i.name.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    to_delete.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    SyncPlan {
        to_upload,
        to_delete,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub source_documents: usize,
    pub external_before: usize,
    pub uploaded: Vec<String>,
    pub upload_failures: Vec<ItemFailure>,
    pub deleted: Vec<String>,
    pub delete_failures: Vec<ItemFailure>,
    pub external_after: usize,
    pub duplicate_names: Vec<String>,
    pub mapping: Vec<MappingEntry>,
}

/// Last-observed entry wins for repeated names; returns the repeated names too.
pub fn build_mapping(items: &[MirrorItem], extension: &str) -> (Vec<MappingEntry>, Vec<String>) {
    let mut by_name: BTreeMap<&str, &MirrorItem> = BTreeMap::new();
    let mut duplicates = BTreeSet::new();
    for item in items.iter().filter(|i| has_extension(&i.name, extension)) {
        if by_name.insert(item.name.as_str(), item).is_some() {
            duplicates.insert(item.name.clone());
        }
    }
    let mapping = by_name
        .into_iter()
        .map(|(name, item)| MappingEntry {
            file_name: name.to_string(),
            preview_url: item.web_url.clone().unwrap_or_default(),
        })
        .collect();
    (mapping, duplicates.into_iter().collect())
}

/// Runs `op` over `items` with at most `max_workers` in flight.
/// Results arrive in completion order, each tagged with its item name.
async fn run_bounded<I, F, Fut>(
    max_workers: usize,
    items: Vec<I>,
    op: F,
) -> Result<Vec<(String, Result<(), String>)>>
where
    I: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = (String, Result<(), String>)> + Send + 'static,
{
    let limit = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();
    for item in items {
        let limit = Arc::clone(&limit);
        let work = op(item);
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await;
            work.await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.context("mirror worker panicked")?);
    }
    Ok(outcomes)
}

pub struct MirrorSynchronizer {
    store: Arc<dyn DocumentStore>,
    platform: Arc<dyn MirrorPlatform>,
    source_container: String,
    mapping_container: String,
    mapping_filename: String,
    folder: String,
    extension: String,
    max_workers: usize,
}

impl MirrorSynchronizer {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn DocumentStore>,
        platform: Arc<dyn MirrorPlatform>,
    ) -> Self {
        Self {
            store,
            platform,
            source_container: config.storage.containers.doc_library.clone(),
            mapping_container: config.storage.containers.citation_map.clone(),
            mapping_filename: config.mirror.mapping_filename.clone(),
            folder: config.mirror.folder.clone(),
            extension: config.managed_extension(),
            max_workers: config.mirror.max_workers,
        }
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        let source_names = self
            .store
            .list(&self.source_container)
            .await
            .with_context(|| format!("listing {}", self.source_container))?;
        let external = list_all(self.platform.as_ref(), &self.folder)
            .await
            .with_context(|| format!("listing mirror folder {}", self.folder))?;

        let plan = plan(&source_names, &external, &self.extension);
        let mut report = SyncReport {
            source_documents: source_names
                .iter()
                .filter(|n| has_extension(n, &self.extension))
                .count(),
            external_before: external.len(),
            ..SyncReport::default()
        };
        info!(
            source = report.source_documents,
            external = report.external_before,
            to_upload = plan.to_upload.len(),
            to_delete = plan.to_delete.len(),
            "mirror sync planned"
        );

        for (name, outcome) in self.upload_all(plan.to_upload).await? {
            match outcome {
                Ok(()) => report.uploaded.push(name),
                Err(reason) => report.upload_failures.push(ItemFailure { name, reason }),
            }
        }
        for (name, outcome) in self.delete_all(plan.to_delete).await? {
            match outcome {
                Ok(()) => report.deleted.push(name),
                Err(reason) => report.delete_failures.push(ItemFailure { name, reason }),
            }
        }
        report.uploaded.sort();
        report.deleted.sort();
        report.upload_failures.sort_by(|a, b| a.name.cmp(&b.name));
        report.delete_failures.sort_by(|a, b| a.name.cmp(&b.name));

        let after = list_all(self.platform.as_ref(), &self.folder)
            .await
            .with_context(|| format!("re-listing mirror folder {}", self.folder))?;
        report.external_after = after.len();

        let (mapping, duplicates) = build_mapping(&after, &self.extension);
        if !duplicates.is_empty() {
            let examples = duplicates
                .iter()
                .take(DUPLICATE_EXAMPLES)
                .cloned()
                .collect::<Vec<_>>();
            warn!(
                duplicates = duplicates.len(),
                examples = ?examples,
                "duplicate file names in mirror folder; keeping the last observed entry"
            );
        }
        self.publish_mapping(&mapping).await?;
        report.mapping = mapping;
        report.duplicate_names = duplicates;

        info!(
            uploaded = report.uploaded.len(),
            upload_failures = report.upload_failures.len(),
            deleted = report.deleted.len(),
            delete_failures = report.delete_failures.len(),
            mapping_rows = report.mapping.len(),
            "mirror sync finished"
        );
        Ok(report)
    }

    async fn upload_all(&self, names: Vec<String>) -> Result<Vec<(String, Result<(), String>)>> {
        run_bounded(self.max_workers, names, |name: String| {
            let store = Arc::clone(&self.store);
            let platform = Arc::clone(&self.platform);
            let container = self.source_container.clone();
            let folder = self.folder.clone();
            async move {
                let outcome = match store.read(&container, &name).await {
                    Err(e) => Err(format!("reading source document: {e}")),
                    Ok(bytes) => platform
                        .upload(&folder, &name, bytes)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string()),
                };
                match &outcome {
                    Ok(()) => info!(name = %name, "uploaded"),
                    Err(reason) => error!(name = %name, reason = %reason, "upload failed"),
                }
                (name, outcome)
            }
        })
        .await
    }

    async fn delete_all(
        &self,
        items: Vec<MirrorItem>,
    ) -> Result<Vec<(String, Result<(), String>)>> {
        run_bounded(self.max_workers, items, |item: MirrorItem| {
            let platform = Arc::clone(&self.platform);
            let folder = self.folder.clone();
            async move {
                let outcome = match platform.delete(&folder, &item.id).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(format!("platform did not confirm deletion of {}", item.id)),
                    Err(e) => Err(e.to_string()),
                };
                match &outcome {
                    Ok(()) => info!(name = %item.name, id = %item.id, "deleted orphan"),
                    Err(reason) => {
                        error!(name = %item.name, id = %item.id, reason = %reason, "delete failed")
                    }
                }
                (item.name, outcome)
            }
        })
        .await
    }

    async fn publish_mapping(&self, mapping: &[MappingEntry]) -> Result<()> {
        let rows = mapping
            .iter()
            .map(|m| vec![Some(m.file_name.clone()), Some(m.preview_url.clone())])
            .collect::<Vec<_>>();
        let bytes = write_workbook(&MAPPING_COLUMNS, &rows).context("encoding mapping")?;
        self.store
            .write(&self.mapping_container, &self.mapping_filename, &bytes)
            .await
            .with_context(|| format!("publishing {}", self.mapping_filename))?;
        info!(name = %self.mapping_filename, rows = mapping.len(), "mapping published");
        Ok(())
    }
}
