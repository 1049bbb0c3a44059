//! Search index refresh after the mirror has converged.

use std::sync::Arc;

use anyhow::{Context, Result};
use rcl_adapters::SearchIndexService;
use serde::Serialize;
use tracing::info;

use crate::config::IndexConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRefreshReport {
    pub index: String,
    pub indexer: String,
    pub purged: usize,
}

pub struct IndexRefreshTrigger {
    service: Arc<dyn SearchIndexService>,
    index_name: String,
    indexer_name: String,
}

impl IndexRefreshTrigger {
    pub fn new(config: &IndexConfig, service: Arc<dyn SearchIndexService>) -> Self {
        Self {
            service,
            index_name: config.index_name.clone(),
            indexer_name: config.indexer_name.clone(),
        }
    }

    /// Purge, then reset, then run. Each step must succeed before the next.
    pub async fn refresh(&self) -> Result<IndexRefreshReport> {
        let purged = self
            .service
            .purge(&self.index_name)
            .await
            .with_context(|| format!("purging index {}", self.index_name))?;
        info!(index = %self.index_name, purged, "index purged");

        self.service
            .reset(&self.indexer_name)
            .await
            .with_context(|| format!("resetting indexer {}", self.indexer_name))?;
        self.service
            .run(&self.indexer_name)
            .await
            .with_context(|| format!("running indexer {}", self.indexer_name))?;
        info!(indexer = %self.indexer_name, "indexer reset and started");

        Ok(IndexRefreshReport {
            index: self.index_name.clone(),
            indexer: self.indexer_name.clone(),
            purged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_adapters::MemorySearchIndex;

    fn config() -> IndexConfig {
        IndexConfig {
            endpoint: "https://search.example".into(),
            index_name: "rfp-index".into(),
            indexer_name: "rfp-indexer".into(),
            key_field: "chunk_id".into(),
            api_version: "2024-07-01".into(),
            timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn refresh_runs_purge_reset_run_in_order() {
        let service = Arc::new(MemorySearchIndex::with_documents(4));
        let trigger = IndexRefreshTrigger::new(&config(), service.clone());
        let report = trigger.refresh().await.unwrap();
        assert_eq!(report.purged, 4);
        assert_eq!(
            service.calls().await,
            vec!["purge:rfp-index", "reset:rfp-indexer", "run:rfp-indexer"]
        );
    }
}
