//! Search index service: purge documents, reset and run the indexer.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::info;

use crate::{ensure_success, AdapterError};

/// Search page size used while purging.
const PURGE_BATCH: usize = 1000;
/// Upper bound on purge rounds; a stuck delete would otherwise spin forever.
const MAX_PURGE_ROUNDS: usize = 10_000;

#[async_trait]
pub trait SearchIndexService: Send + Sync {
    /// Deletes every document from `index`, returning how many were removed.
    async fn purge(&self, index: &str) -> Result<usize, AdapterError>;
    async fn reset(&self, indexer: &str) -> Result<(), AdapterError>;
    async fn run(&self, indexer: &str) -> Result<(), AdapterError>;
}

#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub key_field: String,
    pub timeout: Duration,
}

/// Azure-Search-compatible REST client.
#[derive(Debug)]
pub struct RestSearchIndex {
    client: reqwest::Client,
    config: SearchIndexConfig,
}

impl RestSearchIndex {
    pub fn new(config: SearchIndexConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/'),
            self.config.api_version
        )
    }

    async fn post(
        &self,
        path: &str,
        body: Option<JsonValue>,
    ) -> Result<reqwest::Response, AdapterError> {
        let mut req = self
            .client
            .post(self.url(path))
            .header("api-key", &self.config.api_key);
        req = match body {
            Some(body) => req.json(&body),
            None => req.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        ensure_success(req.send().await?).await
    }

    fn extract_keys(&self, page: &JsonValue) -> Vec<String> {
        page.get("value")
            .and_then(JsonValue::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| doc.get(&self.config.key_field))
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchIndexService for RestSearchIndex {
    async fn purge(&self, index: &str) -> Result<usize, AdapterError> {
        let mut removed = 0usize;
        for _ in 0..MAX_PURGE_ROUNDS {
            let page: JsonValue = self
                .post(
                    &format!("indexes/{index}/docs/search"),
                    Some(json!({
                        "search": "*",
                        "select": self.config.key_field,
                        "top": PURGE_BATCH,
                    })),
                )
                .await?
                .json()
                .await?;
            let keys = self.extract_keys(&page);
            if keys.is_empty() {
                return Ok(removed);
            }

            let actions = keys
                .iter()
                .map(|key| {
                    let mut action = serde_json::Map::new();
                    action.insert("@search.action".into(), json!("delete"));
                    action.insert(self.config.key_field.clone(), json!(key));
                    JsonValue::Object(action)
                })
                .collect::<Vec<_>>();
            self.post(&format!("indexes/{index}/docs/index"), Some(json!({ "value": actions })))
                .await?;
            removed += keys.len();
            info!(index, batch = keys.len(), removed, "index purge batch deleted");
        }
        Err(AdapterError::Message(format!(
            "index {index} still had documents after {MAX_PURGE_ROUNDS} purge rounds"
        )))
    }

    async fn reset(&self, indexer: &str) -> Result<(), AdapterError> {
        self.post(&format!("indexers/{indexer}/reset"), None).await?;
        Ok(())
    }

    async fn run(&self, indexer: &str) -> Result<(), AdapterError> {
        self.post(&format!("indexers/{indexer}/run"), None).await?;
        Ok(())
    }
}

/// Records calls in order; used to assert refresh sequencing.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    calls: Mutex<Vec<String>>,
    documents: Mutex<usize>,
}

impl MemorySearchIndex {
    pub fn with_documents(count: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            documents: Mutex::new(count),
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SearchIndexService for MemorySearchIndex {
    async fn purge(&self, index: &str) -> Result<usize, AdapterError> {
        self.calls.lock().await.push(format!("purge:{index}"));
        let mut docs = self.documents.lock().await;
        Ok(std::mem::take(&mut *docs))
    }

    async fn reset(&self, indexer: &str) -> Result<(), AdapterError> {
        self.calls.lock().await.push(format!("reset:{indexer}"));
        Ok(())
    }

    async fn run(&self, indexer: &str) -> Result<(), AdapterError> {
        self.calls.lock().await.push(format!("run:{indexer}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(key_field: &str) -> RestSearchIndex {
        RestSearchIndex::new(SearchIndexConfig {
            endpoint: "https://search.example/".into(),
            api_key: "k".into(),
            api_version: "2024-07-01".into(),
            key_field: key_field.into(),
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    #[test]
    fn urls_carry_api_version() {
        assert_eq!(
            client("chunk_id").url("/indexers/rfp/reset"),
            "https://search.example/indexers/rfp/reset?api-version=2024-07-01"
        );
    }

    #[test]
    fn keys_are_read_from_configured_field() {
        let page = json!({
            "value": [{"chunk_id": "a"}, {"chunk_id": "b"}, {"other": "c"}]
        });
        assert_eq!(client("chunk_id").extract_keys(&page), vec!["a", "b"]);
        assert!(client("chunk_id").extract_keys(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn memory_index_purges_once() {
        let index = MemorySearchIndex::with_documents(3);
        assert_eq!(index.purge("i").await.unwrap(), 3);
        assert_eq!(index.purge("i").await.unwrap(), 0);
        assert_eq!(index.calls().await, vec!["purge:i", "purge:i"]);
    }
}
