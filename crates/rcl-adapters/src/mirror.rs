//! External collaboration-platform folder: paginated listing, create-by-name, delete-by-id.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ensure_success, AdapterError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorItem {
    pub name: String,
    pub id: String,
    pub web_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPage {
    pub items: Vec<MirrorItem>,
    /// Opaque token for the next page; `None` once exhausted.
    pub continuation: Option<String>,
}

#[async_trait]
pub trait MirrorPlatform: Send + Sync {
    async fn list_page(
        &self,
        folder: &str,
        continuation: Option<&str>,
    ) -> Result<MirrorPage, AdapterError>;

    /// Creates `name` in `folder`, replacing any same-named file.
    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<MirrorItem, AdapterError>;

    async fn delete(&self, folder: &str, id: &str) -> Result<bool, AdapterError>;
}

/// Follows continuation tokens until the platform reports none.
pub async fn list_all(
    platform: &dyn MirrorPlatform,
    folder: &str,
) -> Result<Vec<MirrorItem>, AdapterError> {
    let mut items = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut continuation: Option<String> = None;

    loop {
        let page = platform.list_page(folder, continuation.as_deref()).await?;
        debug!(folder, page_items = page.items.len(), "mirror page listed");
        items.extend(page.items);
        match page.continuation {
            Some(token) => {
                if !seen_tokens.insert(token.clone()) {
                    return Err(AdapterError::Message(format!(
                        "continuation token repeated while listing {folder}"
                    )));
                }
                continuation = Some(token);
            }
            None => break,
        }
    }
    Ok(items)
}

#[derive(Debug, Clone)]
pub struct GraphMirrorConfig {
    pub base_url: String,
    pub drive_id: String,
    pub access_token: String,
    pub timeout: Duration,
}

/// Microsoft Graph drive-item adapter. Token acquisition happens elsewhere.
#[derive(Debug)]
pub struct GraphMirror {
    client: reqwest::Client,
    config: GraphMirrorConfig,
}

#[derive(Debug, Deserialize)]
struct GraphItem {
    id: String,
    name: String,
    #[serde(rename = "webUrl")]
    web_url: Option<String>,
    #[serde(rename = "createdDateTime")]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    value: Vec<GraphItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

impl From<GraphItem> for MirrorItem {
    fn from(item: GraphItem) -> Self {
        Self {
            name: item.name,
            id: item.id,
            web_url: item.web_url,
            created_at: item.created_at,
        }
    }
}

impl GraphMirror {
    pub fn new(config: GraphMirrorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    fn drive_url(&self, tail: &[String]) -> Result<Url, AdapterError> {
        let mut url = Url::parse(self.config.base_url.trim_end_matches('/'))
            .map_err(|e| AdapterError::Message(format!("invalid mirror base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::Message("mirror base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["drives", self.config.drive_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    /// `root:/a/b/<leaf>:/<action>` in drive-path addressing.
    fn path_url(
        &self,
        folder: &str,
        leaf: Option<&str>,
        action: &str,
    ) -> Result<Url, AdapterError> {
        let mut segments: Vec<String> = folder
            .split('/')
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect();
        if let Some(leaf) = leaf {
            segments.push(leaf.to_string());
        }
        let mut tail = Vec::with_capacity(segments.len() + 2);
        match segments.split_last() {
            None => tail.push("root".to_string()),
            Some((last, init)) => {
                tail.push("root:".to_string());
                tail.extend(init.iter().cloned());
                tail.push(format!("{last}:"));
            }
        }
        tail.push(action.to_string());
        self.drive_url(&tail)
    }
}

#[async_trait]
impl MirrorPlatform for GraphMirror {
    async fn list_page(
        &self,
        folder: &str,
        continuation: Option<&str>,
    ) -> Result<MirrorPage, AdapterError> {
        let url = match continuation {
            Some(next) => Url::parse(next)
                .map_err(|e| AdapterError::Message(format!("invalid continuation link: {e}")))?,
            None => self.path_url(folder, None, "children")?,
        };
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let page: GraphPage = ensure_success(resp).await?.json().await?;
        Ok(MirrorPage {
            items: page.value.into_iter().map(MirrorItem::from).collect(),
            continuation: page.next_link,
        })
    }

    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<MirrorItem, AdapterError> {
        let url = self.path_url(folder, Some(name), "content")?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.config.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let item: GraphItem = ensure_success(resp).await?.json().await?;
        Ok(item.into())
    }

    async fn delete(&self, _folder: &str, id: &str) -> Result<bool, AdapterError> {
        let url = self.drive_url(&["items".to_string(), id.to_string()])?;
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(true);
        }
        ensure_success(resp).await?;
        Ok(false)
    }
}

#[derive(Debug, Default)]
struct MemoryMirrorState {
    folders: BTreeMap<String, Vec<MirrorItem>>,
    contents: BTreeMap<String, Vec<u8>>,
    next_id: u64,
    fail_uploads: HashSet<String>,
    fail_deletes: HashSet<String>,
    upload_calls: Vec<String>,
    delete_calls: Vec<String>,
    list_calls: usize,
}

/// In-process mirror with small pages and injectable per-name failures.
#[derive(Debug)]
pub struct MemoryMirror {
    page_size: usize,
    state: Mutex<MemoryMirrorState>,
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::with_page_size(100)
    }
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(MemoryMirrorState::default()),
        }
    }

    /// Inserts an item verbatim, duplicates included.
    pub async fn seed(&self, folder: &str, item: MirrorItem) {
        let mut state = self.state.lock().await;
        state.folders.entry(folder.to_string()).or_default().push(item);
    }

    pub async fn fail_upload_of(&self, name: &str) {
        self.state.lock().await.fail_uploads.insert(name.to_string());
    }

    pub async fn fail_delete_of(&self, name: &str) {
        self.state.lock().await.fail_deletes.insert(name.to_string());
    }

    pub async fn names(&self, folder: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names = state
            .folders
            .get(folder)
            .map(|items| items.iter().map(|i| i.name.clone()).collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub async fn content_of(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().await.contents.get(id).cloned()
    }

    pub async fn upload_calls(&self) -> Vec<String> {
        self.state.lock().await.upload_calls.clone()
    }

    pub async fn delete_calls(&self) -> Vec<String> {
        self.state.lock().await.delete_calls.clone()
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }
}

#[async_trait]
impl MirrorPlatform for MemoryMirror {
    async fn list_page(
        &self,
        folder: &str,
        continuation: Option<&str>,
    ) -> Result<MirrorPage, AdapterError> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        let start = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| AdapterError::Message(format!("bad continuation token {token}")))?,
            None => 0,
        };
        let all = state.folders.get(folder).cloned().unwrap_or_default();
        let end = (start + self.page_size).min(all.len());
        let items = all.get(start..end).map(<[MirrorItem]>::to_vec).unwrap_or_default();
        Ok(MirrorPage {
            items,
            continuation: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<MirrorItem, AdapterError> {
        let mut state = self.state.lock().await;
        state.upload_calls.push(name.to_string());
        if state.fail_uploads.contains(name) {
            return Err(AdapterError::HttpStatus {
                status: 503,
                body: "injected upload failure".into(),
            });
        }

        let existing = state
            .folders
            .get(folder)
            .and_then(|items| items.iter().find(|i| i.name == name))
            .cloned();
        let item = match existing {
            Some(item) => item,
            None => {
                state.next_id += 1;
                let item = MirrorItem {
                    name: name.to_string(),
                    id: format!("item-{}", state.next_id),
                    web_url: Some(format!("https://mirror.example/{folder}/{name}")),
                    created_at: Some(Utc::now()),
                };
                state
                    .folders
                    .entry(folder.to_string())
                    .or_default()
                    .push(item.clone());
                item
            }
        };
        state.contents.insert(item.id.clone(), bytes);
        Ok(item)
    }

    async fn delete(&self, folder: &str, id: &str) -> Result<bool, AdapterError> {
        let mut state = self.state.lock().await;
        state.delete_calls.push(id.to_string());
        let Some(items) = state.folders.get(folder) else {
            return Ok(false);
        };
        let Some(pos) = items.iter().position(|i| i.id == id) else {
            return Ok(false);
        };
        let name = items[pos].name.clone();
        if state.fail_deletes.contains(&name) {
            return Err(AdapterError::HttpStatus {
                status: 423,
                body: format!("injected delete failure for {name}"),
            });
        }
        if let Some(items) = state.folders.get_mut(folder) {
            items.remove(pos);
        }
        state.contents.remove(id);
        Ok(true)
    }
}
