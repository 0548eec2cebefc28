//! Durable item and retry-state store with atomic file operations
//!
//! The store is the only shared mutable resource in a run. Items are
//! claimed by exactly one worker at a time; every mutation is persisted
//! before control returns to the orchestrator, so a process restart
//! resumes from the last persisted transition.

use crate::core::item::ContentItem;
use crate::core::retry::{RetryKey, RetryState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const ITEMS_FILE: &str = "items.json";
const RETRIES_FILE: &str = "retries.json";

#[derive(Debug, Serialize, Deserialize)]
struct ItemsDataFile {
    version: String,
    items: BTreeMap<String, ContentItem>,
    last_updated: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RetriesDataFile {
    version: String,
    retries: BTreeMap<String, RetryState>,
    last_updated: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    items: BTreeMap<String, ContentItem>,
    retries: BTreeMap<String, RetryState>,
    /// Item ids currently owned by a worker; in-memory only
    claimed: HashSet<String>,
}

/// File-backed store for ContentItem and RetryState records
pub struct StateStore {
    inner: Mutex<StoreInner>,
    items_path: PathBuf,
    retries_path: PathBuf,
}

impl StateStore {
    /// Open the store, loading any existing state files
    pub async fn open<P: AsRef<Path>>(state_dir: P) -> anyhow::Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir).await?;

        let items_path = state_dir.join(ITEMS_FILE);
        let retries_path = state_dir.join(RETRIES_FILE);

        let mut inner = StoreInner::default();

        if fs::metadata(&items_path).await.is_ok() {
            let content = fs::read_to_string(&items_path).await?;
            let data: ItemsDataFile = serde_json::from_str(&content)?;
            inner.items = data.items;
        }

        if fs::metadata(&retries_path).await.is_ok() {
            let content = fs::read_to_string(&retries_path).await?;
            let data: RetriesDataFile = serde_json::from_str(&content)?;
            inner.retries = data.retries;
        }

        Ok(Self {
            inner: Mutex::new(inner),
            items_path,
            retries_path,
        })
    }

    /// Point lookup by item identifier
    pub async fn get_item(&self, id: &str) -> Option<ContentItem> {
        self.inner.lock().await.items.get(id).cloned()
    }

    /// Whether an item with this identifier exists
    pub async fn contains_item(&self, id: &str) -> bool {
        self.inner.lock().await.items.contains_key(id)
    }

    /// Insert or replace an item and persist
    pub async fn upsert_item(&self, item: ContentItem) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.items.insert(item.id.clone(), item);
        self.save_items(&inner).await
    }

    /// All items, in identifier order
    pub async fn all_items(&self) -> Vec<ContentItem> {
        self.inner.lock().await.items.values().cloned().collect()
    }

    /// Scan for items that still have pending work
    pub async fn pending_items(&self) -> Vec<ContentItem> {
        self.inner
            .lock()
            .await
            .items
            .values()
            .filter(|item| item.has_pending_work())
            .cloned()
            .collect()
    }

    /// Whether any item already published this topic successfully
    pub async fn topic_published(&self, slug: &str) -> bool {
        self.inner
            .lock()
            .await
            .items
            .values()
            .any(|item| item.slug == slug && item.is_terminal_succeeded())
    }

    /// Claim exclusive ownership of an item for one worker
    ///
    /// Returns false if another worker already holds the item. The flag is
    /// checked and set under the store lock, so two workers can never both
    /// own the same identifier.
    pub async fn claim(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.claimed.contains(id) {
            return false;
        }
        inner.claimed.insert(id.to_string());
        true
    }

    /// Release a previously claimed item
    pub async fn release(&self, id: &str) {
        self.inner.lock().await.claimed.remove(id);
    }

    /// Retry state for a key, if any
    pub async fn retry_state(&self, key: &RetryKey) -> Option<RetryState> {
        self.inner.lock().await.retries.get(&key.encode()).cloned()
    }

    /// Persist a retry state
    pub async fn set_retry_state(&self, key: &RetryKey, state: RetryState) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.retries.insert(key.encode(), state);
        self.save_retries(&inner).await
    }

    /// Clear a retry state (on stage or target success)
    pub async fn clear_retry_state(&self, key: &RetryKey) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.retries.remove(&key.encode()).is_some() {
            self.save_retries(&inner).await?;
        }
        Ok(())
    }

    /// Clear every retry state recorded for an item
    pub async fn clear_item_retry_states(&self, item_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let prefix = format!("{}|", item_id);
        let before = inner.retries.len();
        inner.retries.retain(|key, _| !key.starts_with(&prefix));
        if inner.retries.len() != before {
            self.save_retries(&inner).await?;
        }
        Ok(())
    }

    // Atomic write: write to temp file, then rename
    async fn save_items(&self, inner: &StoreInner) -> anyhow::Result<()> {
        let data = ItemsDataFile {
            version: "1.0".to_string(),
            items: inner.items.clone(),
            last_updated: Utc::now().to_rfc3339(),
        };
        Self::write_atomic(&self.items_path, &serde_json::to_string_pretty(&data)?).await
    }

    async fn save_retries(&self, inner: &StoreInner) -> anyhow::Result<()> {
        let data = RetriesDataFile {
            version: "1.0".to_string(),
            retries: inner.retries.clone(),
            last_updated: Utc::now().to_rfc3339(),
        };
        Self::write_atomic(&self.retries_path, &serde_json::to_string_pretty(&data)?).await
    }

    async fn write_atomic(path: &Path, json: &str) -> anyhow::Result<()> {
        let temp_file = path.with_extension("json.tmp");
        fs::write(&temp_file, json).await?;
        fs::rename(&temp_file, path).await?;
        Ok(())
    }
}
