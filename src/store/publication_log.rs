//! Append-only publication log
//!
//! One JSON line per publication attempt. Records are never mutated after
//! creation; the log is both the audit trail analytics reads and the guard
//! distribution consults before re-attempting an external call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const LOG_FILE: &str = "publications.jsonl";

/// Immutable fact about one publication attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicationRecord {
    pub item_id: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,

    /// External reference (e.g., post URL) when the target reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Error text on failed attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublicationRecord {
    pub fn succeeded(
        item_id: &str,
        target: &str,
        external_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: item_id.to_string(),
            target: target.to_string(),
            timestamp: now,
            success: true,
            external_ref,
            error: None,
        }
    }

    pub fn failed(item_id: &str, target: &str, error: String, now: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.to_string(),
            target: target.to_string(),
            timestamp: now,
            success: false,
            external_ref: None,
            error: Some(error),
        }
    }
}

/// Append-only store of PublicationRecord facts
pub struct PublicationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PublicationLog {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            path: state_dir.as_ref().join(LOG_FILE),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one record
    pub async fn append(&self, record: &PublicationRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Read every record, oldest first
    pub async fn records(&self) -> anyhow::Result<Vec<PublicationRecord>> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }

        Ok(records)
    }

    /// Records for one item
    pub async fn records_for_item(&self, item_id: &str) -> anyhow::Result<Vec<PublicationRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|record| record.item_id == item_id)
            .collect())
    }

    /// Whether a succeeded record exists for (item, target)
    ///
    /// Distribution checks this before every external call, so a lost local
    /// acknowledgement cannot cause a second publication.
    pub async fn has_succeeded(&self, item_id: &str, target: &str) -> anyhow::Result<bool> {
        Ok(self
            .records()
            .await?
            .iter()
            .any(|record| record.item_id == item_id && record.target == target && record.success))
    }

    /// The succeeded record for (item, target), if one exists
    pub async fn succeeded_record(
        &self,
        item_id: &str,
        target: &str,
    ) -> anyhow::Result<Option<PublicationRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|record| record.item_id == item_id && record.target == target && record.success))
    }
}
