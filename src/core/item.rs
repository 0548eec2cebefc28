//! Content item data model and per-item state machine
//!
//! A `ContentItem` is the unit of work driven through the fixed pipeline
//! Source → Enrichment → Monetization → Distribution. Its identifier is
//! derived from topic slug and creation date and serves as the idempotency
//! key for item creation.

use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

lazy_static! {
    static ref NON_SLUG_CHARS: Regex = Regex::new(r"[^a-z0-9\s-]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Pipeline stages in execution order
pub const STAGE_ORDER: [StageKind; 4] = [
    StageKind::Source,
    StageKind::Enrichment,
    StageKind::Monetization,
    StageKind::Distribution,
];

/// One step of the fixed pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Source,
    Enrichment,
    Monetization,
    Distribution,
}

impl StageKind {
    /// Get string representation of the stage
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Enrichment => "enrichment",
            StageKind::Monetization => "monetization",
            StageKind::Distribution => "distribution",
        }
    }

    /// The stage that follows this one in pipeline order
    pub fn next(&self) -> Option<StageKind> {
        match self {
            StageKind::Source => Some(StageKind::Enrichment),
            StageKind::Enrichment => Some(StageKind::Monetization),
            StageKind::Monetization => Some(StageKind::Distribution),
            StageKind::Distribution => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage for one item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    InProgress,
    PendingRetry,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// A stage with this status needs no further work
    pub fn is_settled(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

/// Per-stage state tracked on the item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageState {
    pub status: StageStatus,

    /// Timestamp of the last status change
    pub updated_at: DateTime<Utc>,

    /// Attempts made so far (failures and the eventual success)
    pub attempts: u32,

    /// Last error message (if any attempt failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StageState {
    fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Pending,
            updated_at: now,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Draft produced by the content source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub title: String,
    pub body: String,
}

/// Internal link proposed by enrichment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InternalLink {
    pub anchor: String,
    pub slug: String,
}

/// Metadata produced by the enrichment stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub internal_links: Vec<InternalLink>,
}

/// Body produced by the monetization stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonetizedBody {
    pub body: String,

    /// Number of ad slot markers inserted
    pub ad_slots: u32,

    /// Stable per-product keys of inserted affiliate references
    pub affiliate_refs: Vec<String>,
}

/// Outcome of one distribution target for this item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetOutcome {
    pub target: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Unit of work driven through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    /// Idempotency key: `{date}-{topic slug}`
    pub id: String,

    pub topic: String,

    pub slug: String,

    pub created_at: DateTime<Utc>,

    /// First stage that still has work, advanced on stage completion
    pub current_stage: StageKind,

    /// Stage name → state, keyed in pipeline order
    pub stages: BTreeMap<StageKind, StageState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichedMetadata>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monetized: Option<MonetizedBody>,

    /// Per-target outcomes recorded by distribution
    #[serde(default)]
    pub publications: Vec<TargetOutcome>,
}

impl ContentItem {
    /// Create a fresh item for a topic
    pub fn new(topic: &str, now: DateTime<Utc>) -> Self {
        let slug = Self::slugify(topic);
        let id = Self::item_id(topic, now.date_naive());

        let stages = STAGE_ORDER
            .iter()
            .map(|kind| (*kind, StageState::pending(now)))
            .collect();

        Self {
            id,
            topic: topic.to_string(),
            slug,
            created_at: now,
            current_stage: StageKind::Source,
            stages,
            draft: None,
            enrichment: None,
            monetized: None,
            publications: Vec::new(),
        }
    }

    /// Stable identifier for a topic created on a given date
    pub fn item_id(topic: &str, date: NaiveDate) -> String {
        format!("{}-{}", date.format("%Y-%m-%d"), Self::slugify(topic))
    }

    /// Create URL-friendly slug from a topic or title
    pub fn slugify(text: &str) -> String {
        let lower = text.to_lowercase();
        let cleaned = NON_SLUG_CHARS.replace_all(&lower, "");
        let dashed = WHITESPACE.replace_all(cleaned.trim(), "-");
        dashed.trim_matches('-').to_string()
    }

    /// State of one stage
    pub fn stage(&self, kind: StageKind) -> &StageState {
        self.stages
            .get(&kind)
            .expect("all stages initialized at construction")
    }

    fn stage_mut(&mut self, kind: StageKind) -> &mut StageState {
        self.stages
            .get_mut(&kind)
            .expect("all stages initialized at construction")
    }

    /// Mark a stage as started (attempt begins)
    pub fn begin_stage(&mut self, kind: StageKind, now: DateTime<Utc>) {
        let state = self.stage_mut(kind);
        state.status = StageStatus::InProgress;
        state.attempts += 1;
        state.updated_at = now;
    }

    /// Mark a stage as succeeded and advance the stage pointer
    pub fn complete_stage(&mut self, kind: StageKind, now: DateTime<Utc>) {
        let state = self.stage_mut(kind);
        state.status = StageStatus::Succeeded;
        state.last_error = None;
        state.updated_at = now;
        self.advance_from(kind);
    }

    /// Mark a stage as skipped by configuration and advance the pointer
    pub fn skip_stage(&mut self, kind: StageKind, now: DateTime<Utc>) {
        let state = self.stage_mut(kind);
        state.status = StageStatus::Skipped;
        state.updated_at = now;
        self.advance_from(kind);
    }

    /// Mark a stage as retryable-failed; the pointer does not advance
    pub fn defer_stage(&mut self, kind: StageKind, error: String, now: DateTime<Utc>) {
        let state = self.stage_mut(kind);
        state.status = StageStatus::PendingRetry;
        state.last_error = Some(error);
        state.updated_at = now;
    }

    /// Mark a stage as permanently failed; the item becomes terminal
    pub fn fail_stage(&mut self, kind: StageKind, error: String, now: DateTime<Utc>) {
        let state = self.stage_mut(kind);
        state.status = StageStatus::Failed;
        state.last_error = Some(error);
        state.updated_at = now;
    }

    /// Reset a failed stage to pending-retry with a cleared attempt count
    ///
    /// Used by the explicit re-queue trigger; only failed stages are touched.
    pub fn requeue_failed_stage(&mut self, now: DateTime<Utc>) -> Option<StageKind> {
        let failed = STAGE_ORDER
            .iter()
            .copied()
            .find(|kind| self.stage(*kind).status == StageStatus::Failed)?;

        let state = self.stage_mut(failed);
        state.status = StageStatus::PendingRetry;
        state.attempts = 0;
        state.updated_at = now;
        Some(failed)
    }

    fn advance_from(&mut self, kind: StageKind) {
        if let Some(next) = kind.next() {
            self.current_stage = next;
        }
    }

    /// First stage, in pipeline order, that still has work
    pub fn next_pending_stage(&self) -> Option<StageKind> {
        for kind in STAGE_ORDER {
            match self.stage(kind).status {
                StageStatus::Succeeded | StageStatus::Skipped => continue,
                StageStatus::Failed => return None,
                _ => return Some(kind),
            }
        }
        None
    }

    /// All configured stages succeeded or were skipped
    pub fn is_terminal_succeeded(&self) -> bool {
        STAGE_ORDER
            .iter()
            .all(|kind| self.stage(*kind).status.is_settled())
    }

    /// Some stage failed permanently
    pub fn is_terminal_failed(&self) -> bool {
        STAGE_ORDER
            .iter()
            .any(|kind| self.stage(*kind).status == StageStatus::Failed)
    }

    /// No further automatic processing will occur
    pub fn is_terminal(&self) -> bool {
        self.is_terminal_succeeded() || self.is_terminal_failed()
    }

    /// Non-terminal items are picked up again by subsequent runs
    pub fn has_pending_work(&self) -> bool {
        !self.is_terminal()
    }

    /// Stage left in-progress by an interrupted process, if any
    pub fn interrupted_stage(&self) -> Option<StageKind> {
        STAGE_ORDER
            .iter()
            .copied()
            .find(|kind| self.stage(*kind).status == StageStatus::InProgress)
    }

    /// Stage statuses form a non-decreasing sequence along pipeline order:
    /// work on a stage only begins once every earlier stage is settled.
    pub fn stage_order_consistent(&self) -> bool {
        for pair in STAGE_ORDER.windows(2) {
            let earlier = self.stage(pair[0]).status;
            let later = self.stage(pair[1]).status;

            if later != StageStatus::Pending && !earlier.is_settled() {
                return false;
            }
        }
        true
    }
}
