//! Run and publication analytics
//!
//! Side-effect-only recorder: run summaries append to a versioned JSON
//! data file, statistics are computed over it and the publication log, and
//! reports render as Markdown. Recording failures never propagate into the
//! pipeline; callers log them and move on.

use crate::orchestration::orchestrator::RunSummary;
use crate::store::PublicationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Analytics record for a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub in_progress: usize,
}

/// Per-target publication statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetStatistics {
    pub target: String,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_published: Option<DateTime<Utc>>,
}

/// Options for filtering the report
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub target: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Data file structure
#[derive(Debug, Serialize, Deserialize)]
struct AnalyticsDataFile {
    version: String,
    runs: Vec<RunRecord>,
    last_updated: String,
}

/// Track run history and publication statistics
pub struct AutomationAnalytics {
    runs: Vec<RunRecord>,
    data_file_path: PathBuf,
}

impl AutomationAnalytics {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            runs: Vec::new(),
            data_file_path: state_dir.as_ref().join("analytics.json"),
        }
    }

    /// Load existing data; a missing file starts an empty history
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        match self.load_runs().await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.runs = Vec::new();
                Ok(())
            }
        }
    }

    /// Record one run summary
    pub async fn record_run(&mut self, summary: &RunSummary) -> anyhow::Result<()> {
        let record = RunRecord {
            id: format!("{}-{}", summary.started_at.timestamp_millis(), summary.run_id),
            run_id: summary.run_id.clone(),
            started_at: summary.started_at,
            duration_ms: summary.duration_ms,
            selected: summary.selected.len(),
            completed: summary.completed,
            failed: summary.failed,
            deferred: summary.deferred,
            in_progress: summary.in_progress,
        };

        self.runs.push(record);
        self.save_runs().await
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    /// Filtered publication records, most recent first
    pub fn filter_publications(
        records: &[PublicationRecord],
        options: &ReportOptions,
    ) -> Vec<PublicationRecord> {
        let mut filtered: Vec<_> = records
            .iter()
            .filter(|record| {
                if let Some(target) = &options.target
                    && &record.target != target
                {
                    return false;
                }
                if let Some(start) = options.start_date
                    && record.timestamp < start
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = options.limit {
            filtered.truncate(limit);
        }

        filtered
    }

    /// Per-target statistics over the given publication records
    pub fn target_statistics(
        records: &[PublicationRecord],
    ) -> HashMap<String, TargetStatistics> {
        let mut by_target: HashMap<String, Vec<&PublicationRecord>> = HashMap::new();
        for record in records {
            by_target.entry(record.target.clone()).or_default().push(record);
        }

        by_target
            .into_iter()
            .map(|(target, target_records)| {
                let attempts = target_records.len();
                let successes = target_records.iter().filter(|r| r.success).count();
                let last_published = target_records
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.timestamp)
                    .max();

                let stats = TargetStatistics {
                    target: target.clone(),
                    attempts,
                    successes,
                    failures: attempts - successes,
                    success_rate: (successes as f64 / attempts as f64) * 100.0,
                    last_published,
                };

                (target, stats)
            })
            .collect()
    }

    /// Render the analytics report as Markdown
    pub fn generate_report(
        &self,
        publications: &[PublicationRecord],
        options: &ReportOptions,
    ) -> String {
        let filtered = Self::filter_publications(publications, options);
        let statistics = Self::target_statistics(&filtered);

        let mut recent_options = options.clone();
        if recent_options.limit.is_none() {
            recent_options.limit = Some(10);
        }
        let recent = Self::filter_publications(publications, &recent_options);

        let mut lines = Vec::new();
        lines.push("# Automation Analytics Report\n".to_string());
        lines.push(format!("**Generated**: {}\n", Utc::now().to_rfc3339()));

        lines.push("## Runs\n".to_string());
        lines.push(format!("- **Total Runs**: {}", self.runs.len()));
        let completed: usize = self.runs.iter().map(|r| r.completed).sum();
        let failed: usize = self.runs.iter().map(|r| r.failed).sum();
        lines.push(format!("- **Items Completed**: {}", completed));
        lines.push(format!("- **Items Failed**: {}\n", failed));

        if !statistics.is_empty() {
            lines.push("## Target Statistics\n".to_string());
            lines.push("| Target | Attempts | Successes | Failures | Success Rate |".to_string());
            lines.push("|--------|----------|-----------|----------|--------------|".to_string());

            let mut sorted: Vec<_> = statistics.values().collect();
            sorted.sort_by(|a, b| a.target.cmp(&b.target));
            for stats in sorted {
                lines.push(format!(
                    "| {} | {} | {} | {} | {:.1}% |",
                    stats.target,
                    stats.attempts,
                    stats.successes,
                    stats.failures,
                    stats.success_rate
                ));
            }
            lines.push(String::new());
        }

        if !recent.is_empty() {
            lines.push("## Recent Publications\n".to_string());
            lines.push("| Timestamp | Item | Target | Status | Reference |".to_string());
            lines.push("|-----------|------|--------|--------|-----------|".to_string());

            for record in &recent {
                let status = if record.success { "✅" } else { "❌" };
                lines.push(format!(
                    "| {} | {} | {} | {} | {} |",
                    record.timestamp.format("%Y-%m-%d"),
                    record.item_id,
                    record.target,
                    status,
                    record.external_ref.as_deref().unwrap_or("-")
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    async fn load_runs(&mut self) -> anyhow::Result<()> {
        let data = fs::read_to_string(&self.data_file_path).await?;
        let parsed: AnalyticsDataFile = serde_json::from_str(&data)?;
        self.runs = parsed.runs;
        Ok(())
    }

    async fn save_runs(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.data_file_path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let data = AnalyticsDataFile {
            version: "1.0".to_string(),
            runs: self.runs.clone(),
            last_updated: Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(&self.data_file_path, json).await?;

        Ok(())
    }
}
