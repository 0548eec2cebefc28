//! Schedule trigger
//!
//! Invokes the pipeline on a fixed daily cadence. Reentrancy is safe by
//! construction: runs fire sequentially here, and even an externally
//! triggered overlapping run only touches items it can claim.

use crate::core::config::ScheduleConfig;
use crate::core::error::ConfigError;
use crate::orchestration::orchestrator::{Orchestrator, RunOptions};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;

/// Daily trigger around the orchestrator
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    daily_at: NaiveTime,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, schedule: &ScheduleConfig) -> Result<Self, ConfigError> {
        let daily_at = NaiveTime::parse_from_str(&schedule.daily_at, "%H:%M").map_err(|_| {
            ConfigError::Invalid {
                field: "schedule.dailyAt".to_string(),
                message: format!("expected HH:MM, got {}", schedule.daily_at),
            }
        })?;

        Ok(Self {
            orchestrator,
            daily_at,
        })
    }

    /// Next fire time strictly after `now`
    pub fn next_fire(now: DateTime<Utc>, daily_at: NaiveTime) -> DateTime<Utc> {
        let today = now.date_naive().and_time(daily_at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// Run on the configured cadence until the process is stopped
    pub async fn run_forever(&self) -> anyhow::Result<()> {
        loop {
            let now = Utc::now();
            let next = Self::next_fire(now, self.daily_at);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(0));

            println!("⏰ Next scheduled run at {}", next.to_rfc3339());
            tokio::time::sleep(wait).await;

            match self.orchestrator.run_pipeline(RunOptions::default()).await {
                Ok(summary) => {
                    println!(
                        "✅ Scheduled run finished: {} completed, {} failed, {} deferred",
                        summary.completed, summary.failed, summary.deferred
                    );
                }
                Err(e) => {
                    eprintln!("❌ Scheduled run failed: {}", e);
                }
            }
        }
    }
}
