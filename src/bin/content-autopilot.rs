//! Content Autopilot CLI
//!
//! Automated content publication pipeline

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use content_autopilot::{
    AutomationAnalytics, ConfigLoadOptions, ConfigLoader, Orchestrator, PublicationLog,
    ReportOptions, RunOptions, Scheduler, StateStore, TokenManager, STAGE_ORDER,
};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Automated content publication pipeline
#[derive(Parser)]
#[command(name = "content-autopilot")]
#[command(version = "0.1.0")]
#[command(about = "Automated content publication pipeline", long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./.content-autopilot.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline batch now
    Run {
        /// Number of new items to create this run
        #[arg(long)]
        batch_size: Option<usize>,

        /// Comma-separated topics (overrides the configured backlog)
        #[arg(long)]
        topics: Option<String>,

        /// Reset failed stages to pending-retry before running
        #[arg(long)]
        resume_failed: bool,
    },

    /// Run on the configured daily cadence until interrupted
    Schedule,

    /// Show items with pending work, or one item's stage statuses
    Status {
        /// Inspect a single item by identifier
        #[arg(long)]
        item: Option<String>,
    },

    /// Display run and publication statistics
    Stats {
        /// Filter by distribution target
        #[arg(short, long)]
        target: Option<String>,

        /// Show statistics for the last N days
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(ConfigLoadOptions {
        path: cli.config.clone(),
        env: env::vars().collect::<HashMap<_, _>>(),
    })
    .await?;

    match cli.command {
        Commands::Run {
            batch_size,
            topics,
            resume_failed,
        } => {
            let topics = topics.map(|raw| {
                raw.split(',')
                    .map(|topic| topic.trim().to_string())
                    .filter(|topic| !topic.is_empty())
                    .collect::<Vec<_>>()
            });
            run_command(config, batch_size, topics, resume_failed).await
        }
        Commands::Schedule => schedule_command(config).await,
        Commands::Status { item } => status_command(config, item).await,
        Commands::Stats { target, days } => stats_command(config, target, days).await,
    }
}

async fn run_command(
    config: content_autopilot::AutomationConfig,
    batch_size: Option<usize>,
    topics: Option<Vec<String>>,
    resume_failed: bool,
) -> Result<i32> {
    println!("\n📦 content-autopilot\n");

    let orchestrator = Arc::new(Orchestrator::new(config).await?);

    let summary = orchestrator
        .run_pipeline(RunOptions {
            batch_size,
            topics,
            resume_failed,
        })
        .await?;

    if summary.failed == 0 {
        println!("✅ Run completed");
        Ok(0)
    } else {
        println!("❌ Run completed with {} failed item(s)", summary.failed);
        Ok(1)
    }
}

async fn schedule_command(config: content_autopilot::AutomationConfig) -> Result<i32> {
    println!("\n🤖 content-autopilot (scheduled mode)\n");

    let Some(schedule) = config.schedule.clone() else {
        eprintln!("❌ No schedule configured (schedule.dailyAt)");
        return Ok(1);
    };

    let orchestrator = Arc::new(Orchestrator::new(config).await?);
    let scheduler = Scheduler::new(orchestrator, &schedule)?;

    scheduler.run_forever().await?;
    Ok(0)
}

async fn status_command(
    config: content_autopilot::AutomationConfig,
    item_id: Option<String>,
) -> Result<i32> {
    println!("\n🔍 Pipeline Status\n");

    let store = StateStore::open(&config.pipeline.state_dir).await?;

    if let Some(id) = item_id {
        let Some(item) = store.get_item(&id).await else {
            eprintln!("❌ Unknown item: {}", id);
            return Ok(1);
        };

        println!("📄 {} ({})", item.id, item.topic);
        for kind in STAGE_ORDER {
            let state = item.stage(kind);
            let error = state
                .last_error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default();
            println!(
                "  {:<14} {:?} (attempts: {}){}",
                kind.as_str(),
                state.status,
                state.attempts,
                error
            );
        }
        for outcome in &item.publications {
            let mark = if outcome.success { "✅" } else { "❌" };
            println!(
                "  {} {} {}",
                mark,
                outcome.target,
                outcome.external_ref.as_deref().unwrap_or("-")
            );
        }
        return Ok(0);
    }

    let pending = store.pending_items().await;
    if pending.is_empty() {
        println!("✅ No items with pending work");
    } else {
        println!("{} item(s) with pending work:", pending.len());
        for item in pending {
            let stage = item
                .next_pending_stage()
                .map(|kind| kind.as_str())
                .unwrap_or("-");
            println!("  - {} (next: {})", item.id, stage);
        }
    }

    // Credential visibility for the configured targets
    let tokens = TokenManager::new();
    println!("\n🔐 Target credentials:");
    for target in ["site", "pinterest", "reddit", "medium"] {
        match tokens.get_token(target) {
            Some(token) => println!(
                "  - {}: {} ✅",
                target,
                TokenManager::mask_token(token.expose_secret())
            ),
            None => println!("  - {}: not set", target),
        }
    }

    let validation = ConfigLoader::validate(&config);
    println!("\n{}", ConfigLoader::format_validation_result(&validation));

    Ok(0)
}

async fn stats_command(
    config: content_autopilot::AutomationConfig,
    target: Option<String>,
    days: i64,
) -> Result<i32> {
    println!("\n📊 Automation Statistics\n");

    let mut analytics = AutomationAnalytics::new(&config.pipeline.state_dir);
    analytics.initialize().await?;

    let log = PublicationLog::new(&config.pipeline.state_dir);
    let publications = log.records().await?;

    let options = ReportOptions {
        target,
        start_date: Some(Utc::now() - chrono::Duration::days(days)),
        limit: None,
    };

    println!("{}", analytics.generate_report(&publications, &options));

    Ok(0)
}
