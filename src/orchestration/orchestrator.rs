//! Pipeline orchestrator
//!
//! Owns the run lifecycle: selects or resumes items, drives each one
//! through the fixed stage sequence with a bounded worker pool, converts
//! every stage failure into a persisted status transition, and emits a run
//! summary. Stage errors never cross this boundary; only a fatal
//! configuration problem aborts a run outright.

use crate::core::config::AutomationConfig;
use crate::core::config_loader::ConfigLoader;
use crate::core::error::ErrorClass;
use crate::core::item::{ContentItem, StageKind};
use crate::core::retry::{RetryDisposition, RetryKey, RetryPolicy};
use crate::core::traits::{Stage, StageOutput};
use crate::orchestration::analytics::AutomationAnalytics;
use crate::security::TokenManager;
use crate::stages::{
    ConfigCatalog, DistributionStage, EnrichmentStage, LinkIndex, LinkTarget, MonetizationStage,
    SourceStage,
};
use crate::store::{PublicationLog, StateStore};
use crate::targets::TargetLoader;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Options for one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override the configured batch size
    pub batch_size: Option<usize>,

    /// Explicit candidate topics; defaults to the configured backlog
    pub topics: Option<Vec<String>>,

    /// Reset failed stages to pending-retry before selecting items
    pub resume_failed: bool,
}

/// Aggregate outcome of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// Item identifiers this run owned
    pub selected: Vec<String>,

    /// Items that reached terminal success during this run
    pub completed: usize,

    /// Items that reached terminal failure during this run
    pub failed: usize,

    /// Items pushed to a later run by backoff or cancellation
    pub deferred: usize,

    /// Items still owned by another run
    pub in_progress: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ItemOutcome {
    Completed,
    Failed,
    Deferred,
    InProgress,
}

/// Drives content items through the pipeline
pub struct Orchestrator {
    config: AutomationConfig,
    store: Arc<StateStore>,
    log: Arc<PublicationLog>,
    policy: RetryPolicy,
    stages: Vec<Arc<dyn Stage>>,
    link_index: Option<LinkIndex>,
    cancelled: AtomicBool,
}

impl Orchestrator {
    /// Build the production orchestrator from configuration
    ///
    /// Validates configuration and target credentials first; any problem
    /// surfaces here, before a single item is touched.
    pub async fn new(config: AutomationConfig) -> anyhow::Result<Self> {
        ConfigLoader::ensure_valid(&config)?;

        let store = Arc::new(StateStore::open(&config.pipeline.state_dir).await?);
        let log = Arc::new(PublicationLog::new(&config.pipeline.state_dir));
        let policy = RetryPolicy::from_config(&config.retry);
        let timeout = Duration::from_secs(config.pipeline.call_timeout_secs);
        let tokens = TokenManager::new();

        let link_index = LinkIndex::new();
        let targets = TargetLoader::load_enabled(&config, &tokens, timeout)?;
        let catalog = Arc::new(ConfigCatalog::new(config.monetization.catalog.clone()));

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(SourceStage::new(&config.services.generator, timeout)),
            Arc::new(EnrichmentStage::new(
                &config.services.enrichment,
                timeout,
                config.site.keywords.clone(),
                link_index.clone(),
            )),
            Arc::new(MonetizationStage::new(&config.monetization, catalog)),
            Arc::new(DistributionStage::new(
                targets,
                store.clone(),
                log.clone(),
                policy.clone(),
                config.site.base_url.clone(),
            )),
        ];

        Ok(Self {
            config,
            store,
            log,
            policy,
            stages,
            link_index: Some(link_index),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Build an orchestrator over caller-provided stages and stores
    ///
    /// The seam tests use to drive the state machine without a network.
    pub fn with_stages(
        config: AutomationConfig,
        store: Arc<StateStore>,
        log: Arc<PublicationLog>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            store,
            log,
            policy,
            stages,
            link_index: None,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn publication_log(&self) -> &Arc<PublicationLog> {
        &self.log
    }

    /// Request cooperative cancellation; in-flight items finish, queued
    /// items are deferred to the next run
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run one batch through the pipeline
    pub async fn run_pipeline(self: &Arc<Self>, options: RunOptions) -> anyhow::Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        println!("\n🚀 Pipeline run {}", run_id);

        if options.resume_failed {
            self.requeue_failed_items().await?;
        }
        self.recover_interrupted().await?;
        self.refresh_link_index().await;

        let (selected, mut deferred) = self.select_items(&options).await?;
        println!("   {} item(s) selected, {} deferred by backoff", selected.len(), deferred);

        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.worker_pool_size));
        let mut tasks = Vec::new();

        for id in &selected {
            let orchestrator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let task_id = id.clone();

            let task = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ItemOutcome::Deferred;
                };

                // Cancellation point: between items, never mid-stage
                if orchestrator.cancelled.load(Ordering::SeqCst) {
                    return ItemOutcome::Deferred;
                }

                // Exclusive ownership; an item held by another run is left alone
                if !orchestrator.store.claim(&task_id).await {
                    return ItemOutcome::InProgress;
                }

                let outcome = match orchestrator.process_item(&task_id).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        eprintln!("⚠️  {}: state store failure, deferring: {}", task_id, e);
                        ItemOutcome::Deferred
                    }
                };

                orchestrator.store.release(&task_id).await;
                outcome
            });

            tasks.push((id.clone(), task));
        }

        let mut completed = 0;
        let mut failed = 0;
        let mut in_progress = 0;

        for (id, task) in tasks {
            match task.await {
                Ok(ItemOutcome::Completed) => completed += 1,
                Ok(ItemOutcome::Failed) => failed += 1,
                Ok(ItemOutcome::Deferred) => deferred += 1,
                Ok(ItemOutcome::InProgress) => in_progress += 1,
                Err(e) => {
                    eprintln!("⚠️  worker for {} aborted: {}", id, e);
                    self.store.release(&id).await;
                    deferred += 1;
                }
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            selected,
            completed,
            failed,
            deferred,
            in_progress,
        };

        Self::print_summary(&summary);
        self.record_analytics(&summary).await;

        Ok(summary)
    }

    /// Reset failed stages to pending-retry with cleared attempt counts
    async fn requeue_failed_items(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        for mut item in self.store.all_items().await {
            if !item.is_terminal_failed() {
                continue;
            }
            if item.requeue_failed_stage(now).is_some() {
                self.store.clear_item_retry_states(&item.id).await?;
                self.store.upsert_item(item).await?;
            }
        }
        Ok(())
    }

    /// Treat stages left in-progress by an interrupted process as
    /// failed-retryable
    async fn recover_interrupted(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        for mut item in self.store.pending_items().await {
            if let Some(kind) = item.interrupted_stage() {
                item.defer_stage(kind, "interrupted before completion".to_string(), now);
                self.store.upsert_item(item).await?;
            }
        }
        Ok(())
    }

    /// Rebuild the enrichment link index from published items
    async fn refresh_link_index(&self) {
        let Some(index) = &self.link_index else {
            return;
        };

        let targets: Vec<LinkTarget> = self
            .store
            .all_items()
            .await
            .into_iter()
            .filter(|item| item.is_terminal_succeeded())
            .map(|item| LinkTarget {
                title: item
                    .enrichment
                    .as_ref()
                    .map(|e| e.title.clone())
                    .unwrap_or_else(|| item.topic.clone()),
                slug: item.slug,
            })
            .collect();

        index.replace(targets);
    }

    /// Resume items with pending work, then create new items from the
    /// candidate topics up to the batch size
    async fn select_items(&self, options: &RunOptions) -> anyhow::Result<(Vec<String>, usize)> {
        let now = Utc::now();
        let mut selected = Vec::new();
        let mut deferred = 0;

        for item in self.store.pending_items().await {
            let Some(kind) = item.next_pending_stage() else {
                continue;
            };

            let key = RetryKey::stage(&item.id, kind);
            if let Some(state) = self.store.retry_state(&key).await
                && state.next_eligible_at > now
            {
                deferred += 1;
                continue;
            }

            selected.push(item.id);
        }

        let batch_size = options.batch_size.unwrap_or(self.config.pipeline.batch_size);
        let topics = match &options.topics {
            Some(topics) => topics.clone(),
            None => self.backlog_topics().await,
        };

        let mut created = 0;
        for topic in topics {
            if created >= batch_size {
                break;
            }

            // Idempotency key: one item per topic per day
            let id = ContentItem::item_id(&topic, now.date_naive());
            if self.store.contains_item(&id).await {
                continue;
            }

            self.store.upsert_item(ContentItem::new(&topic, now)).await?;
            selected.push(id);
            created += 1;
        }

        Ok((selected, deferred))
    }

    /// Backlog topics that have not been published yet
    async fn backlog_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for topic in &self.config.topics {
            let slug = ContentItem::slugify(topic);
            if !self.store.topic_published(&slug).await {
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// Drive one item through every eligible stage
    ///
    /// Each stage is invoked at most once per run; a deferral or failure
    /// stops the item until a later run.
    async fn process_item(&self, id: &str) -> anyhow::Result<ItemOutcome> {
        let Some(mut item) = self.store.get_item(id).await else {
            return Ok(ItemOutcome::Deferred);
        };

        loop {
            let Some(kind) = item.next_pending_stage() else {
                return Ok(if item.is_terminal_succeeded() {
                    ItemOutcome::Completed
                } else {
                    ItemOutcome::Failed
                });
            };

            let key = RetryKey::stage(&item.id, kind);
            if let Some(state) = self.store.retry_state(&key).await
                && state.next_eligible_at > Utc::now()
            {
                return Ok(ItemOutcome::Deferred);
            }

            let Some(stage) = self.stage_for(kind) else {
                return Ok(ItemOutcome::Deferred);
            };

            item.begin_stage(kind, Utc::now());
            self.store.upsert_item(item.clone()).await?;

            let result = stage.apply(&item).await;
            let now = Utc::now();

            match result {
                Ok(output) => {
                    Self::apply_output(&mut item, kind, output, now);
                    self.store.clear_retry_state(&key).await?;
                    self.store.upsert_item(item.clone()).await?;
                    println!("  ✓ {}: {} succeeded", item.id, kind);
                }
                Err(err) => match err.class() {
                    // The desired end state already holds
                    ErrorClass::DuplicatePublication => {
                        item.complete_stage(kind, now);
                        self.store.clear_retry_state(&key).await?;
                        self.store.upsert_item(item.clone()).await?;
                        println!("  ✓ {}: {} already done", item.id, kind);
                    }
                    ErrorClass::Validation | ErrorClass::FatalConfiguration => {
                        item.fail_stage(kind, err.to_string(), now);
                        self.store.upsert_item(item.clone()).await?;
                        println!("  ❌ {}: {} failed - {}", item.id, kind, err);
                        return Ok(ItemOutcome::Failed);
                    }
                    ErrorClass::Transient | ErrorClass::QuotaExhausted => {
                        let prior = self.store.retry_state(&key).await;
                        match self.policy.disposition(&key, prior.as_ref(), &err, now) {
                            RetryDisposition::Retry(state) => {
                                item.defer_stage(kind, err.to_string(), now);
                                self.store.set_retry_state(&key, state).await?;
                                self.store.upsert_item(item.clone()).await?;
                                println!("  ⏳ {}: {} deferred - {}", item.id, kind, err);
                                return Ok(ItemOutcome::Deferred);
                            }
                            RetryDisposition::GiveUp => {
                                item.fail_stage(kind, err.to_string(), now);
                                self.store.upsert_item(item.clone()).await?;
                                println!(
                                    "  ❌ {}: {} failed after retries - {}",
                                    item.id, kind, err
                                );
                                return Ok(ItemOutcome::Failed);
                            }
                        }
                    }
                },
            }
        }
    }

    fn apply_output(item: &mut ContentItem, kind: StageKind, output: StageOutput, now: DateTime<Utc>) {
        match output {
            StageOutput::Draft(draft) => item.draft = Some(draft),
            StageOutput::Enriched(metadata) => item.enrichment = Some(metadata),
            StageOutput::Monetized(body) => item.monetized = Some(body),
            StageOutput::Published(outcomes) => item.publications = outcomes,
            StageOutput::Skipped => {
                item.skip_stage(kind, now);
                return;
            }
        }
        item.complete_stage(kind, now);
    }

    fn stage_for(&self, kind: StageKind) -> Option<Arc<dyn Stage>> {
        self.stages.iter().find(|stage| stage.kind() == kind).cloned()
    }

    async fn record_analytics(&self, summary: &RunSummary) {
        let mut analytics = AutomationAnalytics::new(&self.config.pipeline.state_dir);
        if let Err(e) = analytics.initialize().await {
            eprintln!("⚠️  Failed to initialize analytics: {}", e);
            return;
        }
        if let Err(e) = analytics.record_run(summary).await {
            eprintln!("⚠️  Failed to record analytics: {}", e);
        }
    }

    fn print_summary(summary: &RunSummary) {
        println!("\n{}", "=".repeat(60));
        println!("📊 Run Summary");
        println!("{}", "=".repeat(60));
        println!("  Selected:    {}", summary.selected.len());
        println!("  ✅ Completed: {}", summary.completed);
        println!("  ❌ Failed:    {}", summary.failed);
        println!("  ⏳ Deferred:  {}", summary.deferred);
        println!("  🔒 In progress elsewhere: {}", summary.in_progress);
        println!("{}\n", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MonetizationPolicy;
    use crate::core::error::StageError;
    use crate::core::item::{
        Draft, EnrichedMetadata, MonetizedBody, StageStatus, TargetOutcome, STAGE_ORDER,
    };
    use crate::core::traits::StageResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Stage double: scripted failures first, default success after
    struct MockStage {
        kind: StageKind,
        calls: AtomicU32,
        scripted: Mutex<VecDeque<StageError>>,
    }

    impl MockStage {
        fn ok(kind: StageKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: AtomicU32::new(0),
                scripted: Mutex::new(VecDeque::new()),
            })
        }

        fn failing_with(kind: StageKind, errors: Vec<StageError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: AtomicU32::new(0),
                scripted: Mutex::new(errors.into()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn default_output(&self, item: &ContentItem) -> StageOutput {
            match self.kind {
                StageKind::Source => StageOutput::Draft(Draft {
                    title: format!("{} Guide", item.topic),
                    body: "<p>one</p><p>two</p><p>three</p>".to_string(),
                }),
                StageKind::Enrichment => StageOutput::Enriched(EnrichedMetadata {
                    title: format!("{} That Works", item.topic),
                    description: "Practical steps that hold up at 3am.".to_string(),
                    tags: vec!["sleep-training".to_string()],
                    internal_links: vec![],
                }),
                StageKind::Monetization => StageOutput::Monetized(MonetizedBody {
                    body: "<p>one</p>\n<!-- ad-slot --><p>two</p><p>three</p>".to_string(),
                    ad_slots: 1,
                    affiliate_refs: vec![],
                }),
                StageKind::Distribution => StageOutput::Published(vec![TargetOutcome {
                    target: "site".to_string(),
                    success: true,
                    external_ref: None,
                    recorded_at: Utc::now(),
                }]),
            }
        }
    }

    #[async_trait]
    impl Stage for MockStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn apply(&self, item: &ContentItem) -> StageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.scripted.lock().expect("scripted lock").pop_front();
            match scripted {
                Some(error) => Err(error),
                None => Ok(self.default_output(item)),
            }
        }
    }

    fn test_config(state_dir: &std::path::Path) -> AutomationConfig {
        let mut config = AutomationConfig::default();
        config.pipeline.state_dir = state_dir.to_path_buf();
        config.pipeline.batch_size = 3;
        // Zero backoff units keep retries immediately eligible across runs
        config.retry.stage_unit_secs = crate::core::config::StageUnitSecs {
            source: 0,
            enrichment: 0,
            monetization: 0,
            distribution: 0,
        };
        config.monetization.policies.insert(
            "sleep-training".to_string(),
            MonetizationPolicy {
                ad_slot_density: 1,
                affiliate_program: "amazon".to_string(),
            },
        );
        config
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        source: Arc<MockStage>,
        enrichment: Arc<MockStage>,
        monetization: Arc<MockStage>,
        distribution: Arc<MockStage>,
        _temp_dir: TempDir,
    }

    async fn fixture_with(
        source: Arc<MockStage>,
        enrichment: Arc<MockStage>,
        monetization: Arc<MockStage>,
        distribution: Arc<MockStage>,
    ) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let store = Arc::new(StateStore::open(temp_dir.path()).await.unwrap());
        let log = Arc::new(PublicationLog::new(temp_dir.path()));
        let stages: Vec<Arc<dyn Stage>> = vec![
            source.clone(),
            enrichment.clone(),
            monetization.clone(),
            distribution.clone(),
        ];

        Fixture {
            orchestrator: Arc::new(Orchestrator::with_stages(config, store, log, stages)),
            source,
            enrichment,
            monetization,
            distribution,
            _temp_dir: temp_dir,
        }
    }

    async fn happy_fixture() -> Fixture {
        fixture_with(
            MockStage::ok(StageKind::Source),
            MockStage::ok(StageKind::Enrichment),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        )
        .await
    }

    fn run_options(topics: &[&str]) -> RunOptions {
        RunOptions {
            batch_size: Some(1),
            topics: Some(topics.iter().map(|t| t.to_string()).collect()),
            resume_failed: false,
        }
    }

    #[tokio::test]
    async fn test_happy_path_completes_item() {
        let fixture = happy_fixture().await;

        let summary = fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.deferred, 0);

        let items = fixture.orchestrator.store().all_items().await;
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert!(item.is_terminal_succeeded());
        assert!(item.stage_order_consistent());
        assert!(item.draft.is_some());
        assert!(item.enrichment.is_some());
        assert!(item.monetized.is_some());
        assert_eq!(item.publications.len(), 1);
    }

    #[tokio::test]
    async fn test_monetization_validation_error_is_terminal() {
        let fixture = fixture_with(
            MockStage::ok(StageKind::Source),
            MockStage::ok(StageKind::Enrichment),
            MockStage::failing_with(
                StageKind::Monetization,
                vec![StageError::MissingMetadata {
                    stage: "monetization".to_string(),
                    field: "tags".to_string(),
                }],
            ),
            MockStage::ok(StageKind::Distribution),
        )
        .await;

        let summary = fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deferred, 0);

        let items = fixture.orchestrator.store().all_items().await;
        let item = &items[0];
        assert!(item.is_terminal_failed());
        assert_eq!(item.stage(StageKind::Source).status, StageStatus::Succeeded);
        assert_eq!(
            item.stage(StageKind::Enrichment).status,
            StageStatus::Succeeded
        );
        assert_eq!(
            item.stage(StageKind::Monetization).status,
            StageStatus::Failed
        );
        assert_eq!(
            item.stage(StageKind::Distribution).status,
            StageStatus::Pending
        );
        assert_eq!(fixture.distribution.calls(), 0);

        // Terminal items are never re-entered by later runs
        let again = fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();
        assert_eq!(again.completed + again.failed + again.deferred, 0);
        assert_eq!(fixture.monetization.calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_does_not_rerun_succeeded_stages() {
        let fixture = fixture_with(
            MockStage::ok(StageKind::Source),
            MockStage::ok(StageKind::Enrichment),
            MockStage::failing_with(
                StageKind::Monetization,
                vec![StageError::Timeout {
                    stage: "monetization".to_string(),
                    waited_ms: 30_000,
                }],
            ),
            MockStage::ok(StageKind::Distribution),
        )
        .await;
        let options = run_options(&["newborn sleep schedule"]);

        let first = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(first.deferred, 1);

        let draft_before = fixture.orchestrator.store().all_items().await[0]
            .draft
            .clone();

        let second = fixture.orchestrator.run_pipeline(options).await.unwrap();
        assert_eq!(second.completed, 1);

        // Source and enrichment ran exactly once across both runs
        assert_eq!(fixture.source.calls(), 1);
        assert_eq!(fixture.enrichment.calls(), 1);
        assert_eq!(fixture.monetization.calls(), 2);

        // The succeeded stage's payload is unchanged
        let draft_after = fixture.orchestrator.store().all_items().await[0]
            .draft
            .clone();
        assert_eq!(draft_before, draft_after);
    }

    #[tokio::test]
    async fn test_restart_resumes_at_persisted_stage() {
        // Simulate a process that died after enrichment persisted
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let store = Arc::new(StateStore::open(temp_dir.path()).await.unwrap());
        let log = Arc::new(PublicationLog::new(temp_dir.path()));

        let now = Utc::now();
        let mut item = ContentItem::new("newborn sleep schedule", now);
        for kind in [StageKind::Source, StageKind::Enrichment] {
            item.begin_stage(kind, now);
            item.complete_stage(kind, now);
        }
        item.draft = Some(Draft {
            title: "t".to_string(),
            body: "b".to_string(),
        });
        item.enrichment = Some(EnrichedMetadata {
            title: "t".to_string(),
            description: "d".to_string(),
            tags: vec!["sleep-training".to_string()],
            internal_links: vec![],
        });
        store.upsert_item(item).await.unwrap();

        let source = MockStage::ok(StageKind::Source);
        let enrichment = MockStage::ok(StageKind::Enrichment);
        let monetization = MockStage::ok(StageKind::Monetization);
        let distribution = MockStage::ok(StageKind::Distribution);
        let stages: Vec<Arc<dyn Stage>> = vec![
            source.clone(),
            enrichment.clone(),
            monetization.clone(),
            distribution.clone(),
        ];
        let orchestrator = Arc::new(Orchestrator::with_stages(config, store, log, stages));

        let summary = orchestrator
            .run_pipeline(RunOptions {
                batch_size: Some(1),
                topics: Some(vec![]),
                resume_failed: false,
            })
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(source.calls(), 0);
        assert_eq!(enrichment.calls(), 0);
        assert_eq!(monetization.calls(), 1);
        assert_eq!(distribution.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_enforced_across_runs() {
        let errors = (0..5)
            .map(|_| StageError::Timeout {
                stage: "source".to_string(),
                waited_ms: 30_000,
            })
            .collect();
        let fixture = fixture_with(
            MockStage::failing_with(StageKind::Source, errors),
            MockStage::ok(StageKind::Enrichment),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        )
        .await;
        let options = run_options(&["newborn sleep schedule"]);

        let first = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(first.deferred, 1);
        let second = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(second.deferred, 1);
        let third = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(third.failed, 1);

        // Terminal: later runs never invoke the stage again
        let fourth = fixture.orchestrator.run_pipeline(options).await.unwrap();
        assert_eq!(fourth.completed + fourth.failed + fourth.deferred, 0);
        assert_eq!(fixture.source.calls(), 3);

        let items = fixture.orchestrator.store().all_items().await;
        let item = &items[0];
        assert_eq!(item.stage(StageKind::Source).status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_stage_invoked_at_most_once_per_run() {
        let fixture = fixture_with(
            MockStage::failing_with(
                StageKind::Source,
                vec![StageError::RateLimited {
                    stage: "source".to_string(),
                }],
            ),
            MockStage::ok(StageKind::Enrichment),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        )
        .await;

        fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        assert_eq!(fixture.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_backoff_window_defers_item() {
        let fixture = fixture_with(
            MockStage::failing_with(
                StageKind::Source,
                vec![StageError::Timeout {
                    stage: "source".to_string(),
                    waited_ms: 30_000,
                }],
            ),
            MockStage::ok(StageKind::Enrichment),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        )
        .await;

        let options = run_options(&["newborn sleep schedule"]);
        let first = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(first.deferred, 1);

        // Manually push the retry window into the future
        let item_id = fixture.orchestrator.store().all_items().await[0].id.clone();
        let key = RetryKey::stage(&item_id, StageKind::Source);
        let state = fixture.orchestrator.store().retry_state(&key).await.unwrap();
        fixture
            .orchestrator
            .store()
            .set_retry_state(
                &key,
                crate::core::retry::RetryState {
                    next_eligible_at: Utc::now() + chrono::Duration::seconds(3600),
                    ..state
                },
            )
            .await
            .unwrap();

        let second = fixture.orchestrator.run_pipeline(options).await.unwrap();

        assert_eq!(second.deferred, 1);
        assert_eq!(fixture.source.calls(), 1, "stage must not run inside backoff");
    }

    #[tokio::test]
    async fn test_topic_deduplication_same_day() {
        let fixture = happy_fixture().await;

        let summary = fixture
            .orchestrator
            .run_pipeline(RunOptions {
                batch_size: Some(5),
                topics: Some(vec![
                    "newborn sleep schedule".to_string(),
                    "Newborn Sleep Schedule".to_string(),
                ]),
                resume_failed: false,
            })
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(fixture.orchestrator.store().all_items().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_failed_requeues_and_completes() {
        let fixture = fixture_with(
            MockStage::ok(StageKind::Source),
            MockStage::ok(StageKind::Enrichment),
            MockStage::failing_with(
                StageKind::Monetization,
                vec![StageError::InvalidOutput {
                    stage: "monetization".to_string(),
                    message: "policy rejected".to_string(),
                }],
            ),
            MockStage::ok(StageKind::Distribution),
        )
        .await;
        let options = run_options(&["newborn sleep schedule"]);

        let first = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(first.failed, 1);

        // Without the flag the terminal item stays untouched
        let untouched = fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
        assert_eq!(untouched.completed + untouched.failed + untouched.deferred, 0);

        let resumed = fixture
            .orchestrator
            .run_pipeline(RunOptions {
                resume_failed: true,
                ..options
            })
            .await
            .unwrap();

        assert_eq!(resumed.completed, 1);
        assert_eq!(fixture.monetization.calls(), 2);
        let items = fixture.orchestrator.store().all_items().await;
        let item = &items[0];
        assert!(item.is_terminal_succeeded());
        assert!(item.stage_order_consistent());
    }

    #[tokio::test]
    async fn test_interrupted_stage_recovers_as_retryable() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let store = Arc::new(StateStore::open(temp_dir.path()).await.unwrap());
        let log = Arc::new(PublicationLog::new(temp_dir.path()));

        // An item the previous process left mid-source
        let now = Utc::now();
        let mut item = ContentItem::new("newborn sleep schedule", now);
        item.begin_stage(StageKind::Source, now);
        store.upsert_item(item).await.unwrap();

        let source = MockStage::ok(StageKind::Source);
        let stages: Vec<Arc<dyn Stage>> = vec![
            source.clone(),
            MockStage::ok(StageKind::Enrichment),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        ];
        let orchestrator = Arc::new(Orchestrator::with_stages(config, store, log, stages));

        let summary = orchestrator
            .run_pipeline(RunOptions {
                batch_size: Some(1),
                topics: Some(vec![]),
                resume_failed: false,
            })
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_defers_queued_items() {
        let fixture = happy_fixture().await;
        fixture.orchestrator.request_cancel();

        let summary = fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(fixture.source.calls(), 0);

        // Nothing was left in-progress without a persisted classification
        let items = fixture.orchestrator.store().all_items().await;
        let item = &items[0];
        assert_eq!(item.interrupted_stage(), None);
    }

    #[tokio::test]
    async fn test_claimed_item_counts_as_in_progress() {
        let fixture = happy_fixture().await;

        // Another run still owns the item
        let id = ContentItem::item_id("newborn sleep schedule", Utc::now().date_naive());
        let item = ContentItem::new("newborn sleep schedule", Utc::now());
        fixture.orchestrator.store().upsert_item(item).await.unwrap();
        assert!(fixture.orchestrator.store().claim(&id).await);

        let summary = fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        assert_eq!(summary.in_progress, 1);
        assert_eq!(fixture.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_stage_order_invariant_after_every_run() {
        let fixture = fixture_with(
            MockStage::ok(StageKind::Source),
            MockStage::failing_with(
                StageKind::Enrichment,
                vec![StageError::Timeout {
                    stage: "enrichment".to_string(),
                    waited_ms: 30_000,
                }],
            ),
            MockStage::ok(StageKind::Monetization),
            MockStage::ok(StageKind::Distribution),
        )
        .await;
        let options = run_options(&["newborn sleep schedule"]);

        for _ in 0..3 {
            fixture.orchestrator.run_pipeline(options.clone()).await.unwrap();
            for item in fixture.orchestrator.store().all_items().await {
                assert!(item.stage_order_consistent());
            }
        }
    }

    #[tokio::test]
    async fn test_run_records_analytics() {
        let fixture = happy_fixture().await;

        fixture
            .orchestrator
            .run_pipeline(run_options(&["newborn sleep schedule"]))
            .await
            .unwrap();

        let mut analytics =
            AutomationAnalytics::new(&fixture.orchestrator.config.pipeline.state_dir);
        analytics.initialize().await.unwrap();
        assert_eq!(analytics.runs().len(), 1);
        assert_eq!(analytics.runs()[0].completed, 1);
    }

    #[tokio::test]
    async fn test_all_stage_kinds_have_a_stage() {
        let fixture = happy_fixture().await;
        for kind in STAGE_ORDER {
            assert!(fixture.orchestrator.stage_for(kind).is_some());
        }
    }
}
