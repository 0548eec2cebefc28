//! Distribution stage
//!
//! Fans out to every enabled target. One target's failure never blocks the
//! others: each target carries its own retry state and its own budget, and
//! every attempt is recorded in the append-only publication log. Before any
//! external call the log is consulted, so a lost local acknowledgement
//! cannot cause a second publication.

use crate::core::error::{ErrorClass, StageError};
use crate::core::item::{ContentItem, StageKind, TargetOutcome};
use crate::core::retry::{RetryDisposition, RetryKey, RetryPolicy};
use crate::core::traits::{
    DistributionTarget, PublishPayload, Stage, StageOutput, StageResult,
};
use crate::store::{PublicationLog, PublicationRecord, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Fan-out publisher over the configured targets
pub struct DistributionStage {
    targets: Vec<Arc<dyn DistributionTarget>>,
    store: Arc<StateStore>,
    log: Arc<PublicationLog>,
    policy: RetryPolicy,
    site_base_url: String,
}

impl DistributionStage {
    pub fn new(
        targets: Vec<Arc<dyn DistributionTarget>>,
        store: Arc<StateStore>,
        log: Arc<PublicationLog>,
        policy: RetryPolicy,
        site_base_url: String,
    ) -> Self {
        Self {
            targets,
            store,
            log,
            policy,
            site_base_url,
        }
    }

    fn store_error(&self, err: anyhow::Error) -> StageError {
        StageError::ServiceUnavailable {
            stage: self.kind().as_str().to_string(),
            message: format!("publication log unavailable: {}", err),
        }
    }

    async fn record_success(
        &self,
        item_id: &str,
        target: &str,
        external_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TargetOutcome, StageError> {
        self.log
            .append(&PublicationRecord::succeeded(
                item_id,
                target,
                external_ref.clone(),
                now,
            ))
            .await
            .map_err(|e| self.store_error(e))?;

        let key = RetryKey::target(item_id, StageKind::Distribution, target);
        self.store
            .clear_retry_state(&key)
            .await
            .map_err(|e| self.store_error(e))?;

        Ok(TargetOutcome {
            target: target.to_string(),
            success: true,
            external_ref,
            recorded_at: now,
        })
    }
}

#[async_trait]
impl Stage for DistributionStage {
    fn kind(&self) -> StageKind {
        StageKind::Distribution
    }

    async fn apply(&self, item: &ContentItem) -> StageResult {
        let stage = self.kind().as_str();

        if self.targets.is_empty() {
            return Ok(StageOutput::Skipped);
        }

        let payload = PublishPayload::from_item(item, &self.site_base_url)?;

        let mut outcomes: Vec<TargetOutcome> = Vec::new();
        let mut pending: Vec<DateTime<Utc>> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for target in &self.targets {
            let name = target.name().to_string();
            let now = Utc::now();

            // Idempotency guard: an already-recorded success is final
            let prior_success = self
                .log
                .succeeded_record(&item.id, &name)
                .await
                .map_err(|e| self.store_error(e))?;
            if let Some(record) = prior_success {
                outcomes.push(TargetOutcome {
                    target: name,
                    success: true,
                    external_ref: record.external_ref,
                    recorded_at: record.timestamp,
                });
                continue;
            }

            // Per-target backoff: defer without touching the target
            let key = RetryKey::target(&item.id, StageKind::Distribution, &name);
            let prior = self.store.retry_state(&key).await;
            if let Some(state) = &prior
                && state.next_eligible_at > now
            {
                pending.push(state.next_eligible_at);
                continue;
            }

            match target.publish(&payload).await {
                Ok(ack) => {
                    outcomes.push(
                        self.record_success(&item.id, &name, ack.external_ref, now)
                            .await?,
                    );
                }
                Err(err) if err.class() == ErrorClass::DuplicatePublication => {
                    // The desired end state holds; record it as success
                    let reference = match err {
                        StageError::AlreadyPublished { reference, .. } => reference,
                        _ => None,
                    };
                    outcomes.push(self.record_success(&item.id, &name, reference, now).await?);
                }
                Err(err) => {
                    self.log
                        .append(&PublicationRecord::failed(
                            &item.id,
                            &name,
                            err.to_string(),
                            now,
                        ))
                        .await
                        .map_err(|e| self.store_error(e))?;

                    match self.policy.disposition(&key, prior.as_ref(), &err, now) {
                        RetryDisposition::Retry(state) => {
                            pending.push(state.next_eligible_at);
                            self.store
                                .set_retry_state(&key, state)
                                .await
                                .map_err(|e| self.store_error(e))?;
                        }
                        RetryDisposition::GiveUp => {
                            failed.push(name);
                        }
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(StageError::TargetsFailed {
                stage: stage.to_string(),
                targets: failed.join(", "),
            });
        }

        if let Some(earliest) = pending.iter().min().copied() {
            return Err(StageError::TargetsPending {
                stage: stage.to_string(),
                pending: pending.len(),
                next_eligible_at: earliest,
            });
        }

        Ok(StageOutput::Published(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::{Draft, EnrichedMetadata, MonetizedBody};
    use crate::core::traits::TargetAck;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Target that fails a set number of times before succeeding
    struct FlakyTarget {
        name: String,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyTarget {
        fn new(name: &str, failures_before_success: u32) -> Self {
            Self {
                name: name.to_string(),
                failures_before_success,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DistributionTarget for FlakyTarget {
        fn name(&self) -> &str {
            &self.name
        }

        async fn publish(&self, _payload: &PublishPayload) -> Result<TargetAck, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(StageError::Timeout {
                    stage: self.name.clone(),
                    waited_ms: 30_000,
                })
            } else {
                Ok(TargetAck {
                    external_ref: Some(format!("https://{}.example/post/1", self.name)),
                })
            }
        }
    }

    /// Target that always reports the content as already present
    struct DuplicateTarget;

    #[async_trait]
    impl DistributionTarget for DuplicateTarget {
        fn name(&self) -> &str {
            "medium"
        }

        async fn publish(&self, _payload: &PublishPayload) -> Result<TargetAck, StageError> {
            Err(StageError::AlreadyPublished {
                target: "medium".to_string(),
                reference: Some("https://medium.example/p/1".to_string()),
            })
        }
    }

    /// Target that always fails with a validation error
    struct RejectingTarget;

    #[async_trait]
    impl DistributionTarget for RejectingTarget {
        fn name(&self) -> &str {
            "reddit"
        }

        async fn publish(&self, _payload: &PublishPayload) -> Result<TargetAck, StageError> {
            Err(StageError::InvalidOutput {
                stage: "reddit".to_string(),
                message: "post rejected".to_string(),
            })
        }
    }

    fn ready_item() -> ContentItem {
        let mut item = ContentItem::new("nap scheduling", Utc::now());
        item.draft = Some(Draft {
            title: "Nap Scheduling".to_string(),
            body: "<p>naps</p>".to_string(),
        });
        item.enrichment = Some(EnrichedMetadata {
            title: "Nap Scheduling That Works".to_string(),
            description: "A practical guide.".to_string(),
            tags: vec!["naps".to_string()],
            internal_links: vec![],
        });
        item.monetized = Some(MonetizedBody {
            body: "<p>naps</p>".to_string(),
            ad_slots: 0,
            affiliate_refs: vec![],
        });
        item
    }

    /// Policy with zero distribution backoff so retries are
    /// immediately eligible in tests
    fn instant_policy() -> RetryPolicy {
        RetryPolicy::new(
            3,
            chrono::Duration::seconds(3600),
            chrono::Duration::seconds(86_400),
            [chrono::Duration::zero(); 4],
        )
    }

    async fn stage_with(
        temp_dir: &TempDir,
        targets: Vec<Arc<dyn DistributionTarget>>,
    ) -> (DistributionStage, Arc<StateStore>, Arc<PublicationLog>) {
        let store = Arc::new(StateStore::open(temp_dir.path()).await.unwrap());
        let log = Arc::new(PublicationLog::new(temp_dir.path()));
        let stage = DistributionStage::new(
            targets,
            store.clone(),
            log.clone(),
            instant_policy(),
            "https://example.com".to_string(),
        );
        (stage, store, log)
    }

    #[tokio::test]
    async fn test_zero_targets_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (stage, _store, _log) = stage_with(&temp_dir, vec![]).await;

        let output = stage.apply(&ready_item()).await.unwrap();
        assert_eq!(output, StageOutput::Skipped);
    }

    #[tokio::test]
    async fn test_successful_fanout_records_each_target() {
        let temp_dir = TempDir::new().unwrap();
        let (stage, _store, log) = stage_with(
            &temp_dir,
            vec![
                Arc::new(FlakyTarget::new("site", 0)),
                Arc::new(FlakyTarget::new("pinterest", 0)),
            ],
        )
        .await;
        let item = ready_item();

        let output = stage.apply(&item).await.unwrap();

        let StageOutput::Published(outcomes) = output else {
            panic!("expected published output");
        };
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert!(log.has_succeeded(&item.id, "site").await.unwrap());
        assert!(log.has_succeeded(&item.id, "pinterest").await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_never_duplicates_publication() {
        let temp_dir = TempDir::new().unwrap();
        let pinterest = Arc::new(FlakyTarget::new("pinterest", 2));
        let (stage, _store, log) = stage_with(&temp_dir, vec![pinterest.clone()]).await;
        let item = ready_item();

        // Two failed runs, then success on the third
        assert!(matches!(
            stage.apply(&item).await,
            Err(StageError::TargetsPending { pending: 1, .. })
        ));
        assert!(matches!(
            stage.apply(&item).await,
            Err(StageError::TargetsPending { pending: 1, .. })
        ));
        let output = stage.apply(&item).await.unwrap();
        assert!(matches!(output, StageOutput::Published(_)));

        // A fourth run must not call the target again
        let _ = stage.apply(&item).await.unwrap();
        assert_eq!(pinterest.calls(), 3);

        let succeeded: Vec<_> = log
            .records_for_item(&item.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.target == "pinterest" && r.success)
            .collect();
        assert_eq!(succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_state_cleared_after_success() {
        let temp_dir = TempDir::new().unwrap();
        let (stage, store, _log) =
            stage_with(&temp_dir, vec![Arc::new(FlakyTarget::new("pinterest", 1))]).await;
        let item = ready_item();

        let _ = stage.apply(&item).await;
        let key = RetryKey::target(&item.id, StageKind::Distribution, "pinterest");
        assert!(store.retry_state(&key).await.is_some());

        let _ = stage.apply(&item).await.unwrap();
        assert!(store.retry_state(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_one_failing_target_does_not_block_others() {
        let temp_dir = TempDir::new().unwrap();
        let site = Arc::new(FlakyTarget::new("site", 0));
        let (stage, _store, log) = stage_with(
            &temp_dir,
            vec![site, Arc::new(FlakyTarget::new("pinterest", 5))],
        )
        .await;
        let item = ready_item();

        let result = stage.apply(&item).await;

        assert!(matches!(result, Err(StageError::TargetsPending { .. })));
        assert!(log.has_succeeded(&item.id, "site").await.unwrap());
        assert!(!log.has_succeeded(&item.id, "pinterest").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_report_counts_as_success() {
        let temp_dir = TempDir::new().unwrap();
        let (stage, _store, log) = stage_with(&temp_dir, vec![Arc::new(DuplicateTarget)]).await;
        let item = ready_item();

        let output = stage.apply(&item).await.unwrap();

        let StageOutput::Published(outcomes) = output else {
            panic!("expected published output");
        };
        assert!(outcomes[0].success);
        assert_eq!(
            outcomes[0].external_ref.as_deref(),
            Some("https://medium.example/p/1")
        );
        assert!(log.has_succeeded(&item.id, "medium").await.unwrap());
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal_for_stage() {
        let temp_dir = TempDir::new().unwrap();
        let (stage, _store, log) = stage_with(&temp_dir, vec![Arc::new(RejectingTarget)]).await;
        let item = ready_item();

        let result = stage.apply(&item).await;

        assert!(matches!(
            result,
            Err(StageError::TargetsFailed { ref targets, .. }) if targets == "reddit"
        ));
        // The failed attempt is still on the audit trail
        let records = log.records_for_item(&item.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn test_target_budget_exhaustion_fails_stage() {
        let temp_dir = TempDir::new().unwrap();
        let pinterest = Arc::new(FlakyTarget::new("pinterest", 99));
        let (stage, _store, _log) = stage_with(&temp_dir, vec![pinterest.clone()]).await;
        let item = ready_item();

        // Budget is 3: two deferrals, then the third failure gives up
        let _ = stage.apply(&item).await;
        let _ = stage.apply(&item).await;
        let result = stage.apply(&item).await;

        assert!(matches!(result, Err(StageError::TargetsFailed { .. })));
        assert_eq!(pinterest.calls(), 3);
    }
}
