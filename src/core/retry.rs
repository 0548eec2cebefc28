//! Retry policy with exponential backoff
//!
//! One policy object, parameterized by error classification, is applied
//! uniformly around every stage invocation. Delays double from a
//! stage-specific base unit, carry deterministic jitter, and are capped.

use crate::core::error::{ErrorClass, StageError};
use crate::core::item::StageKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Retry state for one (item, stage) or (item, stage, target) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryState {
    /// Retryable failures recorded so far
    pub attempts: u32,

    /// Earliest time the next attempt may run
    pub next_eligible_at: DateTime<Utc>,

    /// Classification of the last failure
    pub last_error: ErrorClass,
}

/// Key addressing a retry state in the store
///
/// Distribution keys additionally carry the target name, so each target
/// backs off independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RetryKey {
    pub item_id: String,
    pub stage: StageKind,
    pub target: Option<String>,
}

impl RetryKey {
    pub fn stage(item_id: &str, stage: StageKind) -> Self {
        Self {
            item_id: item_id.to_string(),
            stage,
            target: None,
        }
    }

    pub fn target(item_id: &str, stage: StageKind, target: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            stage,
            target: Some(target.to_string()),
        }
    }

    /// Encode as a flat store key: `item|stage` or `item|stage|target`
    pub fn encode(&self) -> String {
        match &self.target {
            Some(target) => format!("{}|{}|{}", self.item_id, self.stage, target),
            None => format!("{}|{}", self.item_id, self.stage),
        }
    }
}

/// What the orchestrator should do after a stage failure
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDisposition {
    /// Schedule another attempt; persist the carried state
    Retry(RetryState),
    /// Budget exhausted or the error is not retryable
    GiveUp,
}

/// Backoff and budget options, read once from configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    cap: Duration,
    quota_backoff: Duration,
    source_unit: Duration,
    enrichment_unit: Duration,
    monetization_unit: Duration,
    distribution_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cap: Duration::seconds(3600),
            quota_backoff: Duration::seconds(86_400),
            source_unit: Duration::seconds(30),
            enrichment_unit: Duration::seconds(15),
            monetization_unit: Duration::seconds(10),
            distribution_unit: Duration::seconds(60),
        }
    }
}

impl RetryPolicy {
    /// Build the policy from the retry section of the configuration
    pub fn from_config(config: &crate::core::config::RetryConfig) -> Self {
        let secs = |value: u64| Duration::seconds(value as i64);
        Self::new(
            config.max_attempts,
            secs(config.backoff_cap_secs),
            secs(config.quota_backoff_secs),
            [
                secs(config.stage_unit_secs.source),
                secs(config.stage_unit_secs.enrichment),
                secs(config.stage_unit_secs.monetization),
                secs(config.stage_unit_secs.distribution),
            ],
        )
    }

    pub fn new(
        max_attempts: u32,
        cap: Duration,
        quota_backoff: Duration,
        units: [Duration; 4],
    ) -> Self {
        Self {
            max_attempts,
            cap,
            quota_backoff,
            source_unit: units[0],
            enrichment_unit: units[1],
            monetization_unit: units[2],
            distribution_unit: units[3],
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base backoff unit for a stage
    pub fn backoff_unit(&self, stage: StageKind) -> Duration {
        match stage {
            StageKind::Source => self.source_unit,
            StageKind::Enrichment => self.enrichment_unit,
            StageKind::Monetization => self.monetization_unit,
            StageKind::Distribution => self.distribution_unit,
        }
    }

    /// Delay before attempt `attempts + 1`, given `attempts` failures so far
    ///
    /// `unit * 2^(attempts-1) * (1 + jitter)`, capped. Jitter is derived
    /// from the key so it is stable across restarts, and bounded below 1.0
    /// so consecutive delays never decrease before the cap.
    pub fn delay_for(&self, stage: StageKind, attempts: u32, key: &RetryKey) -> Duration {
        let unit_ms = self.backoff_unit(stage).num_milliseconds().max(0) as f64;
        let doubled = unit_ms * f64::from(2u32.saturating_pow(attempts.saturating_sub(1)));
        let jittered = doubled * (1.0 + Self::jitter_fraction(key, attempts));

        let cap_ms = self.cap.num_milliseconds().max(0) as f64;
        Duration::milliseconds(jittered.min(cap_ms) as i64)
    }

    fn jitter_fraction(key: &RetryKey, attempts: u32) -> f64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        attempts.hash(&mut hasher);
        (hasher.finish() % 1000) as f64 / 2000.0
    }

    /// Decide what happens after a failed attempt
    ///
    /// `prior` is the retry state persisted before this attempt, if any.
    pub fn disposition(
        &self,
        key: &RetryKey,
        prior: Option<&RetryState>,
        err: &StageError,
        now: DateTime<Utc>,
    ) -> RetryDisposition {
        // Distribution carries its own per-target schedule; the stage-level
        // budget does not apply to it.
        if let Some(at) = err.scheduled_retry() {
            return RetryDisposition::Retry(RetryState {
                attempts: prior.map(|state| state.attempts).unwrap_or(0),
                next_eligible_at: at,
                last_error: err.class(),
            });
        }

        let class = err.class();
        match class {
            ErrorClass::Transient | ErrorClass::QuotaExhausted => {
                let attempts = prior.map(|state| state.attempts).unwrap_or(0) + 1;
                if attempts >= self.max_attempts {
                    return RetryDisposition::GiveUp;
                }

                let delay = if class == ErrorClass::QuotaExhausted {
                    self.quota_backoff
                } else {
                    self.delay_for(key.stage, attempts, key)
                };

                RetryDisposition::Retry(RetryState {
                    attempts,
                    next_eligible_at: now + delay,
                    last_error: class,
                })
            }
            ErrorClass::Validation
            | ErrorClass::DuplicatePublication
            | ErrorClass::FatalConfiguration => RetryDisposition::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RetryKey {
        RetryKey::stage("2026-03-14-nap-scheduling", StageKind::Source)
    }

    fn transient() -> StageError {
        StageError::ServiceUnavailable {
            stage: "source".to_string(),
            message: "HTTP 503".to_string(),
        }
    }

    #[test]
    fn test_key_encoding() {
        let stage_key = RetryKey::stage("2026-03-14-nap-scheduling", StageKind::Enrichment);
        assert_eq!(stage_key.encode(), "2026-03-14-nap-scheduling|enrichment");

        let target_key =
            RetryKey::target("2026-03-14-nap-scheduling", StageKind::Distribution, "pinterest");
        assert_eq!(
            target_key.encode(),
            "2026-03-14-nap-scheduling|distribution|pinterest"
        );
    }

    #[test]
    fn test_delays_are_non_decreasing_up_to_cap() {
        let policy = RetryPolicy::default();
        let key = key();

        let mut previous = Duration::zero();
        for attempts in 1..=12 {
            let delay = policy.delay_for(StageKind::Source, attempts, &key);
            assert!(
                delay >= previous,
                "delay for attempt {} decreased: {:?} < {:?}",
                attempts,
                delay,
                previous
            );
            previous = delay;
        }

        assert_eq!(previous, Duration::seconds(3600));
    }

    #[test]
    fn test_jitter_is_deterministic() {
        let policy = RetryPolicy::default();
        let key = key();

        let a = policy.delay_for(StageKind::Source, 2, &key);
        let b = policy.delay_for(StageKind::Source, 2, &key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_first_delay_at_least_one_unit() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for(StageKind::Distribution, 1, &key());

        assert!(delay >= Duration::seconds(60));
        assert!(delay < Duration::seconds(120));
    }

    #[test]
    fn test_transient_failure_schedules_retry() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let disposition = policy.disposition(&key(), None, &transient(), now);

        match disposition {
            RetryDisposition::Retry(state) => {
                assert_eq!(state.attempts, 1);
                assert_eq!(state.last_error, ErrorClass::Transient);
                assert!(state.next_eligible_at > now);
            }
            RetryDisposition::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_budget_exhaustion_gives_up() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let prior = RetryState {
            attempts: 2,
            next_eligible_at: now,
            last_error: ErrorClass::Transient,
        };

        let disposition = policy.disposition(&key(), Some(&prior), &transient(), now);

        assert_eq!(disposition, RetryDisposition::GiveUp);
    }

    #[test]
    fn test_validation_failure_gives_up_immediately() {
        let policy = RetryPolicy::default();
        let err = StageError::MissingMetadata {
            stage: "monetization".to_string(),
            field: "tags".to_string(),
        };

        let disposition = policy.disposition(&key(), None, &err, Utc::now());

        assert_eq!(disposition, RetryDisposition::GiveUp);
    }

    #[test]
    fn test_quota_uses_long_backoff() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let err = StageError::QuotaExhausted {
            stage: "source".to_string(),
        };

        match policy.disposition(&key(), None, &err, now) {
            RetryDisposition::Retry(state) => {
                assert_eq!(state.last_error, ErrorClass::QuotaExhausted);
                assert_eq!(state.next_eligible_at, now + Duration::seconds(86_400));
            }
            RetryDisposition::GiveUp => panic!("quota errors are retryable"),
        }
    }

    #[test]
    fn test_scheduled_retry_bypasses_stage_budget() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let at = now + Duration::seconds(120);
        let err = StageError::TargetsPending {
            stage: "distribution".to_string(),
            pending: 1,
            next_eligible_at: at,
        };
        // Prior attempts already at the stage budget; the carried schedule
        // still wins because target budgets are enforced inside the stage.
        let prior = RetryState {
            attempts: 5,
            next_eligible_at: now,
            last_error: ErrorClass::Transient,
        };

        match policy.disposition(&key(), Some(&prior), &err, now) {
            RetryDisposition::Retry(state) => {
                assert_eq!(state.next_eligible_at, at);
                assert_eq!(state.attempts, 5);
            }
            RetryDisposition::GiveUp => panic!("expected scheduled retry"),
        }
    }
}
