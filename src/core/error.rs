//! Error handling for the automation pipeline
//!
//! Stage errors carry a classification that drives the orchestrator's
//! retry/terminal decision; configuration errors halt a run before any
//! item is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure, used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, rate limits, 5xx-equivalents: retryable with backoff
    Transient,
    /// Upstream quota is gone for now; short retries cannot help
    QuotaExhausted,
    /// Malformed or policy-violating output: not retryable
    Validation,
    /// The target already holds the content; the desired end state holds
    DuplicatePublication,
    /// Missing credential or policy at startup; aborts the run
    FatalConfiguration,
}

/// Error raised by a pipeline stage or distribution target
#[derive(Error, Debug)]
pub enum StageError {
    #[error("[{stage}] service call timed out after {waited_ms}ms")]
    Timeout { stage: String, waited_ms: u64 },

    #[error("[{stage}] transient service failure: {message}")]
    ServiceUnavailable { stage: String, message: String },

    #[error("[{stage}] rate limited by upstream service")]
    RateLimited { stage: String },

    #[error("[{stage}] upstream quota exhausted")]
    QuotaExhausted { stage: String },

    #[error("[{stage}] invalid stage output: {message}")]
    InvalidOutput { stage: String, message: String },

    #[error("[{stage}] required metadata missing: {field}")]
    MissingMetadata { stage: String, field: String },

    #[error("[{target}] content already published")]
    AlreadyPublished {
        target: String,
        reference: Option<String>,
    },

    #[error("[{stage}] {pending} target(s) awaiting retry")]
    TargetsPending {
        stage: String,
        pending: usize,
        next_eligible_at: DateTime<Utc>,
    },

    #[error("[{stage}] distribution failed permanently for: {targets}")]
    TargetsFailed { stage: String, targets: String },
}

impl StageError {
    /// Get the stage (or target) name associated with this error
    pub fn stage(&self) -> &str {
        match self {
            Self::Timeout { stage, .. }
            | Self::ServiceUnavailable { stage, .. }
            | Self::RateLimited { stage }
            | Self::QuotaExhausted { stage }
            | Self::InvalidOutput { stage, .. }
            | Self::MissingMetadata { stage, .. }
            | Self::TargetsPending { stage, .. }
            | Self::TargetsFailed { stage, .. } => stage,
            Self::AlreadyPublished { target, .. } => target,
        }
    }

    /// Classify this error for the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. }
            | Self::ServiceUnavailable { .. }
            | Self::RateLimited { .. }
            | Self::TargetsPending { .. } => ErrorClass::Transient,
            Self::QuotaExhausted { .. } => ErrorClass::QuotaExhausted,
            Self::InvalidOutput { .. }
            | Self::MissingMetadata { .. }
            | Self::TargetsFailed { .. } => ErrorClass::Validation,
            Self::AlreadyPublished { .. } => ErrorClass::DuplicatePublication,
        }
    }

    /// Explicit retry schedule carried by the error, if any
    ///
    /// Distribution reports the earliest next-eligible time among its
    /// pending targets; the orchestrator uses it verbatim instead of
    /// computing a stage-level backoff.
    pub fn scheduled_retry(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::TargetsPending {
                next_eligible_at, ..
            } => Some(*next_eligible_at),
            _ => None,
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TIMEOUT",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::QuotaExhausted { .. } => "QUOTA_EXHAUSTED",
            Self::InvalidOutput { .. } => "INVALID_OUTPUT",
            Self::MissingMetadata { .. } => "MISSING_METADATA",
            Self::AlreadyPublished { .. } => "ALREADY_PUBLISHED",
            Self::TargetsPending { .. } => "TARGETS_PENDING",
            Self::TargetsFailed { .. } => "TARGETS_FAILED",
        }
    }
}

/// Classify an HTTP response status from a stage service or target
///
/// Quota-style responses are distinguished from plain rate limiting by the
/// response body, mirroring how text-generation providers report the two.
pub fn classify_http(stage: &str, status: u16, body: &str) -> StageError {
    let body_lower = body.to_lowercase();

    match status {
        402 => StageError::QuotaExhausted {
            stage: stage.to_string(),
        },
        429 if body_lower.contains("quota") => StageError::QuotaExhausted {
            stage: stage.to_string(),
        },
        429 => StageError::RateLimited {
            stage: stage.to_string(),
        },
        409 => StageError::AlreadyPublished {
            target: stage.to_string(),
            reference: None,
        },
        500..=599 => StageError::ServiceUnavailable {
            stage: stage.to_string(),
            message: format!("HTTP {}", status),
        },
        _ => StageError::InvalidOutput {
            stage: stage.to_string(),
            message: format!("HTTP {}: {}", status, truncate(body, 120)),
        },
    }
}

/// Classify a transport-level failure from a stage service or target
pub fn classify_transport(stage: &str, err: &reqwest::Error, timeout_ms: u64) -> StageError {
    if err.is_timeout() {
        StageError::Timeout {
            stage: stage.to_string(),
            waited_ms: timeout_ms,
        }
    } else {
        StageError::ServiceUnavailable {
            stage: stage.to_string(),
            message: err.to_string(),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Configuration error surfaced at startup, before any item is touched
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {message}")]
    Unreadable { message: String },

    #[error("invalid configuration at {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("missing credential {env_var} for {target}")]
    MissingCredential { target: String, env_var: String },
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::FatalConfiguration
    }
}
