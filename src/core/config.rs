//! Configuration structures for content-autopilot
//!
//! One immutable configuration object is read at process start and passed
//! into the orchestrator at construction; there are no ambient globals for
//! policy values.

use crate::core::traits::AffiliateProduct;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AutomationConfig {
    /// Schema version
    pub version: String,

    /// Site metadata used by enrichment and distribution
    pub site: SiteConfig,

    /// Batch, worker pool and persistence settings
    pub pipeline: PipelineConfig,

    /// Retry budgets and backoff shape
    pub retry: RetryConfig,

    /// Stage service endpoints
    pub services: ServiceConfigs,

    /// Distribution target configurations
    pub targets: TargetConfigs,

    /// Monetization policy table and product catalog
    pub monetization: MonetizationConfig,

    /// Scheduler cadence (optional; `run` works without it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,

    /// Topic backlog the scheduler draws from
    pub topics: Vec<String>,
}

/// Site metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    /// Base URL posts are published under
    #[serde(rename = "baseUrl")]
    pub base_url: String,

    /// Keywords enrichment may promote into tags
    pub keywords: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.com".to_string(),
            keywords: Vec::new(),
        }
    }
}

/// Batch and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// New items created per run (default: 3)
    #[serde(rename = "batchSize")]
    pub batch_size: usize,

    /// Concurrent item workers (default: 3)
    #[serde(rename = "workerPoolSize")]
    pub worker_pool_size: usize,

    /// Directory holding the durable stores
    #[serde(rename = "stateDir")]
    pub state_dir: PathBuf,

    /// Timeout applied to every external call, in seconds (default: 30)
    #[serde(rename = "callTimeoutSecs")]
    pub call_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            worker_pool_size: 3,
            state_dir: PathBuf::from(".content-autopilot"),
            call_timeout_secs: 30,
        }
    }
}

/// Retry budgets and backoff shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per stage or target (default: 3)
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,

    /// Upper bound on any computed backoff, in seconds (default: 3600)
    #[serde(rename = "backoffCapSecs")]
    pub backoff_cap_secs: u64,

    /// Backoff after quota exhaustion, in seconds (default: one day)
    #[serde(rename = "quotaBackoffSecs")]
    pub quota_backoff_secs: u64,

    /// Base backoff unit per stage, in seconds
    #[serde(rename = "stageUnitSecs")]
    pub stage_unit_secs: StageUnitSecs,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_cap_secs: 3600,
            quota_backoff_secs: 86_400,
            stage_unit_secs: StageUnitSecs::default(),
        }
    }
}

/// Per-stage backoff base units, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageUnitSecs {
    pub source: u64,
    pub enrichment: u64,
    pub monetization: u64,
    pub distribution: u64,
}

impl Default for StageUnitSecs {
    fn default() -> Self {
        Self {
            source: 30,
            enrichment: 15,
            monetization: 10,
            distribution: 60,
        }
    }
}

/// Stage service endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfigs {
    /// Draft generation service
    pub generator: ServiceEndpoint,

    /// Metadata enrichment service
    pub enrichment: ServiceEndpoint,
}

/// One HTTP stage service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceEndpoint {
    pub endpoint: String,

    /// Environment variable holding the API key, if the service needs one
    #[serde(skip_serializing_if = "Option::is_none", rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,
}

/// Distribution target configurations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TargetConfigs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteTargetConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinterest: Option<PinterestTargetConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reddit: Option<RedditTargetConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<MediumTargetConfig>,
}

/// Publish-to-site target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteTargetConfig {
    /// Enable this target (default: true if defined)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Content API endpoint of the site
    pub endpoint: String,
}

/// Pinterest pin creation target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinterestTargetConfig {
    /// Enable this target (default: true if defined)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Board pins are created on
    #[serde(rename = "boardId")]
    pub board_id: String,

    /// API endpoint override (default: the public pins API)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Reddit text post target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditTargetConfig {
    /// Enable this target (default: true if defined)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Subreddit posts are submitted to
    pub subreddit: String,

    /// API endpoint override (default: the OAuth submit API)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Medium story import target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediumTargetConfig {
    /// Enable this target (default: true if defined)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// API endpoint override (default: the public posts API)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Monetization policy table and product catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonetizationConfig {
    /// Affiliate references inserted per item, at most (default: 3)
    #[serde(rename = "maxAffiliateRefs")]
    pub max_affiliate_refs: usize,

    /// Content tag → monetization policy
    pub policies: HashMap<String, MonetizationPolicy>,

    /// Product catalog the config-backed affiliate lookup serves
    pub catalog: Vec<AffiliateProduct>,
}

impl Default for MonetizationConfig {
    fn default() -> Self {
        Self {
            max_affiliate_refs: 3,
            policies: HashMap::new(),
            catalog: Vec::new(),
        }
    }
}

/// Monetization policy for one content tag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonetizationPolicy {
    /// Ad slot markers inserted per item for this tag
    #[serde(rename = "adSlotDensity")]
    pub ad_slot_density: u32,

    /// Affiliate program whose products may be referenced
    #[serde(rename = "affiliateProgram")]
    pub affiliate_program: String,
}

/// Scheduler cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Daily run time, `HH:MM` (UTC)
    #[serde(rename = "dailyAt")]
    pub daily_at: String,
}
