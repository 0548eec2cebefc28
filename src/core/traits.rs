//! Core capability traits for the automation pipeline
//!
//! Stages, distribution targets, and the affiliate catalog are modeled as
//! trait objects selected and wired from configuration, never via runtime
//! type inspection.

use crate::core::error::StageError;
use crate::core::item::{
    ContentItem, Draft, EnrichedMetadata, MonetizedBody, StageKind, TargetOutcome,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Success payload of one stage invocation
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Content source produced a draft
    Draft(Draft),

    /// Enrichment produced metadata and internal links
    Enriched(EnrichedMetadata),

    /// Monetization produced the final body
    Monetized(MonetizedBody),

    /// Distribution delivered to every enabled target
    Published(Vec<TargetOutcome>),

    /// The stage had nothing to do for this configuration
    Skipped,
}

/// Result of one stage invocation: a success payload or a classified failure
pub type StageResult = Result<StageOutput, StageError>;

/// Shared contract for Source, Enrichment, Monetization and Distribution
///
/// Implementations must be pure with respect to the item they are given;
/// only distribution performs external side effects, and it must be safe
/// to retry.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which pipeline step this stage implements
    fn kind(&self) -> StageKind;

    /// Run the stage against the item's current payloads
    async fn apply(&self, item: &ContentItem) -> StageResult;
}

/// Everything a distribution target needs to publish one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishPayload {
    pub title: String,
    pub description: String,
    pub body: String,
    pub tags: Vec<String>,
    pub slug: String,

    /// Canonical URL of the post on the site
    pub canonical_url: String,
}

impl PublishPayload {
    /// Assemble the payload from a fully enriched and monetized item
    pub fn from_item(item: &ContentItem, site_base_url: &str) -> Result<Self, StageError> {
        let enrichment = item.enrichment.as_ref().ok_or_else(|| {
            StageError::MissingMetadata {
                stage: StageKind::Distribution.as_str().to_string(),
                field: "enrichment".to_string(),
            }
        })?;
        let monetized = item.monetized.as_ref().ok_or_else(|| {
            StageError::MissingMetadata {
                stage: StageKind::Distribution.as_str().to_string(),
                field: "monetized".to_string(),
            }
        })?;

        Ok(Self {
            title: enrichment.title.clone(),
            description: enrichment.description.clone(),
            body: monetized.body.clone(),
            tags: enrichment.tags.clone(),
            slug: item.slug.clone(),
            canonical_url: format!(
                "{}/blog/{}",
                site_base_url.trim_end_matches('/'),
                item.slug
            ),
        })
    }
}

/// Acknowledgement returned by a successful target publication
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAck {
    /// External reference (e.g., post URL) if the target reports one
    pub external_ref: Option<String>,
}

/// One external platform the distribution stage publishes to
#[async_trait]
pub trait DistributionTarget: Send + Sync {
    /// Target name (e.g., "pinterest")
    fn name(&self) -> &str;

    /// Publish the payload; must classify its failures
    async fn publish(&self, payload: &PublishPayload) -> Result<TargetAck, StageError>;
}

/// Affiliate product looked up by the monetization stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AffiliateProduct {
    pub name: String,

    /// Affiliate program this product belongs to
    pub program: String,

    pub url: String,

    /// Keywords whose occurrence in a body makes the product relevant
    pub keywords: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AffiliateProduct {
    /// Stable per-product key used to deduplicate insertions
    pub fn product_key(&self) -> String {
        ContentItem::slugify(&self.name)
    }
}

/// Capability that resolves affiliate products for a set of programs
#[async_trait]
pub trait AffiliateCatalog: Send + Sync {
    async fn products_for(&self, programs: &[String]) -> Result<Vec<AffiliateProduct>, StageError>;
}
