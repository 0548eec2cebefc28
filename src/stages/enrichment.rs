//! Enrichment stage
//!
//! Rewrites title, description and tags through the enrichment service and
//! proposes internal links from the index of already published items. Pure
//! with respect to the item: the link index is a run input, refreshed by
//! the orchestrator before items are processed.

use crate::core::config::ServiceEndpoint;
use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::item::{ContentItem, EnrichedMetadata, InternalLink, StageKind};
use crate::core::traits::{Stage, StageOutput, StageResult};
use crate::security::TokenManager;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Title length ceiling, matching common search snippet limits
const MAX_TITLE_CHARS: usize = 60;

/// Description length ceiling
const MAX_DESCRIPTION_CHARS: usize = 160;

/// Internal links proposed per item, at most
const MAX_INTERNAL_LINKS: usize = 3;

/// One published post internal links can point at
#[derive(Debug, Clone, PartialEq)]
pub struct LinkTarget {
    pub title: String,
    pub slug: String,
}

/// Shared handle to the per-run link index
#[derive(Clone, Default)]
pub struct LinkIndex {
    inner: Arc<RwLock<Vec<LinkTarget>>>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index contents at the start of a run
    pub fn replace(&self, targets: Vec<LinkTarget>) {
        *self.inner.write().expect("link index lock poisoned") = targets;
    }

    pub fn snapshot(&self) -> Vec<LinkTarget> {
        self.inner.read().expect("link index lock poisoned").clone()
    }
}

#[derive(Debug, Serialize)]
struct EnrichRequest<'a> {
    topic: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct EnrichResponse {
    title: String,
    description: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// HTTP-backed metadata enrichment with local link proposals
pub struct EnrichmentStage {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    site_keywords: Vec<String>,
    link_index: LinkIndex,
}

impl EnrichmentStage {
    pub fn new(
        service: &ServiceEndpoint,
        timeout: Duration,
        site_keywords: Vec<String>,
        link_index: LinkIndex,
    ) -> Self {
        let api_key = service
            .api_key_env
            .as_deref()
            .and_then(TokenManager::token_from_env);

        Self {
            client: reqwest::Client::new(),
            endpoint: service.endpoint.clone(),
            api_key,
            timeout,
            site_keywords,
            link_index,
        }
    }

    /// Truncate to a character budget, marking the cut with an ellipsis
    fn clamp_text(text: &str, max_chars: usize) -> String {
        let count = text.chars().count();
        if count <= max_chars {
            return text.to_string();
        }

        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut.trim_end())
    }

    /// Merge service tags with site keywords found in the body
    ///
    /// Tags are normalized to slug form so they line up with the
    /// monetization policy table keys.
    fn merge_tags(service_tags: &[String], site_keywords: &[String], body: &str) -> Vec<String> {
        let body_lower = body.to_lowercase();
        let mut tags = Vec::new();

        for tag in service_tags {
            let slug = ContentItem::slugify(tag);
            if !slug.is_empty() && !tags.contains(&slug) {
                tags.push(slug);
            }
        }

        for keyword in site_keywords {
            if body_lower.contains(&keyword.to_lowercase()) {
                let slug = ContentItem::slugify(keyword);
                if !slug.is_empty() && !tags.contains(&slug) {
                    tags.push(slug);
                }
            }
        }

        tags
    }

    /// Propose internal links by matching published titles against the body
    ///
    /// A title contributes at most one link, anchored at its first bigram
    /// found in the body. Matching is case-insensitive; the item never
    /// links to itself.
    fn propose_links(body: &str, targets: &[LinkTarget], own_slug: &str) -> Vec<InternalLink> {
        let body_lower = body.to_lowercase();
        let mut links = Vec::new();

        for target in targets {
            if links.len() >= MAX_INTERNAL_LINKS {
                break;
            }
            if target.slug == own_slug {
                continue;
            }

            let words: Vec<&str> = target.title.split_whitespace().collect();
            for pair in words.windows(2) {
                let phrase = format!("{} {}", pair[0], pair[1]).to_lowercase();
                if phrase.len() > 5 && body_lower.contains(&phrase) {
                    links.push(InternalLink {
                        anchor: phrase,
                        slug: target.slug.clone(),
                    });
                    break;
                }
            }
        }

        links
    }
}

#[async_trait]
impl Stage for EnrichmentStage {
    fn kind(&self) -> StageKind {
        StageKind::Enrichment
    }

    async fn apply(&self, item: &ContentItem) -> StageResult {
        let stage = self.kind().as_str();
        let timeout_ms = self.timeout.as_millis() as u64;

        let draft = item.draft.as_ref().ok_or_else(|| StageError::MissingMetadata {
            stage: stage.to_string(),
            field: "draft".to_string(),
        })?;

        let request = EnrichRequest {
            topic: &item.topic,
            title: &draft.title,
            body: &draft.body,
        };
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport(stage, &e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http(stage, status.as_u16(), &body));
        }

        let enriched: EnrichResponse =
            response.json().await.map_err(|e| StageError::InvalidOutput {
                stage: stage.to_string(),
                message: format!("malformed response: {}", e),
            })?;

        if enriched.title.trim().is_empty() {
            return Err(StageError::InvalidOutput {
                stage: stage.to_string(),
                message: "service returned an empty title".to_string(),
            });
        }
        if enriched.description.trim().is_empty() {
            return Err(StageError::InvalidOutput {
                stage: stage.to_string(),
                message: "service returned an empty description".to_string(),
            });
        }

        let targets = self.link_index.snapshot();

        Ok(StageOutput::Enriched(EnrichedMetadata {
            title: Self::clamp_text(&enriched.title, MAX_TITLE_CHARS),
            description: Self::clamp_text(&enriched.description, MAX_DESCRIPTION_CHARS),
            tags: Self::merge_tags(&enriched.tags, &self.site_keywords, &draft.body),
            internal_links: Self::propose_links(&draft.body, &targets, &item.slug),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_text_short_is_unchanged() {
        assert_eq!(EnrichmentStage::clamp_text("short title", 60), "short title");
    }

    #[test]
    fn test_clamp_text_truncates_with_ellipsis() {
        let long = "a".repeat(80);
        let clamped = EnrichmentStage::clamp_text(&long, 60);

        assert_eq!(clamped.chars().count(), 60);
        assert!(clamped.ends_with("..."));
    }

    #[test]
    fn test_merge_tags_normalizes_and_dedupes() {
        let service_tags = vec!["Sleep Training".to_string(), "sleep training".to_string()];
        let tags = EnrichmentStage::merge_tags(&service_tags, &[], "body");

        assert_eq!(tags, vec!["sleep-training"]);
    }

    #[test]
    fn test_merge_tags_promotes_site_keywords_in_body() {
        let site = vec!["night wakings".to_string(), "co-sleeping".to_string()];
        let body = "Frequent night wakings are normal in the first months.";

        let tags = EnrichmentStage::merge_tags(&[], &site, body);

        assert_eq!(tags, vec!["night-wakings"]);
    }

    #[test]
    fn test_propose_links_matches_title_bigrams() {
        let targets = vec![
            LinkTarget {
                title: "Gentle Sleep Training Methods".to_string(),
                slug: "gentle-sleep-training-methods".to_string(),
            },
            LinkTarget {
                title: "Travel Tips".to_string(),
                slug: "travel-tips".to_string(),
            },
        ];
        let body = "Many parents try gentle sleep training once routines settle.";

        let links = EnrichmentStage::propose_links(body, &targets, "own-slug");

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].slug, "gentle-sleep-training-methods");
        assert_eq!(links[0].anchor, "gentle sleep");
    }

    #[test]
    fn test_propose_links_skips_self() {
        let targets = vec![LinkTarget {
            title: "Nap Scheduling Guide".to_string(),
            slug: "nap-scheduling-guide".to_string(),
        }];
        let body = "See our nap scheduling notes.";

        let links = EnrichmentStage::propose_links(body, &targets, "nap-scheduling-guide");

        assert!(links.is_empty());
    }

    #[test]
    fn test_propose_links_caps_count() {
        let targets: Vec<LinkTarget> = (0..5)
            .map(|i| LinkTarget {
                title: "common phrase here".to_string(),
                slug: format!("post-{}", i),
            })
            .collect();
        let body = "the common phrase here appears once";

        let links = EnrichmentStage::propose_links(body, &targets, "own");

        assert_eq!(links.len(), MAX_INTERNAL_LINKS);
    }

    #[test]
    fn test_link_index_replace_and_snapshot() {
        let index = LinkIndex::new();
        assert!(index.snapshot().is_empty());

        index.replace(vec![LinkTarget {
            title: "t".to_string(),
            slug: "t".to_string(),
        }]);

        assert_eq!(index.snapshot().len(), 1);
    }
}
