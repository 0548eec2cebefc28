//! Publish-to-site target
//!
//! Pushes the finished post to the site's content API. The site reports an
//! existing slug with 409, which the pipeline treats as already published.

use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::traits::{DistributionTarget, PublishPayload, TargetAck};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SitePostRequest<'a> {
    title: &'a str,
    slug: &'a str,
    description: &'a str,
    body: &'a str,
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SitePostResponse {
    url: Option<String>,
}

/// Content API client for the web property itself
pub struct SiteTarget {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    timeout: Duration,
}

impl SiteTarget {
    pub fn new(endpoint: String, token: SecretString, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
            timeout,
        }
    }
}

#[async_trait]
impl DistributionTarget for SiteTarget {
    fn name(&self) -> &str {
        "site"
    }

    async fn publish(&self, payload: &PublishPayload) -> Result<TargetAck, StageError> {
        let request = SitePostRequest {
            title: &payload.title,
            slug: &payload.slug,
            description: &payload.description,
            body: &payload.body,
            tags: &payload.tags,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .bearer_auth(self.token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(self.name(), &e, self.timeout.as_millis() as u64))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http(self.name(), status.as_u16(), &body));
        }

        let parsed: SitePostResponse = response.json().await.unwrap_or(SitePostResponse {
            url: None,
        });

        Ok(TargetAck {
            external_ref: parsed.url.or_else(|| Some(payload.canonical_url.clone())),
        })
    }
}
