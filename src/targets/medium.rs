//! Medium story import target
//!
//! Imports the post as an HTML story with the canonical URL pointing back
//! at the site, so search engines attribute the content correctly.

use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::traits::{DistributionTarget, PublishPayload, TargetAck};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public posts API
pub const DEFAULT_ENDPOINT: &str = "https://api.medium.com/v1/posts";

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    title: &'a str,
    #[serde(rename = "contentFormat")]
    content_format: &'static str,
    content: &'a str,
    #[serde(rename = "canonicalUrl")]
    canonical_url: &'a str,
    tags: &'a [String],
    #[serde(rename = "publishStatus")]
    publish_status: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatePostData,
}

#[derive(Debug, Deserialize)]
struct CreatePostData {
    url: Option<String>,
}

/// Story import client
pub struct MediumTarget {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    timeout: Duration,
}

impl MediumTarget {
    pub fn new(endpoint: Option<String>, token: SecretString, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl DistributionTarget for MediumTarget {
    fn name(&self) -> &str {
        "medium"
    }

    async fn publish(&self, payload: &PublishPayload) -> Result<TargetAck, StageError> {
        let request = CreatePostRequest {
            title: &payload.title,
            content_format: "html",
            content: &payload.body,
            canonical_url: &payload.canonical_url,
            tags: &payload.tags,
            publish_status: "public",
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

        let created: CreatePostResponse =
            response.json().await.map_err(|e| StageError::InvalidOutput {
                stage: self.name().to_string(),
                message: format!("malformed response: {}", e),
            })?;

        Ok(TargetAck {
            external_ref: created.data.url,
        })
    }
}
