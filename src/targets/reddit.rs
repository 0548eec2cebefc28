//! Reddit text post target
//!
//! Submits a self post to the configured subreddit through the OAuth API.
//! Reddit reports submission problems inside a 200 response, so the error
//! array is inspected explicitly.

use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::traits::{DistributionTarget, PublishPayload, TargetAck};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// OAuth submit API
pub const DEFAULT_ENDPOINT: &str = "https://oauth.reddit.com/api/submit";

const USER_AGENT: &str = "content-autopilot/0.1";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    json: SubmitJson,
}

#[derive(Debug, Deserialize)]
struct SubmitJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    url: Option<String>,
}

/// Self-post submission client
pub struct RedditTarget {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    subreddit: String,
    timeout: Duration,
}

impl RedditTarget {
    pub fn new(
        endpoint: Option<String>,
        token: SecretString,
        subreddit: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token,
            subreddit,
            timeout,
        }
    }

    /// Value-first text body; the article link sits below the summary
    fn post_text(payload: &PublishPayload) -> String {
        format!(
            "{}\n\nFull write-up: {}",
            payload.description, payload.canonical_url
        )
    }

    fn first_error_code(errors: &[Vec<serde_json::Value>]) -> Option<String> {
        errors
            .first()
            .and_then(|error| error.first())
            .and_then(|code| code.as_str())
            .map(String::from)
    }
}

#[async_trait]
impl DistributionTarget for RedditTarget {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn publish(&self, payload: &PublishPayload) -> Result<TargetAck, StageError> {
        let text = Self::post_text(payload);
        let form = [
            ("sr", self.subreddit.as_str()),
            ("kind", "self"),
            ("title", payload.title.as_str()),
            ("text", text.as_str()),
            ("api_type", "json"),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_transport(self.name(), &e, self.timeout.as_millis() as u64))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http(self.name(), status.as_u16(), &body));
        }

        let submitted: SubmitResponse =
            response.json().await.map_err(|e| StageError::InvalidOutput {
                stage: self.name().to_string(),
                message: format!("malformed response: {}", e),
            })?;

        if !submitted.json.errors.is_empty() {
            let code = Self::first_error_code(&submitted.json.errors)
                .unwrap_or_else(|| "unknown error".to_string());

            if code == "ALREADY_SUB" {
                return Err(StageError::AlreadyPublished {
                    target: self.name().to_string(),
                    reference: None,
                });
            }
            if code == "RATELIMIT" {
                return Err(StageError::RateLimited {
                    stage: self.name().to_string(),
                });
            }
            return Err(StageError::InvalidOutput {
                stage: self.name().to_string(),
                message: code,
            });
        }

        Ok(TargetAck {
            external_ref: submitted.json.data.and_then(|data| data.url),
        })
    }
}
