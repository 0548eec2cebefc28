//! Content source stage
//!
//! Asks the draft generation service for a title and body for the item's
//! topic. The service is an opaque capability; only its request/response
//! contract matters here.

use crate::core::config::ServiceEndpoint;
use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::item::{ContentItem, Draft, StageKind};
use crate::core::traits::{Stage, StageOutput, StageResult};
use crate::security::TokenManager;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    topic: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    title: String,
    body: String,
}

/// HTTP-backed draft generator
pub struct SourceStage {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl SourceStage {
    pub fn new(service: &ServiceEndpoint, timeout: Duration) -> Self {
        let api_key = service
            .api_key_env
            .as_deref()
            .and_then(TokenManager::token_from_env);

        Self {
            client: reqwest::Client::new(),
            endpoint: service.endpoint.clone(),
            api_key,
            timeout,
        }
    }

    fn validate_draft(title: &str, body: &str) -> Result<(), StageError> {
        let stage = StageKind::Source.as_str();

        if title.trim().is_empty() {
            return Err(StageError::InvalidOutput {
                stage: stage.to_string(),
                message: "service returned an empty title".to_string(),
            });
        }
        if body.trim().is_empty() {
            return Err(StageError::InvalidOutput {
                stage: stage.to_string(),
                message: "service returned an empty body".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Stage for SourceStage {
    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    async fn apply(&self, item: &ContentItem) -> StageResult {
        let stage = self.kind().as_str();
        let timeout_ms = self.timeout.as_millis() as u64;

        let request = GenerateRequest { topic: &item.topic };
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

        let generated: GenerateResponse =
            response.json().await.map_err(|e| StageError::InvalidOutput {
                stage: stage.to_string(),
                message: format!("malformed response: {}", e),
            })?;

        Self::validate_draft(&generated.title, &generated.body)?;

        Ok(StageOutput::Draft(Draft {
            title: generated.title,
            body: generated.body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_draft_accepts_content() {
        assert!(SourceStage::validate_draft(
            "A Gentle Newborn Sleep Schedule",
            "<p>Sleep comes in cycles.</p>"
        )
        .is_ok());
    }

    #[test]
    fn test_validate_draft_rejects_empty_title() {
        let result = SourceStage::validate_draft("  ", "<p>body</p>");

        assert!(matches!(
            result,
            Err(StageError::InvalidOutput { ref message, .. }) if message.contains("title")
        ));
    }

    #[test]
    fn test_validate_draft_rejects_empty_body() {
        let result = SourceStage::validate_draft("Title", "");

        assert!(matches!(
            result,
            Err(StageError::InvalidOutput { ref message, .. }) if message.contains("body")
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            topic: "newborn sleep schedule",
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"topic":"newborn sleep schedule"}"#);
    }
}
