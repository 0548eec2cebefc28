//! Pinterest pin creation target

use crate::core::error::{classify_http, classify_transport, StageError};
use crate::core::traits::{DistributionTarget, PublishPayload, TargetAck};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public pins API
pub const DEFAULT_ENDPOINT: &str = "https://api.pinterest.com/v5/pins";

/// Hashtags appended to every pin description
const PIN_HASHTAGS: &str = "#babysleep #parentingtips";

#[derive(Debug, Serialize)]
struct CreatePinRequest<'a> {
    link: &'a str,
    title: &'a str,
    description: String,
    board_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePinResponse {
    id: String,
}

/// Pin creation client
pub struct PinterestTarget {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    board_id: String,
    timeout: Duration,
}

impl PinterestTarget {
    pub fn new(
        endpoint: Option<String>,
        token: SecretString,
        board_id: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token,
            board_id,
            timeout,
        }
    }

    fn pin_description(description: &str) -> String {
        format!("{}\n\n{}", description, PIN_HASHTAGS)
    }
}

#[async_trait]
impl DistributionTarget for PinterestTarget {
    fn name(&self) -> &str {
        "pinterest"
    }

    async fn publish(&self, payload: &PublishPayload) -> Result<TargetAck, StageError> {
        let request = CreatePinRequest {
            link: &payload.canonical_url,
            title: &payload.title,
            description: Self::pin_description(&payload.description),
            board_id: &self.board_id,
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

        let pin: CreatePinResponse =
            response.json().await.map_err(|e| StageError::InvalidOutput {
                stage: self.name().to_string(),
                message: format!("malformed response: {}", e),
            })?;

        Ok(TargetAck {
            external_ref: Some(format!("https://www.pinterest.com/pin/{}", pin.id)),
        })
    }
}
