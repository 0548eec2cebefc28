//! Target loader
//!
//! Builds the enabled distribution target set from configuration, failing
//! fast when an enabled target's credential is not in the environment.

use crate::core::config::AutomationConfig;
use crate::core::error::ConfigError;
use crate::core::traits::DistributionTarget;
use crate::security::TokenManager;
use crate::targets::{MediumTarget, PinterestTarget, RedditTarget, SiteTarget};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported distribution targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Site,
    Pinterest,
    Reddit,
    Medium,
}

impl TargetKind {
    /// Get string representation of the target
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Site => "site",
            TargetKind::Pinterest => "pinterest",
            TargetKind::Reddit => "reddit",
            TargetKind::Medium => "medium",
        }
    }
}

/// Builds distribution targets from configuration
pub struct TargetLoader;

impl TargetLoader {
    /// Instantiate every enabled target, in a fixed order
    pub fn load_enabled(
        config: &AutomationConfig,
        tokens: &TokenManager,
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn DistributionTarget>>, ConfigError> {
        let mut targets: Vec<Arc<dyn DistributionTarget>> = Vec::new();

        if let Some(site) = &config.targets.site
            && site.enabled.unwrap_or(true)
        {
            let token = Self::require_token(tokens, TargetKind::Site)?;
            targets.push(Arc::new(SiteTarget::new(
                site.endpoint.clone(),
                token,
                timeout,
            )));
        }

        if let Some(pinterest) = &config.targets.pinterest
            && pinterest.enabled.unwrap_or(true)
        {
            let token = Self::require_token(tokens, TargetKind::Pinterest)?;
            targets.push(Arc::new(PinterestTarget::new(
                pinterest.endpoint.clone(),
                token,
                pinterest.board_id.clone(),
                timeout,
            )));
        }

        if let Some(reddit) = &config.targets.reddit
            && reddit.enabled.unwrap_or(true)
        {
            let token = Self::require_token(tokens, TargetKind::Reddit)?;
            targets.push(Arc::new(RedditTarget::new(
                reddit.endpoint.clone(),
                token,
                reddit.subreddit.clone(),
                timeout,
            )));
        }

        if let Some(medium) = &config.targets.medium
            && medium.enabled.unwrap_or(true)
        {
            let token = Self::require_token(tokens, TargetKind::Medium)?;
            targets.push(Arc::new(MediumTarget::new(
                medium.endpoint.clone(),
                token,
                timeout,
            )));
        }

        Ok(targets)
    }

    fn require_token(
        tokens: &TokenManager,
        kind: TargetKind,
    ) -> Result<SecretString, ConfigError> {
        let name = kind.as_str();
        tokens
            .get_token(name)
            .ok_or_else(|| ConfigError::MissingCredential {
                target: name.to_string(),
                env_var: tokens
                    .token_name(name)
                    .unwrap_or("<unknown>")
                    .to_string(),
            })
    }
}
