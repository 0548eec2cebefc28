//! Token manager with memory-safe handling and masking
//!
//! Distribution target credentials are read from environment variables and
//! wrapped in `secrecy` types to prevent accidental exposure in logs.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;

/// Distribution targets with their credential environment variables
const TARGET_TOKENS: &[(&str, &str)] = &[
    ("site", "SITE_API_TOKEN"),
    ("pinterest", "PINTEREST_ACCESS_TOKEN"),
    ("reddit", "REDDIT_ACCESS_TOKEN"),
    ("medium", "MEDIUM_INTEGRATION_TOKEN"),
];

/// Credential manager for distribution targets and stage services
#[derive(Default)]
pub struct TokenManager {
    target_map: HashMap<String, String>,
}

impl TokenManager {
    /// Create a new TokenManager with the default target mappings
    pub fn new() -> Self {
        let target_map = TARGET_TOKENS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self { target_map }
    }

    /// Retrieve a target's token from the environment
    ///
    /// Returns `None` if the target is unknown or the variable is not set.
    pub fn get_token(&self, target_name: &str) -> Option<SecretString> {
        let token_name = self.target_map.get(target_name)?;
        Self::token_from_env(token_name)
    }

    /// Read an arbitrary credential environment variable
    ///
    /// Used for stage service API keys whose variable name comes from
    /// configuration rather than the fixed target table.
    pub fn token_from_env(var_name: &str) -> Option<SecretString> {
        let value = env::var(var_name).ok()?;
        if value.is_empty() {
            return None;
        }
        Some(SecretString::new(value.into()))
    }

    /// Check whether a token is set for the target
    pub fn has_token(&self, target_name: &str) -> bool {
        self.get_token(target_name).is_some()
    }

    /// Environment variable name for a target
    pub fn token_name(&self, target_name: &str) -> Option<&str> {
        self.target_map.get(target_name).map(|s| s.as_str())
    }

    /// Mask a token for safe display
    ///
    /// Shows only the first 3 and last 3 characters; tokens shorter than 10
    /// characters are fully masked.
    pub fn mask_token(token: &str) -> String {
        if token.len() < 10 {
            return "****".to_string();
        }

        let prefix = &token[..3];
        let suffix = &token[token.len() - 3..];
        format!("{}...{}", prefix, suffix)
    }
}
