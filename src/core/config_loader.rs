//! Configuration file loader for content-autopilot
//!
//! Loads the YAML configuration once at process start, applies environment
//! overrides, and validates it before the orchestrator touches any item.

use crate::core::config::AutomationConfig;
use crate::core::error::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default configuration file name
pub const CONFIG_FILENAME: &str = ".content-autopilot.yaml";

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Explicit configuration file path; errors if missing
    pub path: Option<PathBuf>,

    /// Environment variables (injected for testability)
    pub env: HashMap<String, String>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "targets.pinterest.boardId")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file and environment
    ///
    /// Priority (high to low): environment overrides, configuration file,
    /// default values. A missing default-named file falls back to defaults;
    /// a missing explicitly-passed file is an error.
    pub async fn load(options: ConfigLoadOptions) -> Result<AutomationConfig, ConfigError> {
        let mut config = match &options.path {
            Some(path) => Self::read_config_file(path).await?,
            None => {
                let default_path = Path::new(CONFIG_FILENAME);
                if default_path.exists() {
                    Self::read_config_file(default_path).await?
                } else {
                    AutomationConfig::default()
                }
            }
        };

        Self::apply_env_overrides(&mut config, &options.env)?;

        Ok(config)
    }

    async fn read_config_file(path: &Path) -> Result<AutomationConfig, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Unreadable {
                message: format!("{}: {}", path.display(), e),
            })?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Unreadable {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Apply recognized environment overrides
    fn apply_env_overrides(
        config: &mut AutomationConfig,
        env: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = env.get("AUTOPILOT_BATCH_SIZE") {
            config.pipeline.batch_size =
                raw.parse().map_err(|_| ConfigError::Invalid {
                    field: "AUTOPILOT_BATCH_SIZE".to_string(),
                    message: format!("not a number: {}", raw),
                })?;
        }

        if let Some(raw) = env.get("AUTOPILOT_WORKER_POOL_SIZE") {
            config.pipeline.worker_pool_size =
                raw.parse().map_err(|_| ConfigError::Invalid {
                    field: "AUTOPILOT_WORKER_POOL_SIZE".to_string(),
                    message: format!("not a number: {}", raw),
                })?;
        }

        if let Some(dir) = env.get("AUTOPILOT_STATE_DIR") {
            config.pipeline.state_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate configuration; the orchestrator refuses an invalid one
    pub fn validate(config: &AutomationConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();

        if config.pipeline.batch_size == 0 {
            errors.push(ConfigValidationError {
                field: "pipeline.batchSize".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if config.pipeline.worker_pool_size == 0 {
            errors.push(ConfigValidationError {
                field: "pipeline.workerPoolSize".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if config.retry.max_attempts == 0 {
            errors.push(ConfigValidationError {
                field: "retry.maxAttempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if config.services.generator.endpoint.is_empty() {
            errors.push(ConfigValidationError {
                field: "services.generator.endpoint".to_string(),
                message: "content source endpoint is required".to_string(),
            });
        }

        if config.services.enrichment.endpoint.is_empty() {
            errors.push(ConfigValidationError {
                field: "services.enrichment.endpoint".to_string(),
                message: "enrichment endpoint is required".to_string(),
            });
        }

        if config.monetization.policies.is_empty() {
            errors.push(ConfigValidationError {
                field: "monetization.policies".to_string(),
                message: "at least one tag policy is required".to_string(),
            });
        }

        for (tag, policy) in &config.monetization.policies {
            if policy.affiliate_program.is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("monetization.policies.{}.affiliateProgram", tag),
                    message: "affiliate program is required".to_string(),
                });
            }
        }

        if let Some(site) = &config.targets.site
            && site.enabled.unwrap_or(true)
            && site.endpoint.is_empty()
        {
            errors.push(ConfigValidationError {
                field: "targets.site.endpoint".to_string(),
                message: "endpoint is required for the site target".to_string(),
            });
        }

        if let Some(pinterest) = &config.targets.pinterest
            && pinterest.enabled.unwrap_or(true)
            && pinterest.board_id.is_empty()
        {
            errors.push(ConfigValidationError {
                field: "targets.pinterest.boardId".to_string(),
                message: "board id is required for the pinterest target".to_string(),
            });
        }

        if let Some(reddit) = &config.targets.reddit
            && reddit.enabled.unwrap_or(true)
            && reddit.subreddit.is_empty()
        {
            errors.push(ConfigValidationError {
                field: "targets.reddit.subreddit".to_string(),
                message: "subreddit is required for the reddit target".to_string(),
            });
        }

        if let Some(schedule) = &config.schedule
            && chrono::NaiveTime::parse_from_str(&schedule.daily_at, "%H:%M").is_err()
        {
            errors.push(ConfigValidationError {
                field: "schedule.dailyAt".to_string(),
                message: format!("expected HH:MM, got {}", schedule.daily_at),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Promote the first validation error into a fatal configuration error
    pub fn ensure_valid(config: &AutomationConfig) -> Result<(), ConfigError> {
        let result = Self::validate(config);
        match result.errors.into_iter().next() {
            None => Ok(()),
            Some(error) => Err(ConfigError::Invalid {
                field: error.field,
                message: error.message,
            }),
        }
    }

    /// Format validation result as a human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        lines.join("\n")
    }
}
