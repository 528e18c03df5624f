//! Pipeline configuration
//!
//! Loaded from a TOML file (`$PIPELINE_CONFIG`, falling back to
//! `pipeline.toml` in the working directory) with every section defaulted, then
//! overridden by environment variables for endpoints and secrets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Environment variable pointing at the config file
pub const CONFIG_PATH_ENV: &str = "PIPELINE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub recommendation: RecommendationWeights,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Optional TOML file replacing the built-in stage graph
    #[serde(default)]
    pub graph_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_chat_base_url")]
    pub chat_base_url: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_workflow_base_url")]
    pub workflow_base_url: String,
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Legacy behaviour: also retry explicit rejections from the stage service
    #[serde(default)]
    pub retry_domain_errors: bool,
}

fn default_chat_base_url() -> String {
    "http://localhost:8600/v1".to_string()
}

fn default_workflow_base_url() -> String {
    "http://localhost:8600/v1".to_string()
}

fn default_chat_timeout_secs() -> u64 {
    30
}

fn default_workflow_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chat_base_url: default_chat_base_url(),
            chat_timeout_secs: default_chat_timeout_secs(),
            workflow_base_url: default_workflow_base_url(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            api_key: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_domain_errors: false,
        }
    }
}

impl GatewayConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Scoring policy for next-step recommendations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationWeights {
    #[serde(default = "default_base")]
    pub base: f64,
    #[serde(default = "default_success_bonus")]
    pub success_bonus: f64,
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
}

fn default_base() -> f64 {
    0.7
}

fn default_success_bonus() -> f64 {
    0.2
}

fn default_low_threshold() -> f64 {
    0.5
}

fn default_high_threshold() -> f64 {
    0.8
}

impl Default for RecommendationWeights {
    fn default() -> Self {
        Self {
            base: default_base(),
            success_bonus: default_success_bonus(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Response-time samples kept for percentile computation
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    /// Prior outputs kept per node when a stage is regenerated
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Usage events kept in memory across all (node, session) logs
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Finished-session records kept in memory
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
}

fn default_sample_capacity() -> usize {
    1000
}

fn default_history_limit() -> usize {
    5
}

fn default_event_capacity() -> usize {
    100_000
}

fn default_session_capacity() -> usize {
    10_000
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            sample_capacity: default_sample_capacity(),
            history_limit: default_history_limit(),
            event_capacity: default_event_capacity(),
            session_capacity: default_session_capacity(),
        }
    }
}

/// Expiry of live sessions that never exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// A live session untouched for this long is closed with a timeout exit
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl PipelineConfig {
    /// Resolve the config file path from the environment
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from file, or return defaults if not found.
    /// Environment overrides are applied in both cases.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = Self::config_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            PipelineConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("STAGE_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.gateway.api_key = Some(key);
        }
        if let Some(url) = lookup("STAGE_CHAT_BASE_URL") {
            self.gateway.chat_base_url = url;
        }
        if let Some(url) = lookup("STAGE_WORKFLOW_BASE_URL") {
            self.gateway.workflow_base_url = url;
        }
        if let Some(retries) = lookup("STAGE_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.gateway.max_retries = retries;
        }
        if let Some(path) = lookup("PIPELINE_GRAPH") {
            self.graph_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = &self.recommendation;
        if weights.low_threshold > weights.high_threshold {
            return Err(ConfigError::Invalid(format!(
                "recommendation.low_threshold ({}) exceeds high_threshold ({})",
                weights.low_threshold, weights.high_threshold
            )));
        }
        if self.usage.sample_capacity == 0 {
            return Err(ConfigError::Invalid(
                "usage.sample_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
