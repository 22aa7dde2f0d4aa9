//! Configuration types.
//!
//! A single TOML document is loaded at startup. Secrets are never stored in
//! the file: the Twitter token is read from the environment variable named
//! by `twitter.token_env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Full settings document.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub twitter: TwitterConfig,
    pub spam: ServiceConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub postprocess: PostProcessConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Loop tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Idle wait when a poll returns nothing (or a cycle was interrupted).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Attempts before a message that cannot be answered is abandoned. 0 = never.
    #[serde(default = "default_max_message_attempts")]
    pub max_message_attempts: u32,
    /// Cycles a message may stay behind on transient failures (send error,
    /// model unreachable) before it is abandoned. 0 = never.
    #[serde(default = "default_max_transient_attempts")]
    pub max_transient_attempts: u32,
    /// Consecutive failed fetches before the process gives up. 0 = never.
    #[serde(default = "default_max_consecutive_fetch_failures")]
    pub max_consecutive_fetch_failures: u32,
    /// Fixed reply sent to messages classified as spam.
    #[serde(default = "default_suppression_reply")]
    pub suppression_reply: String,
    /// Like every non-spam message we answer.
    #[serde(default = "default_true")]
    pub acknowledge_replies: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_message_attempts: default_max_message_attempts(),
            max_transient_attempts: default_max_transient_attempts(),
            max_consecutive_fetch_failures: default_max_consecutive_fetch_failures(),
            suppression_reply: default_suppression_reply(),
            acknowledge_replies: true,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_max_message_attempts() -> u32 {
    3
}
fn default_max_transient_attempts() -> u32 {
    10
}
fn default_max_consecutive_fetch_failures() -> u32 {
    10
}
fn default_suppression_reply() -> String {
    "....".to_string()
}
fn default_true() -> bool {
    true
}

/// Outbound account identity and API access.
#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Numeric id of the account we reply as.
    pub user_id: String,
    /// Handle of the account we reply as (without `@`).
    pub username: String,
    /// Environment variable holding the user-context bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TwitterConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn bearer_token(&self) -> Result<SecretString, ConfigError> {
        std::env::var(&self.token_env)
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(self.token_env.clone()))
    }
}

fn default_api_base() -> String {
    "https://api.twitter.com/2".to_string()
}
fn default_token_env() -> String {
    "TWITTER_BEARER_TOKEN".to_string()
}
fn default_max_results() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// A model service reachable over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub endpoint: String,
    /// Matches scoring below this are treated as no match.
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub endpoint: String,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: u32,
    #[serde(default = "default_max_length")]
    pub max_length: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_num_candidates() -> u32 {
    1
}
fn default_max_length() -> u32 {
    256
}
fn default_generation_timeout_secs() -> u64 {
    120
}

/// Post-processing data (consumed by the post-processor, not the loop).
#[derive(Debug, Clone, Deserialize)]
pub struct PostProcessConfig {
    /// Protected terms; their first listed spelling is restored in replies.
    #[serde(default)]
    pub special_tokens: Vec<String>,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    #[serde(default = "default_true")]
    pub mention_recipient: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            special_tokens: Vec::new(),
            max_reply_chars: default_max_reply_chars(),
            mention_recipient: true,
        }
    }
}

fn default_max_reply_chars() -> usize {
    280
}

/// Where the cursor lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CursorBackend {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorConfig {
    #[serde(default)]
    pub backend: CursorBackend,
    #[serde(default = "default_cursor_path")]
    pub path: PathBuf,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            backend: CursorBackend::File,
            path: default_cursor_path(),
        }
    }
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("./data/last_seen_id.txt")
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// libSQL database for durable audit records (and optionally the cursor).
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Print each audit record as a JSON line on stdout.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { console: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Daily-rolling log files are written here when set.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Runtime knobs for the orchestrator, derived from `AgentConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub idle_interval: Duration,
    pub max_message_attempts: u32,
    pub max_transient_attempts: u32,
    pub max_consecutive_fetch_failures: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for OrchestratorConfig {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            idle_interval: Duration::from_secs(agent.poll_interval_secs),
            max_message_attempts: agent.max_message_attempts,
            max_transient_attempts: agent.max_transient_attempts,
            max_consecutive_fetch_failures: agent.max_consecutive_fetch_failures,
        }
    }
}

/// Fixed per-message reply policy, derived from `AgentConfig` and
/// `GenerationConfig`.
#[derive(Debug, Clone)]
pub struct ReplySettings {
    pub suppression_reply: String,
    pub num_candidates: u32,
    pub max_length: u32,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            suppression_reply: default_suppression_reply(),
            num_candidates: default_num_candidates(),
            max_length: default_max_length(),
        }
    }
}

impl AppConfig {
    /// Load and validate the settings document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a settings document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, endpoint) in [
            ("spam.endpoint", &self.spam.endpoint),
            ("retrieval.endpoint", &self.retrieval.endpoint),
            ("generation.endpoint", &self.generation.endpoint),
            ("twitter.api_base", &self.twitter.api_base),
        ] {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: key.to_string(),
                    hint: "Set a base URL such as http://localhost:8000".to_string(),
                });
            }
        }

        if self.twitter.user_id.trim().is_empty() || self.twitter.username.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "twitter.user_id / twitter.username".to_string(),
                hint: "The account identity used for replies and likes".to_string(),
            });
        }

        if self.agent.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.poll_interval_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.generation.num_candidates == 0 || self.generation.max_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "generation".to_string(),
                message: "num_candidates and max_length must be positive".to_string(),
            });
        }

        if self.twitter.max_results < 5 || self.twitter.max_results > 100 {
            return Err(ConfigError::InvalidValue {
                key: "twitter.max_results".to_string(),
                message: "must be between 5 and 100".to_string(),
            });
        }

        if self.cursor.backend == CursorBackend::Database && self.store.database_path.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "store.database_path".to_string(),
                hint: "cursor.backend = \"database\" needs a database".to_string(),
            });
        }

        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::from(&self.agent)
    }

    pub fn reply_settings(&self) -> ReplySettings {
        ReplySettings {
            suppression_reply: self.agent.suppression_reply.clone(),
            num_candidates: self.generation.num_candidates,
            max_length: self.generation.max_length,
        }
    }
}
