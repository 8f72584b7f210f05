//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when resolution yields none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Tool-calling loop limits
    #[serde(default)]
    pub tool_loop: ToolLoopConfig,

    /// Agent resolution and skill loading
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Context store backend
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Anthropic Messages API client
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Interactive tool approvals
    #[serde(default)]
    pub approval: ApprovalConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopConfig {
    /// Tool-use rounds allowed before the loop gives up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Identical calls allowed before one is reported as a loop
    #[serde(default = "default_max_duplicate_calls")]
    pub max_duplicate_calls: u32,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Model retried once when a completion fails with a retryable error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

fn default_max_iterations() -> u32 {
    15
}
fn default_max_duplicate_calls() -> u32 {
    3
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_duplicate_calls: default_max_duplicate_calls(),
            max_tokens: default_max_tokens(),
            fallback_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Agent used when no context rule selects one
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,

    /// Directory searched for `SKILL.md` files (default: ~/.concierge/skills)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_dir: Option<String>,

    /// How long a resolved agent configuration is cached
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_agent_id() -> String {
    "pm-assistant".into()
}
fn default_cache_ttl() -> u64 {
    60
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_agent_id: default_agent_id(),
            skills_dir: None,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl AgentsConfig {
    /// The effective skills directory.
    pub fn skills_path(&self) -> PathBuf {
        self.skills_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("skills"))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// "sqlite", "postgres" or "memory"
    #[serde(default = "default_database_backend")]
    pub backend: String,

    /// Connection URL (default for sqlite: ~/.concierge/concierge.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn default_database_backend() -> String {
    "sqlite".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: None,
        }
    }
}

impl DatabaseConfig {
    /// The effective connection URL.
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}",
                AppConfig::config_dir().join("concierge.db").display()
            ),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Seconds an approval may stay pending before it expires
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

fn default_approval_timeout() -> u64 {
    120
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Redact the password part of a connection URL.
fn redact_url(url: &Option<String>) -> Option<String> {
    url.as_ref().map(|u| match (u.find("://"), u.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let creds = &u[scheme_end + 3..at];
            match creds.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &u[..scheme_end + 3], user, &u[at..]),
                None => u.clone(),
            }
        }
        _ => u.clone(),
    })
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("url", &redact_url(&self.url))
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// Environment overrides:
    /// - `CONCIERGE_API_KEY`, then `ANTHROPIC_API_KEY` (when no key is configured)
    /// - `CONCIERGE_MODEL`
    /// - `CONCIERGE_DATABASE_URL`, then `DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.anthropic.api_key.is_none() {
            self.anthropic.api_key = var("CONCIERGE_API_KEY").or_else(|| var("ANTHROPIC_API_KEY"));
        }

        if let Some(model) = var("CONCIERGE_MODEL") {
            self.default_model = model;
        }

        if let Some(url) = var("CONCIERGE_DATABASE_URL").or_else(|| var("DATABASE_URL")) {
            if url.starts_with("postgres") {
                self.database.backend = "postgres".into();
            } else if url.starts_with("sqlite") {
                self.database.backend = "sqlite".into();
            }
            self.database.url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        if self.tool_loop.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "tool_loop.max_tokens must be > 0".into(),
            ));
        }

        match self.database.backend.as_str() {
            "sqlite" | "memory" => {}
            "postgres" => {
                if self.database.url.is_none() {
                    return Err(ConfigError::ValidationError(
                        "database.url is required for the postgres backend".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown database.backend '{other}' (expected sqlite, postgres or memory)"
                )));
            }
        }

        if self.agents.default_agent_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agents.default_agent_id must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.anthropic.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            tool_loop: ToolLoopConfig::default(),
            agents: AgentsConfig::default(),
            database: DatabaseConfig::default(),
            anthropic: AnthropicConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
