//! Configuration loading, validation, and management for the BlackRoad gateway.
//!
//! Loads configuration from `~/.blackroad/gateway.toml` with
//! `BLACKROAD_GATEWAY_*` environment variable overrides (environment wins).
//! Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.blackroad/gateway.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listener port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the agent permission policy document (JSON).
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    /// Path to the system prompt document (JSON).
    #[serde(default = "default_prompt_path")]
    pub prompt_path: PathBuf,

    /// Path to the JSONL access log.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Allow non-loopback clients on the introspection endpoints.
    #[serde(default)]
    pub allow_remote: bool,

    /// Directory holding the journal and context files.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: PathBuf,

    /// Upstream worlds stats feed proxied by `/v1/worlds`.
    #[serde(default = "default_worlds_url")]
    pub worlds_url: String,

    /// Per-provider-call deadline in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Provider-specific configurations.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8787
}
fn default_policy_path() -> PathBuf {
    PathBuf::from("policies/agent-permissions.json")
}
fn default_prompt_path() -> PathBuf {
    PathBuf::from("gateway/system-prompts.json")
}
fn default_log_path() -> PathBuf {
    PathBuf::from("gateway/logs/gateway.jsonl")
}
fn default_max_body_bytes() -> usize {
    1_048_576
}
fn default_memory_dir() -> PathBuf {
    dirs_home().join(".blackroad").join("gateway-memory")
}
fn default_worlds_url() -> String {
    "https://blackroad.io/api/worlds/stats".into()
}
fn default_provider_timeout_secs() -> u64 {
    30
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("policy_path", &self.policy_path)
            .field("prompt_path", &self.prompt_path)
            .field("log_path", &self.log_path)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("allow_remote", &self.allow_remote)
            .field("memory_dir", &self.memory_dir)
            .field("worlds_url", &self.worlds_url)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Settings for a single provider adapter.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; usually left unset in favor of the `<NAME>_API_KEY` env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from the default path with environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("gateway.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path. No environment overrides.
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

        Ok(config)
    }

    /// Apply `BLACKROAD_GATEWAY_*` environment overrides. Environment wins.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("BLACKROAD_GATEWAY_BIND") {
            self.bind = bind;
        }
        if let Some(port) = env_parsed("BLACKROAD_GATEWAY_PORT") {
            self.port = port;
        }
        if let Ok(path) = std::env::var("BLACKROAD_GATEWAY_POLICY_PATH") {
            self.policy_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BLACKROAD_GATEWAY_PROMPT_PATH") {
            self.prompt_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BLACKROAD_GATEWAY_LOG_PATH") {
            self.log_path = PathBuf::from(path);
        }
        if let Some(bytes) = env_parsed("BLACKROAD_GATEWAY_MAX_BODY_BYTES") {
            self.max_body_bytes = bytes;
        }
        if let Ok(val) = std::env::var("BLACKROAD_GATEWAY_ALLOW_REMOTE") {
            self.allow_remote = matches!(val.trim(), "1" | "true" | "yes");
        }
        if let Ok(path) = std::env::var("BLACKROAD_GATEWAY_MEMORY_DIR") {
            self.memory_dir = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("BLACKROAD_GATEWAY_WORLDS_URL") {
            self.worlds_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".blackroad")
    }

    /// Path to the journal file inside the memory directory.
    pub fn journal_path(&self) -> PathBuf {
        self.memory_dir.join("journal.jsonl")
    }

    /// Path to the context file inside the memory directory.
    pub fn context_path(&self) -> PathBuf {
        self.memory_dir.join("context.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationError("port must be non-zero".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_body_bytes must be positive".into(),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            policy_path: default_policy_path(),
            prompt_path: default_prompt_path(),
            log_path: default_log_path(),
            max_body_bytes: default_max_body_bytes(),
            allow_remote: false,
            memory_dir: default_memory_dir(),
            worlds_url: default_worlds_url(),
            provider_timeout_secs: default_provider_timeout_secs(),
            providers: HashMap::new(),
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
