use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    /// Additional pool members tried after `model`, in order.
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

impl ModelConfig {
    /// Same provider settings pointed at another model id.
    pub fn with_model(&self, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            ..self.clone()
        }
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Which block's output becomes the top-level `result` string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// Last completed block without outgoing connections.
    #[default]
    LastSink,
    /// Blocks flagged `isOutput`, falling back to `LastSink`.
    DesignatedOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_block_timeout")]
    pub default_block_timeout_secs: u64,
    #[serde(default = "default_max_block_timeout")]
    pub max_block_timeout_secs: u64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Capacity of the bounded progress channel.
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
    #[serde(default)]
    pub result_policy: ResultPolicy,
    #[serde(default)]
    pub checker: CheckerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_block_timeout_secs: default_block_timeout(),
            max_block_timeout_secs: default_max_block_timeout(),
            max_tool_rounds: default_max_tool_rounds(),
            update_buffer: default_update_buffer(),
            result_policy: ResultPolicy::default(),
            checker: CheckerConfig::default(),
        }
    }
}

fn default_block_timeout() -> u64 { 30 }
fn default_max_block_timeout() -> u64 { 60 }
fn default_max_tool_rounds() -> usize { 5 }
fn default_update_buffer() -> usize { 100 }

/// Block checker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Model used when a run does not name one.
    #[serde(default = "default_checker_model")]
    pub default_model_id: String,
    /// A negative verdict fails the block instead of adding a warning.
    #[serde(default)]
    pub authoritative: bool,
    #[serde(default = "default_checker_timeout")]
    pub timeout_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            default_model_id: default_checker_model(),
            authoritative: false,
            timeout_secs: default_checker_timeout(),
        }
    }
}

fn default_checker_model() -> String { "gpt-4o-mini".to_string() }
fn default_checker_timeout() -> u64 { 15 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    /// Identity runs started with this key execute as.
    pub user_id: String,
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Runs allowed per user per UTC day; -1 disables the limit.
    #[serde(default = "default_max_executions")]
    pub max_executions_per_day: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_executions_per_day: default_max_executions(),
        }
    }
}

fn default_max_executions() -> i64 { -1 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.weft/weft.db".to_string() }

/// A credential entry served by the config-backed resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub user_id: String,
    pub integration_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse TOML text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Config built from `OPENAI_API_KEY` / `WEFT_MODEL` when no file exists.
    pub fn from_env() -> Self {
        let model_id = std::env::var("WEFT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Self {
            model: ModelConfig {
                provider: default_provider(),
                model_id,
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                base_url: None,
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                retry: None,
            },
            fallback_models: vec![],
            engine: EngineConfig::default(),
            gateway: GatewayConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreConfig::default(),
            credentials: vec![],
        }
    }

    /// Default config location (`~/.weft/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".weft").join("config.toml"))
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
