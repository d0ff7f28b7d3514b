//! TOML Configuration File Support
//!
//! Centralized configuration loading for the dispatch stack, from a TOML file
//! at `~/.config/agent-dispatch/dispatch.toml` plus environment overrides.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `<NAME>_API_KEY` (or the backend's `api_key_env`) | API key when the file has none |
//! | `LLM_<NAME>_WEIGHT` | positive weight override |
//! | `<NAME>_MODEL` | model override |
//! | `DISPATCH_RATE_CAPACITY` | token bucket capacity |
//! | `DISPATCH_RATE_REFILL` | token bucket refill rate |
//! | `DISPATCH_CACHE_TTL_SECS` | decision cache TTL |
//!
//! `<NAME>` is the backend name upper-cased with `-` replaced by `_`.
//!
//! # Example Configuration
//!
//! ```toml
//! [[backends]]
//! name = "groq"
//! protocol = "openai"
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama-3.1-8b-instant"
//! weight = 3
//!
//! [[backends]]
//! name = "gemini"
//! protocol = "gemini"
//! weight = 1
//!
//! [overrides]
//! "npc-boss" = "gemini"
//!
//! [cache]
//! max_size = 100
//! ttl_secs = 10
//! grid_size = 50
//!
//! [rate_limit]
//! capacity = 5.0
//! refill_rate = 1.0
//!
//! [retry]
//! max_retries = 2
//! initial_backoff_ms = 1000
//!
//! [batch]
//! call_timeout_secs = 25
//! actions = ["move", "challenge", "talk", "taunt", "wait", "explore"]
//!
//! [diagnostics]
//! trace_path = "/var/log/agent-dispatch/calls.jsonl"
//! recent_capacity = 100
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendDescriptor, Protocol};
use crate::decision::{
    ActionVocabulary, BatchConfig, PromptBuilder, DEFAULT_GRID_SIZE, DEFAULT_MAX_SIZE, DEFAULT_TTL,
};
use crate::diagnostics::DEFAULT_RECENT_CAPACITY;
use crate::routing::RouterConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// One `[[backends]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Unique name
    pub name: Option<String>,
    /// `openai` or `gemini`
    pub protocol: Option<Protocol>,
    /// Endpoint root
    pub base_url: Option<String>,
    /// Inline API key
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Relative traffic share
    pub weight: Option<i64>,
    /// Whether the backend is used
    pub enabled: Option<bool>,
}

/// `[cache]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Maximum entries
    pub max_size: Option<usize>,
    /// Entry lifetime in seconds
    pub ttl_secs: Option<u64>,
    /// Fingerprint grid cell size
    pub grid_size: Option<u32>,
}

/// `[rate_limit]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitToml {
    /// Burst capacity
    pub capacity: Option<f64>,
    /// Tokens per second
    pub refill_rate: Option<f64>,
}

/// `[retry]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Extra attempts on the selected backend
    pub max_retries: Option<u32>,
    /// First backoff in milliseconds
    pub initial_backoff_ms: Option<u64>,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: Option<u64>,
    /// Backoff growth factor
    pub backoff_multiplier: Option<f32>,
    /// Add jitter to backoff
    pub use_jitter: Option<bool>,
    /// Try other backends after the selected one gives up
    pub fallback_on_failure: Option<bool>,
}

/// `[batch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchToml {
    /// Bound on one combined call in seconds
    pub call_timeout_secs: Option<u64>,
    /// Output tokens for any batch
    pub base_tokens: Option<u32>,
    /// Extra output tokens per agent
    pub tokens_per_agent: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Permitted action names
    pub actions: Option<Vec<String>>,
}

/// `[diagnostics]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsToml {
    /// JSON-lines trace file
    pub trace_path: Option<String>,
    /// Traces kept in memory
    pub recent_capacity: Option<usize>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Backend pool
    pub backends: Vec<BackendToml>,
    /// Agent id to backend name
    pub overrides: BTreeMap<String, String>,
    /// Decision cache
    pub cache: CacheToml,
    /// Admission control
    pub rate_limit: RateLimitToml,
    /// Retry policy
    pub retry: RetryToml,
    /// Batch aggregation
    pub batch: BatchToml,
    /// Trace sinks
    pub diagnostics: DiagnosticsToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// A backend with its resolved credentials
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSettings {
    /// Static description
    pub descriptor: BackendDescriptor,
    /// Environment variable consulted for the key
    pub api_key_env: String,
    /// Resolved key; `None` means the backend will be skipped
    pub api_key: Option<String>,
}

/// Decision cache settings
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSettings {
    /// Maximum entries
    pub max_size: usize,
    /// Entry lifetime
    pub ttl: Duration,
    /// Fingerprint grid cell size
    pub grid_size: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            ttl: DEFAULT_TTL,
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

/// Trace sink settings
#[derive(Clone, Debug, PartialEq)]
pub struct DiagnosticsSettings {
    /// JSON-lines trace file, if any
    pub trace_path: Option<PathBuf>,
    /// Traces kept in memory
    pub recent_capacity: usize,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            trace_path: None,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Backend pool in declaration order
    pub backends: Vec<BackendSettings>,
    /// Agent id to backend name
    pub overrides: BTreeMap<String, String>,
    /// Decision cache
    pub cache: CacheSettings,
    /// Retry and admission
    pub router: RouterConfig,
    /// Batch aggregation
    pub batch: BatchConfig,
    /// Permitted actions
    pub actions: ActionVocabulary,
    /// Trace sinks
    pub diagnostics: DiagnosticsSettings,
    /// File the configuration was read from
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            overrides: BTreeMap::new(),
            cache: CacheSettings::default(),
            router: RouterConfig::default(),
            batch: BatchConfig::default(),
            actions: ActionVocabulary::default(),
            diagnostics: DiagnosticsSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DispatchConfig {
    /// Where the configuration came from
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Prompt builder for the configured action vocabulary
    pub fn prompt_builder(&self) -> PromptBuilder {
        PromptBuilder::new(self.actions.clone())
    }

    /// Check values the stack cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        let admission = &self.router.admission;
        if !(admission.capacity.is_finite() && admission.capacity > 0.0) {
            return invalid(format!("rate_limit.capacity must be positive, got {}", admission.capacity));
        }
        if !(admission.refill_rate.is_finite() && admission.refill_rate > 0.0) {
            return invalid(format!(
                "rate_limit.refill_rate must be positive, got {}",
                admission.refill_rate
            ));
        }
        if self.cache.max_size == 0 {
            return invalid("cache.max_size must be at least 1".to_string());
        }
        if self.cache.grid_size == 0 {
            return invalid("cache.grid_size must be at least 1".to_string());
        }
        if self.batch.call_timeout.is_zero() {
            return invalid("batch.call_timeout_secs must be at least 1".to_string());
        }
        if self.actions.names().is_empty() {
            return invalid("batch.actions must name at least one action".to_string());
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            let name = &backend.descriptor.name;
            if name.trim().is_empty() {
                return invalid("backend name must not be empty".to_string());
            }
            if !names.insert(name.as_str()) {
                return invalid(format!("duplicate backend name: {name}"));
            }
        }
        for (agent, backend) in &self.overrides {
            if !names.contains(backend.as_str()) {
                return invalid(format!("override for {agent} names unknown backend {backend}"));
            }
        }
        Ok(())
    }
}

/// Environment variable prefix derived from a backend name
pub fn env_name(backend: &str) -> String {
    backend.to_uppercase().replace('-', "_")
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/agent-dispatch/dispatch.toml`, typically
/// `~/.config/agent-dispatch/dispatch.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agent-dispatch").join("dispatch.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result fails validation.
pub fn load_config() -> Result<DispatchConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// A missing file is not an error (defaults are used).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the result
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatchConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, resolving environment variables through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<DispatchConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut toml_config = DispatchToml::default();
    let mut config = DispatchConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            toml_config = toml::from_str(&toml_content)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_toml_config(&mut config, &toml_config)?;
    apply_env_config(&mut config, &env);
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut DispatchConfig, toml: &DispatchToml) -> Result<(), ConfigError> {
    for (index, entry) in toml.backends.iter().enumerate() {
        let name = entry.name.clone().ok_or_else(|| {
            ConfigError::ValidationError(format!("backends[{index}] is missing a name"))
        })?;
        let protocol = entry.protocol.unwrap_or(Protocol::OpenAi);
        let mut descriptor = BackendDescriptor::new(
            name.clone(),
            protocol,
            entry.base_url.clone().unwrap_or_default(),
            entry.model.clone().unwrap_or_default(),
        )
        .with_weight(entry.weight.unwrap_or(1));
        descriptor.enabled = entry.enabled.unwrap_or(true);

        config.backends.push(BackendSettings {
            descriptor,
            api_key_env: entry
                .api_key_env
                .clone()
                .unwrap_or_else(|| format!("{}_API_KEY", env_name(&name))),
            api_key: entry.api_key.clone().filter(|k| !k.is_empty()),
        });
    }

    config.overrides.clone_from(&toml.overrides);

    // Cache
    if let Some(max_size) = toml.cache.max_size {
        config.cache.max_size = max_size;
    }
    if let Some(ttl) = toml.cache.ttl_secs {
        config.cache.ttl = Duration::from_secs(ttl);
    }
    if let Some(grid) = toml.cache.grid_size {
        config.cache.grid_size = grid;
    }

    // Rate limit
    if let Some(capacity) = toml.rate_limit.capacity {
        config.router.admission.capacity = capacity;
    }
    if let Some(rate) = toml.rate_limit.refill_rate {
        config.router.admission.refill_rate = rate;
    }

    // Retry
    let retry = &mut config.router.retry;
    if let Some(v) = toml.retry.max_retries {
        retry.max_retries = v;
    }
    if let Some(v) = toml.retry.initial_backoff_ms {
        retry.initial_backoff_ms = v;
    }
    if let Some(v) = toml.retry.max_backoff_ms {
        retry.max_backoff_ms = v;
    }
    if let Some(v) = toml.retry.backoff_multiplier {
        retry.backoff_multiplier = v;
    }
    if let Some(v) = toml.retry.use_jitter {
        retry.use_jitter = v;
    }
    if let Some(v) = toml.retry.fallback_on_failure {
        retry.fallback_on_failure = v;
    }

    // Batch
    if let Some(secs) = toml.batch.call_timeout_secs {
        config.batch.call_timeout = Duration::from_secs(secs);
    }
    if let Some(v) = toml.batch.base_tokens {
        config.batch.base_tokens = v;
    }
    if let Some(v) = toml.batch.tokens_per_agent {
        config.batch.tokens_per_agent = v;
    }
    if let Some(v) = toml.batch.temperature {
        config.batch.temperature = v;
    }
    if let Some(ref actions) = toml.batch.actions {
        config.actions = ActionVocabulary::from_names(actions.iter().cloned());
    }

    // Diagnostics
    if let Some(ref path) = toml.diagnostics.trace_path {
        config.diagnostics.trace_path = Some(PathBuf::from(path));
    }
    if let Some(capacity) = toml.diagnostics.recent_capacity {
        config.diagnostics.recent_capacity = capacity;
    }

    Ok(())
}

fn apply_env_config<F>(config: &mut DispatchConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    for backend in &mut config.backends {
        let prefix = env_name(&backend.descriptor.name);

        if backend.api_key.is_none() {
            backend.api_key = env(backend.api_key_env.as_str()).filter(|k| !k.is_empty());
        }
        if let Some(weight) = env(format!("LLM_{prefix}_WEIGHT").as_str()).and_then(|w| w.parse::<i64>().ok())
        {
            if weight > 0 {
                backend.descriptor.weight = weight;
                touched = true;
            }
        }
        if let Some(model) = env(format!("{prefix}_MODEL").as_str()).filter(|m| !m.is_empty()) {
            backend.descriptor.model = model;
            touched = true;
        }
    }

    if let Some(capacity) = env("DISPATCH_RATE_CAPACITY").and_then(|v| v.parse::<f64>().ok()) {
        config.router.admission.capacity = capacity;
        touched = true;
    }
    if let Some(rate) = env("DISPATCH_RATE_REFILL").and_then(|v| v.parse::<f64>().ok()) {
        config.router.admission.refill_rate = rate;
        touched = true;
    }
    if let Some(ttl) = env("DISPATCH_CACHE_TTL_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.cache.ttl = Duration::from_secs(ttl);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const TWO_BACKENDS: &str = r#"
[[backends]]
name = "groq"
protocol = "openai"
base_url = "https://api.groq.com/openai/v1"
model = "llama-3.1-8b-instant"
weight = 3
api_key = "gsk-inline"

[[backends]]
name = "gemini"
protocol = "gemini"
weight = 1
"#;

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert!(config.backends.is_empty());
        assert_eq!(config.cache, CacheSettings::default());
        assert_eq!(config.cache.max_size, 100);
        assert_eq!(config.cache.ttl, Duration::from_secs(10));
        assert_eq!(config.cache.grid_size, 50);
        assert_eq!(config.router.admission.capacity, 5.0);
        assert_eq!(config.router.admission.refill_rate, 1.0);
        assert_eq!(config.router.retry.max_retries, 2);
        assert_eq!(config.batch.call_timeout, Duration::from_secs(25));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("agent-dispatch"));
            assert!(p.to_string_lossy().ends_with("dispatch.toml"));
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_with_env(Some(PathBuf::from("/nonexistent/dispatch.toml")), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_full_toml() {
        let file = write_config(&format!(
            r#"{TWO_BACKENDS}
[overrides]
"npc-boss" = "gemini"

[cache]
max_size = 20
ttl_secs = 30
grid_size = 25

[rate_limit]
capacity = 10.0
refill_rate = 2.5

[retry]
max_retries = 1
initial_backoff_ms = 250
use_jitter = true

[batch]
call_timeout_secs = 5
tokens_per_agent = 60
actions = ["dig", "rest"]

[diagnostics]
trace_path = "/tmp/calls.jsonl"
recent_capacity = 7
"#
        ));

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.backends.len(), 2);
        let groq = &config.backends[0];
        assert_eq!(groq.descriptor.name, "groq");
        assert_eq!(groq.descriptor.protocol, Protocol::OpenAi);
        assert_eq!(groq.descriptor.weight, 3);
        assert_eq!(groq.api_key.as_deref(), Some("gsk-inline"));
        assert_eq!(groq.api_key_env, "GROQ_API_KEY");

        let gemini = &config.backends[1];
        assert_eq!(gemini.descriptor.protocol, Protocol::Gemini);
        assert!(gemini.api_key.is_none());

        assert_eq!(config.overrides["npc-boss"], "gemini");
        assert_eq!(config.cache.max_size, 20);
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert_eq!(config.cache.grid_size, 25);
        assert_eq!(config.router.admission.capacity, 10.0);
        assert_eq!(config.router.admission.refill_rate, 2.5);
        assert_eq!(config.router.retry.max_retries, 1);
        assert_eq!(config.router.retry.initial_backoff_ms, 250);
        assert!(config.router.retry.use_jitter);
        assert_eq!(config.batch.call_timeout, Duration::from_secs(5));
        assert_eq!(config.batch.tokens_per_agent, 60);
        assert_eq!(config.batch.base_tokens, 100);
        assert_eq!(config.actions.names(), vec!["dig", "rest"]);
        assert_eq!(config.diagnostics.trace_path, Some(PathBuf::from("/tmp/calls.jsonl")));
        assert_eq!(config.diagnostics.recent_capacity, 7);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = write_config("");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert!(config.backends.is_empty());
        assert_eq!(config.cache.max_size, 100);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let file = write_config("[cache\nmax_size = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_protocol_is_parse_error() {
        let file = write_config("[[backends]]\nname = \"x\"\nprotocol = \"smoke-signals\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    // =========================================================================
    // Environment Override Tests
    // =========================================================================

    #[test]
    fn test_env_supplies_missing_api_key() {
        let file = write_config(TWO_BACKENDS);
        let env = env_from(&[("GEMINI_API_KEY", "g-key"), ("GROQ_API_KEY", "ignored")]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.backends[0].api_key.as_deref(), Some("gsk-inline"));
        assert_eq!(config.backends[1].api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn test_custom_api_key_env() {
        let file = write_config(
            "[[backends]]\nname = \"hf\"\napi_key_env = \"HF_API_KEY\"\n",
        );
        let env = env_from(&[("HF_API_KEY", "hf-key")]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();
        assert_eq!(config.backends[0].api_key.as_deref(), Some("hf-key"));
    }

    #[test]
    fn test_env_weight_and_model_overrides() {
        let file = write_config(TWO_BACKENDS);
        let env = env_from(&[
            ("LLM_GROQ_WEIGHT", "7"),
            ("LLM_GEMINI_WEIGHT", "-2"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
        ]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.backends[0].descriptor.weight, 7);
        assert_eq!(config.backends[1].descriptor.weight, 1);
        assert_eq!(config.backends[1].descriptor.model, "gemini-1.5-pro");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_global_overrides() {
        let env = env_from(&[
            ("DISPATCH_RATE_CAPACITY", "20"),
            ("DISPATCH_RATE_REFILL", "4.5"),
            ("DISPATCH_CACHE_TTL_SECS", "3"),
        ]);
        let config = load_config_with_env(None, env).unwrap();
        assert_eq!(config.router.admission.capacity, 20.0);
        assert_eq!(config.router.admission.refill_rate, 4.5);
        assert_eq!(config.cache.ttl, Duration::from_secs(3));
    }

    #[test]
    fn test_env_name_normalization() {
        assert_eq!(env_name("open-router"), "OPEN_ROUTER");
        assert_eq!(env_name("groq"), "GROQ");
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[rate_limit]\nrefill_rate = 0.0\n",
            "[rate_limit]\ncapacity = -1.0\n",
            "[cache]\nmax_size = 0\n",
            "[cache]\ngrid_size = 0\n",
            "[batch]\ncall_timeout_secs = 0\n",
            "[batch]\nactions = []\n",
            "[[backends]]\nname = \"a\"\n[[backends]]\nname = \"a\"\n",
            "[[backends]]\nname = \"  \"\n",
            "[[backends]]\nname = \"a\"\n[overrides]\n\"npc-1\" = \"b\"\n",
        ];
        for case in cases {
            let file = write_config(case);
            let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "accepted invalid config:\n{case}"
            );
        }
    }

    #[test]
    fn test_backend_without_name_rejected() {
        let file = write_config("[[backends]]\nprotocol = \"gemini\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("backends[0]")));
    }
}
