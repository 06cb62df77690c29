use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::RetryPolicy;
use parley_core::retry::DEFAULT_RETRYABLE_STATUS_CODES;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::ConfigError;

/// Keys recognised in the flat configuration object.
pub mod keys {
    pub const API_KEY: &str = "apiKey";
    pub const MODEL: &str = "model";
    pub const SYSTEM_PROMPT: &str = "systemPrompt";
    pub const TEMPERATURE: &str = "temperature";
    pub const MAX_CONTEXT_CHARACTERS: &str = "maxContextCharacters";
    pub const MAX_HISTORY_ITEMS: &str = "maxHistoryItems";
    pub const REQUEST_TIMEOUT: &str = "requestTimeout";
    pub const ENDPOINT: &str = "endpoint";
    pub const RETRY_MAX_ATTEMPTS: &str = "retryMaxAttempts";
    pub const RETRY_BASE_DELAY: &str = "retryBaseDelay";
    pub const RETRY_MAX_DELAY: &str = "retryMaxDelay";
    pub const RETRY_BACKOFF_MULTIPLIER: &str = "retryBackoffMultiplier";
    pub const RETRY_JITTER_RATIO: &str = "retryJitterRatio";
    pub const RETRYABLE_STATUS_CODES: &str = "retryableStatusCodes";
}

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_MAX_CONTEXT_CHARACTERS: usize = 16_000;
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Immutable client settings.
///
/// Bounds are floored rather than rejected: a zero context budget becomes 1,
/// a zero timeout becomes one second, and so on.
#[derive(Clone, PartialEq)]
pub struct Configuration {
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_context_characters: usize,
    max_history_items: usize,
    request_timeout: Duration,
    endpoint: Url,
    retry_policy: RetryPolicy,
}

impl Configuration {
    /// Configuration with the given key and every other setting at its default.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_context_characters: DEFAULT_MAX_CONTEXT_CHARACTERS,
            max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoint: default_endpoint(),
            retry_policy: RetryPolicy::standard(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_context_characters(mut self, max: usize) -> Self {
        self.max_context_characters = max.max(1);
        self
    }

    #[must_use]
    pub fn with_max_history_items(mut self, max: usize) -> Self {
        self.max_history_items = max.max(1);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.max(MIN_REQUEST_TIMEOUT);
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    #[must_use]
    pub const fn max_context_characters(&self) -> usize {
        self.max_context_characters
    }

    #[must_use]
    pub const fn max_history_items(&self) -> usize {
        self.max_history_items
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Build a configuration from a flat key-value object.
    ///
    /// `apiKey` is required and must be a non-blank string; all other keys
    /// fall back to their defaults when absent or `null`. Unknown keys are
    /// ignored.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        Self::from_raw(RawConfig::from_value(Value::Object(map.clone()))?)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let api_key = string(keys::API_KEY, raw.api_key)?
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequiredKey(keys::API_KEY.to_string()))?;

        let endpoint = match string(keys::ENDPOINT, raw.endpoint)? {
            Some(endpoint) => Url::parse(endpoint.trim())
                .map_err(|_| ConfigError::invalid(keys::ENDPOINT, "a valid URL string"))?,
            None => default_endpoint(),
        };

        let retry_policy = RetryPolicy::new(
            integer(keys::RETRY_MAX_ATTEMPTS, raw.retry_max_attempts.as_ref())?
                .map_or(3, |n| u32::try_from(n.max(1)).unwrap_or(u32::MAX)),
            number(keys::RETRY_BASE_DELAY, raw.retry_base_delay.as_ref())?
                .map_or(Duration::from_millis(400), seconds),
            number(keys::RETRY_MAX_DELAY, raw.retry_max_delay.as_ref())?
                .map_or(Duration::from_secs(8), seconds),
            number(
                keys::RETRY_BACKOFF_MULTIPLIER,
                raw.retry_backoff_multiplier.as_ref(),
            )?
            .unwrap_or(2.0),
            number(keys::RETRY_JITTER_RATIO, raw.retry_jitter_ratio.as_ref())?.unwrap_or(0.2),
            status_codes(keys::RETRYABLE_STATUS_CODES, raw.retryable_status_codes.as_ref())?
                .unwrap_or_else(|| DEFAULT_RETRYABLE_STATUS_CODES.to_vec()),
        );

        let mut config = Self::new(api_key)
            .with_endpoint(endpoint)
            .with_retry_policy(retry_policy);

        if let Some(model) = string(keys::MODEL, raw.model)? {
            config = config.with_model(model);
        }
        if let Some(prompt) = string(keys::SYSTEM_PROMPT, raw.system_prompt)? {
            config = config.with_system_prompt(prompt);
        }
        if let Some(temperature) = number(keys::TEMPERATURE, raw.temperature.as_ref())? {
            config = config.with_temperature(temperature);
        }
        if let Some(max) = integer(
            keys::MAX_CONTEXT_CHARACTERS,
            raw.max_context_characters.as_ref(),
        )? {
            config = config.with_max_context_characters(clamp_count(max));
        }
        if let Some(max) = integer(keys::MAX_HISTORY_ITEMS, raw.max_history_items.as_ref())? {
            config = config.with_max_history_items(clamp_count(max));
        }
        if let Some(timeout) = number(keys::REQUEST_TIMEOUT, raw.request_timeout.as_ref())? {
            config = config.with_request_timeout(seconds(timeout));
        }

        debug!(
            "Parsed configuration: model={}, endpoint={}",
            config.model, config.endpoint
        );
        Ok(config)
    }

    /// Parse a JSON document whose root is the flat configuration object.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| ConfigError::InvalidFile(e.to_string()))?;
        match value {
            Value::Object(_) => Self::from_raw(RawConfig::from_value(value)?),
            _ => Err(ConfigError::InvalidFile(
                "root must be a JSON object".to_string(),
            )),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile(e.to_string()))?;
        let config = Self::from_json_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `~/parley/config.json`.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'parley init' to create config.",
                path.display()
            );
        }
        Ok(Self::load_from(&path)?)
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("parley"))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Write the configuration template to `path`, refusing to overwrite.
    pub fn create_config_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                path.display()
            );
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, CONFIG_TEMPLATE)?;
        info!("Created config file at {}", path.display());
        Ok(())
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let path = Self::config_path()?;
        Self::create_config_at(&path)?;
        Ok(path)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_context_characters", &self.max_context_characters)
            .field("max_history_items", &self.max_history_items)
            .field("request_timeout", &self.request_timeout)
            .field("endpoint", &self.endpoint.as_str())
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "apiKey": "your-api-key-here",
  "model": "gpt-4.1-mini",
  "systemPrompt": "You are a helpful assistant.",
  "temperature": 0.5,
  "maxContextCharacters": 16000,
  "maxHistoryItems": 100,
  "requestTimeout": 60,
  "endpoint": "https://api.openai.com/v1/responses",
  "retryMaxAttempts": 3,
  "retryBaseDelay": 0.4,
  "retryMaxDelay": 8.0,
  "retryBackoffMultiplier": 2.0,
  "retryJitterRatio": 0.2,
  "retryableStatusCodes": [408, 409, 429, 500, 502, 503, 504]
}
"#;

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).unwrap_or_else(|_| unreachable!("default endpoint is a valid URL"))
}

/// The configuration object as written on disk.
///
/// Values stay untyped here so a type mismatch is reported against its key
/// with [`ConfigError::InvalidValue`]. `null` reads as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    api_key: Option<Value>,
    model: Option<Value>,
    system_prompt: Option<Value>,
    temperature: Option<Value>,
    max_context_characters: Option<Value>,
    max_history_items: Option<Value>,
    request_timeout: Option<Value>,
    endpoint: Option<Value>,
    retry_max_attempts: Option<Value>,
    retry_base_delay: Option<Value>,
    retry_max_delay: Option<Value>,
    retry_backoff_multiplier: Option<Value>,
    retry_jitter_ratio: Option<Value>,
    retryable_status_codes: Option<Value>,
}

impl RawConfig {
    fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidFile(e.to_string()))
    }
}

fn string(key: &str, value: Option<Value>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::invalid(key, "a string")),
    }
}

fn number(key: &str, value: Option<&Value>) -> Result<Option<f64>, ConfigError> {
    value
        .map(|value| {
            value
                .as_f64()
                .ok_or_else(|| ConfigError::invalid(key, "a number"))
        })
        .transpose()
}

/// Integers may be written as `12` or `12.0`; fractional values are rejected.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integer(key: &str, value: Option<&Value>) -> Result<Option<i64>, ConfigError> {
    value
        .map(|value| {
            value
                .as_i64()
                .or_else(|| {
                    value
                        .as_f64()
                        .filter(|n| n.is_finite() && n.fract() == 0.0)
                        .map(|n| n as i64)
                })
                .ok_or_else(|| ConfigError::invalid(key, "an integer"))
        })
        .transpose()
}

fn status_codes(key: &str, value: Option<&Value>) -> Result<Option<Vec<u16>>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let invalid = || ConfigError::invalid(key, "an array of HTTP status codes");
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|code| {
            code.as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .filter(|n| (100..=599).contains(n))
                .ok_or_else(invalid)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn clamp_count(value: i64) -> usize {
    usize::try_from(value.max(1)).unwrap_or(usize::MAX)
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}
