//! Configuration for the commerce core.
//!
//! Everything has a sensible default; deployments override via the builder or
//! `BUNDLEWAY_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CommerceError, Result};

/// Environment variable prefix for all settings.
const ENV_PREFIX: &str = "BUNDLEWAY_";

fn get_env_with_prefix(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

/// Main configuration for the commerce core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommerceConfig {
    /// ISO 4217 currency code used for all catalog prices and quotes.
    #[serde(default = "default_currency")]
    pub currency: String,
    pub processor: ProcessorConfig,
}

/// Configuration for the external payment processor client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// Base URL of the processor's REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Maximum retry attempts for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_api_base() -> String {
    "https://api.processor.example.com/v1".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl ProcessorConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Builder for [`CommerceConfig`] with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct CommerceConfigBuilder {
    config: CommerceConfig,
}

impl CommerceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CommerceConfig::default(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.config.currency = currency.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.config.processor.api_base = api_base.into();
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.processor.timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.processor.max_retries = retries;
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.processor.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.config.processor.max_delay_ms = ms;
        self
    }

    /// Load overrides from `BUNDLEWAY_`-prefixed environment variables.
    pub fn from_env(mut self) -> Self {
        if let Some(currency) = get_env_with_prefix("CURRENCY") {
            self.config.currency = currency;
        }
        if let Some(api_base) = get_env_with_prefix("PROCESSOR_API_BASE") {
            self.config.processor.api_base = api_base;
        }
        if let Some(timeout) = get_env_with_prefix("PROCESSOR_TIMEOUT_SECONDS") {
            if let Ok(t) = timeout.parse() {
                self.config.processor.timeout_seconds = t;
            }
        }
        if let Some(retries) = get_env_with_prefix("PROCESSOR_MAX_RETRIES") {
            if let Ok(r) = retries.parse() {
                self.config.processor.max_retries = r;
            }
        }
        if let Some(delay) = get_env_with_prefix("PROCESSOR_BASE_DELAY_MS") {
            if let Ok(d) = delay.parse() {
                self.config.processor.base_delay_ms = d;
            }
        }
        if let Some(delay) = get_env_with_prefix("PROCESSOR_MAX_DELAY_MS") {
            if let Ok(d) = delay.parse() {
                self.config.processor.max_delay_ms = d;
            }
        }
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the currency code is not three ASCII letters, the
    /// API base is not an http(s) URL, or the timeout is zero.
    pub fn build(self) -> Result<CommerceConfig> {
        if self.config.currency.len() != 3
            || !self.config.currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(CommerceError::Internal {
                message: format!(
                    "currency must be a three-letter ISO 4217 code, got: {}",
                    self.config.currency
                ),
            });
        }

        if !self.config.processor.api_base.starts_with("https://")
            && !self.config.processor.api_base.starts_with("http://")
        {
            return Err(CommerceError::Internal {
                message: "processor api_base must be an http(s) URL".to_string(),
            });
        }

        if self.config.processor.timeout_seconds == 0 {
            return Err(CommerceError::Internal {
                message: "processor timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.config.processor.max_delay_ms < self.config.processor.base_delay_ms {
            return Err(CommerceError::Internal {
                message: "processor max_delay_ms must be >= base_delay_ms".to_string(),
            });
        }

        Ok(self.config)
    }
}

impl Default for CommerceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
