//! Configuration for the chat-completion client

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::debug;

use crate::error::ServiceError;

pub const DEFAULT_ENDPOINT: &str
  = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str
  = "meta-llama/llama-3.3-8b-instruct:free";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Sampling parameters sent with every request.
/// Non-finite values are dropped from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplingParameters
{   #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>
}

impl SamplingParameters
{   pub fn defaults() -> Self
    {   SamplingParameters
        {   temperature: Some(0.7)
          , top_p: Some(1.0)
          , frequency_penalty: Some(0.0)
          , presence_penalty: Some(0.0)
        }
    }

    /// Shallow merge: every field set in `other` overwrites ours
    pub fn merge(&mut self, other: &SamplingParameters)
    {   if other.temperature.is_some()
        {   self.temperature = other.temperature;
        }
        if other.top_p.is_some()
        {   self.top_p = other.top_p;
        }
        if other.frequency_penalty.is_some()
        {   self.frequency_penalty = other.frequency_penalty;
        }
        if other.presence_penalty.is_some()
        {   self.presence_penalty = other.presence_penalty;
        }
    }

    /// Copy with every non-finite value removed
    pub fn finite_only(&self) -> Self
    {   let keep = |v: Option<f64>| v.filter(|x| x.is_finite());
        SamplingParameters
        {   temperature: keep(self.temperature)
          , top_p: keep(self.top_p)
          , frequency_penalty: keep(self.frequency_penalty)
          , presence_penalty: keep(self.presence_penalty)
        }
    }
}

/// Client configuration. Every field is optional; see the
/// `DEFAULT_*` constants for what an absent field means.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig
{   /// Chat-completions URL
    #[serde(default)]
    pub endpoint: Option<String>
  , /// Explicit API key. Wins over the environment even when blank.
    #[serde(default)]
    pub api_key: Option<String>
  , /// Default model identifier
    #[serde(default)]
    pub model: Option<String>
  , /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>
  , /// Additional attempts after the first. Negative means zero.
    #[serde(default)]
    pub max_retries: Option<i64>
  , /// Delay before the first retry in milliseconds
    #[serde(default)]
    pub retry_delay_ms: Option<u64>
  , /// Growth factor of the retry delay
    #[serde(default)]
    pub backoff_multiplier: Option<f64>
  , /// Overrides merged over `SamplingParameters::defaults()`
    #[serde(default)]
    pub sampling: Option<SamplingParameters>
  , /// Sent as `HTTP-Referer`
    #[serde(default)]
    pub referer: Option<String>
  , /// Sent as `X-Title`
    #[serde(default)]
    pub app_title: Option<String>
}

impl ClientConfig
{   /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>)
      -> Result<Self, ServiceError>
    {   let path = path.as_ref();
        debug!("Loading client config from {}", path.display());
        let raw = std::fs::read_to_string(path)
          .map_err(|e| {
            ServiceError::configuration(format!(
              "Cannot read config file {}", path.display()
            )).with_cause(e)
          })?;
        serde_json::from_str(&raw)
          .map_err(|e| {
            ServiceError::configuration(format!(
              "Invalid config file {}", path.display()
            )).with_cause(e)
          })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self
    {   self.api_key = Some(key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self
    {   self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self
    {   self.model = Some(model.into());
        self
    }

    pub fn with_retries(
      mut self
    , max_retries: u32
    , retry_delay_ms: u64
    , backoff_multiplier: f64
    ) -> Self
    {   self.max_retries = Some(i64::from(max_retries));
        self.retry_delay_ms = Some(retry_delay_ms);
        self.backoff_multiplier = Some(backoff_multiplier);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self
    {   self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn endpoint(&self) -> String
    {   self.endpoint
          .clone()
          .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn model(&self) -> String
    {   self.model
          .clone()
          .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn timeout(&self) -> Duration
    {   Duration::from_millis(
          self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
        )
    }

    pub fn sampling(&self) -> SamplingParameters
    {   let mut params = SamplingParameters::defaults();
        if let Some(overrides) = &self.sampling
        {   params.merge(overrides);
        }
        params
    }

    /// Explicit key, then the runtime environment, then the value the
    /// crate was compiled with.
    pub fn resolve_api_key(&self) -> Option<String>
    {   resolve_api_key_from(
          self.api_key.as_deref(),
          std::env::var(API_KEY_ENV).ok(),
          option_env!("OPENROUTER_API_KEY")
        )
    }
}

pub fn resolve_api_key_from(
  explicit: Option<&str>
, runtime: Option<String>
, build_time: Option<&str>
) -> Option<String>
{   if let Some(key) = explicit
    {   return Some(key.to_string());
    }
    runtime.or_else(|| build_time.map(str::to_string))
}
