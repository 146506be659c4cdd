//! Retry policy and backoff schedule for chat requests

use std::time::Duration;
use log::debug;

use crate::config::{
  ClientConfig, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_RETRIES,
  DEFAULT_RETRY_DELAY_MS,
};

/// Statuses worth another attempt. Anything >= 500 is retried as well.
pub const RETRIABLE_STATUSES: [u16; 10]
  = [0, 408, 409, 425, 429, 500, 502, 503, 504, 524];

/// Retry policy for failed requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_retries: u32
  , pub backoff_multiplier: f64
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy. A non-positive or non-finite
    /// multiplier falls back to the default.
    pub fn new(
      max_retries: u32
    , backoff_multiplier: f64
    , initial_backoff_ms: u64
    ) -> Self
    {   let backoff_multiplier
          = if backoff_multiplier.is_finite() && backoff_multiplier > 0.0
            {   backoff_multiplier
            } else
            {   debug!(
                  "Ignoring backoff multiplier {}, using {}",
                  backoff_multiplier,
                  DEFAULT_BACKOFF_MULTIPLIER
                );
                DEFAULT_BACKOFF_MULTIPLIER
            };
        RetryPolicy
        {   max_retries
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self
    {   RetryPolicy::new(
          config.max_retries
            .map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
            .unwrap_or(DEFAULT_MAX_RETRIES),
          config.backoff_multiplier
            .unwrap_or(DEFAULT_BACKOFF_MULTIPLIER),
          config.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
        )
    }

    /// Total HTTP attempts a send may make
    pub fn max_attempts(&self) -> u32
    {   self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based)
    pub fn has_attempts_left(&self, attempt: u32) -> bool
    {   attempt < self.max_attempts()
    }

    /// Delay to wait after the failed `attempt` (1-based):
    /// `initial * multiplier^(attempt - 1)`
    pub fn backoff_for_attempt(
      &self
    , attempt: u32
    ) -> Duration
    {   let exponent
          = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.powi(exponent);
        let millis
          = self.initial_backoff.as_millis() as f64 * multiplier;
        debug!(
          "Backoff for attempt {} is {:.0}ms",
          attempt, millis
        );
        // An overflowing exponent saturates rather than dropping to zero
        if millis > 0.0
        {   Duration::from_millis(millis.min(u64::MAX as f64) as u64)
        } else
        {   Duration::ZERO
        }
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(
          DEFAULT_MAX_RETRIES,
          DEFAULT_BACKOFF_MULTIPLIER,
          DEFAULT_RETRY_DELAY_MS
        )
    }
}

pub fn is_retriable_status(status: u16) -> bool
{   status >= 500 || RETRIABLE_STATUSES.contains(&status)
}

/// Transport failures that are likely to go away on their own
pub fn is_transient_transport_error(err: &reqwest::Error) -> bool
{   err.is_timeout()
      || err.is_connect()
      || err.is_request()
      || err.is_body()
}
