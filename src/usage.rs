//! Token-usage metrics, kept apart from error logging

use std::time::Duration;
use serde::Serialize;

use crate::response::TokenUsage;

/// One successful request's usage figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord
{   pub request_id: Option<String>
  , pub model: String
  , pub usage: TokenUsage
  , /// HTTP attempts the request took, retries included
    pub attempts: u32
  , #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration
}

fn serialize_millis<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
  S: serde::Serializer
{   s.serialize_u64(d.as_millis() as u64)
}

/// Receives a record after every successful send
pub trait UsageSink: Send + Sync
{   fn record(&self, record: &UsageRecord);
}

/// Writes usage records to the `log` facade under target `usage`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUsageSink;

impl UsageSink for LogUsageSink
{   fn record(&self, record: &UsageRecord)
    {   match serde_json::to_string(record)
        {   Ok(line) => log::info!(target: "usage", "{}", line)
          , Err(e) => log::debug!(
              target: "usage",
              "Unserializable usage record: {}", e
            )
        }
    }
}
