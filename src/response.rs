//! Response normalization: content extraction, code fences, error bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use log::trace;

use crate::error::ServiceError;

/// Token counts reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage
{   #[serde(default)]
    pub prompt_tokens: Option<u64>
  , #[serde(default)]
    pub completion_tokens: Option<u64>
  , #[serde(default)]
    pub total_tokens: Option<u64>
}

/// Normalized outcome of one successful send
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult
{   pub id: Option<String>
  , /// Model echoed by the server, or the requested one
    pub model: String
  , /// Flattened assistant text
    pub content: String
  , /// Present only when a response format was registered
    pub parsed: Option<Value>
  , pub usage: TokenUsage
  , pub finish_reason: Option<String>
  , /// HTTP attempts the send took
    pub attempts: u32
  , /// Server payload as received
    pub raw: Value
}

/// Fields of a successful response that the client reads.
/// `raw` keeps everything else.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionEnvelope
{   #[serde(default)]
    pub id: Option<String>
  , #[serde(default)]
    pub model: Option<String>
  , #[serde(default)]
    pub usage: Option<TokenUsage>
  , #[serde(default)]
    pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   #[serde(default)]
    pub index: Option<u32>
  , #[serde(default)]
    pub finish_reason: Option<String>
  , #[serde(default)]
    pub message: Option<AssistantMessage>
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage
{   #[serde(default)]
    pub role: Option<String>
  , /// Either a string or an array of `{type, text?}` parts
    #[serde(default)]
    pub content: Value
  , /// Structured value pre-parsed by the server
    #[serde(default)]
    pub parsed: Option<Value>
}

impl CompletionEnvelope
{   pub fn from_raw(raw: &Value) -> Result<Self, ServiceError>
    {   serde_json::from_value(raw.clone())
          .map_err(|e| {
            ServiceError::api("Unexpected chat completion shape")
              .with_details(raw.clone())
              .with_cause(e)
          })
    }

    pub fn first_choice(&self) -> Result<&Choice, ServiceError>
    {   self.choices.first()
          .ok_or_else(|| {
            ServiceError::api("Chat completion returned no choices")
          })
    }
}

/// Assistant text from a string or an array of content parts.
/// Parts contribute their string `text` fields, joined by newlines.
pub fn extract_text_content(content: &Value)
  -> Result<String, ServiceError>
{   let text = match content
    {   Value::String(s) => s.trim().to_string()
      , Value::Array(parts) => {
          parts.iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
        }
      , _ => String::new()
    };

    if text.is_empty()
    {   return Err(ServiceError::api(
          "Chat completion contained no assistant text"
        ));
    }
    Ok(text)
}

/// Remove a surrounding Markdown code fence (```` ``` ```` or
/// ```` ```json ````). Text without a fence is returned trimmed.
pub fn strip_code_fences(text: &str) -> &str
{   let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```")
    else
    {   return trimmed;
    };
    let Some(body) = rest.strip_suffix("```")
    else
    {   return trimmed;
    };
    // The info string (e.g. `json`) runs to the first newline.
    let body = match body.find('\n')
    {   Some(nl) if is_info_string(&body[..nl]) => &body[nl + 1..]
      , _ => body
    };
    body.trim()
}

fn is_info_string(line: &str) -> bool
{   line.trim()
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_+.".contains(c))
}

/// Decode a structured value out of assistant text
pub fn parse_structured_content(text: &str)
  -> Result<Value, ServiceError>
{   let body = strip_code_fences(text);
    trace!("Parsing structured content: {}", body);
    serde_json::from_str(body)
      .map_err(|e| {
        ServiceError::validation(
          "Assistant content is not valid JSON"
        )
        .with_details(Value::String(text.to_string()))
        .with_cause(e)
      })
}

/// Best-effort message out of an error body shaped like
/// `{error: string | {message}, message}`
pub fn extract_error_message(body: &Value, status: u16) -> String
{   let from_error = match body.get("error")
    {   Some(Value::String(s)) => Some(s.clone())
      , Some(Value::Object(obj)) => obj.get("message")
          .and_then(Value::as_str)
          .map(str::to_string)
      , _ => None
    };
    from_error
      .or_else(|| {
        body.get("message")
          .and_then(Value::as_str)
          .map(str::to_string)
      })
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| format!("Request failed with status {}", status))
}
