//! Outbound chat-completion payload

use serde::Serialize;
use serde_json::Value;

use crate::config::SamplingParameters;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

impl ChatMessage
{   pub fn system(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "system".to_string()
          , content: content.into()
        }
    }

    pub fn user(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "user".to_string()
          , content: content.into()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonSchemaSpec
{   pub name: String
  , pub schema: Value
  , pub strict: bool
}

/// `response_format` block; only the JSON-schema flavor is sent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat
{   JsonSchema
    {   json_schema: JsonSchemaSpec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , #[serde(flatten)]
    pub sampling: SamplingParameters
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>
}

impl ChatRequest
{   /// Messages are `[system?, user]`; only finite sampling values are kept
    pub fn build(
      model: &str
    , system_message: Option<&str>
    , user_message: &str
    , sampling: &SamplingParameters
    , response_format: Option<JsonSchemaSpec>
    ) -> Self
    {   let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_message.filter(|s| !s.is_empty())
        {   messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user_message));

        ChatRequest
        {   model: model.to_string()
          , messages
          , sampling: sampling.finite_only()
          , response_format: response_format
              .map(|json_schema| ResponseFormat::JsonSchema { json_schema })
        }
    }
}
