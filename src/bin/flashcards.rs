//! Generate flashcards from a piece of text.
//!
//! Usage: `OPENROUTER_API_KEY=... flashcards "text to study"`

use std::process::ExitCode;
use serde_json::json;
use log::error;

use openrouter_chat::{
  ChatCompletionClient, ClientConfig, LogUsageSink, ResponseFormatOptions,
};

const SYSTEM_PROMPT: &str = "You create study flashcards. \
  Answer with JSON only: an object with a `flashcards` array whose items \
  have a `front` (question) and a `back` (answer).";

fn flashcard_schema() -> serde_json::Value
{   json!({
      "type": "object",
      "required": ["flashcards"],
      "additionalProperties": false,
      "properties": {
        "flashcards": {
          "type": "array",
          "minItems": 1,
          "items": {
            "type": "object",
            "required": ["front", "back"],
            "additionalProperties": false,
            "properties": {
              "front": { "type": "string", "minLength": 1, "maxLength": 200 },
              "back": { "type": "string", "minLength": 1, "maxLength": 500 }
            }
          }
        }
      }
    })
}

#[tokio::main]
async fn main() -> ExitCode
{   env_logger::init();

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty()
    {   eprintln!("usage: flashcards <text to study>");
        return ExitCode::from(2);
    }

    let config = match std::env::var("FLASHCARDS_CONFIG")
    {   Ok(path) => match ClientConfig::from_json_file(&path)
        {   Ok(config) => config
          , Err(e) => {
              error!("{}", e);
              return ExitCode::from(2);
            }
        }
      , Err(_) => ClientConfig::default()
    };

    let mut client = ChatCompletionClient::new(config)
      .with_usage_sink(std::sync::Arc::new(LogUsageSink));
    let setup = client.set_system_message(SYSTEM_PROMPT)
      .and_then(|_| {
        client.set_response_format(
          flashcard_schema(),
          ResponseFormatOptions::named("flashcards")
        )
      });
    if let Err(e) = setup
    {   error!("{}", e);
        return ExitCode::from(2);
    }

    match client.send_chat_message(&text).await
    {   Ok(result) => {
          let cards = result.parsed.unwrap_or(serde_json::Value::Null);
          match serde_json::to_string_pretty(&cards)
          {   Ok(out) => println!("{}", out)
            , Err(_) => println!("{}", result.content)
          }
          ExitCode::SUCCESS
        }
      , Err(e) => {
          eprintln!("{}", e);
          if e.is_client_error()
          {   ExitCode::from(2)
          } else
          {   ExitCode::FAILURE
          }
        }
    }
}
