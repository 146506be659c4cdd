use std::sync::Arc;
use std::time::{Duration, Instant};
use serde_json::{json, Value};
use log::{debug, trace};

use crate::config::{ClientConfig, SamplingParameters};
use crate::error::{Result, ServiceError};
use crate::logger::{LogFacade, Logger};
use crate::request::{ChatRequest, JsonSchemaSpec};
use crate::response::{
  extract_error_message, extract_text_content, parse_structured_content,
  ChatResult, CompletionEnvelope,
};
use crate::retry::{is_retriable_status, is_transient_transport_error, RetryPolicy};
use crate::schema::JsonSchema;
use crate::usage::{UsageRecord, UsageSink};

/// Caller overrides for `set_response_format`
#[derive(Debug, Clone, Default)]
pub struct ResponseFormatOptions
{   /// Schema name sent to the API. Falls back to the schema's `title`,
    /// then to `structured_output_N`.
    pub name: Option<String>
  , /// Defaults to `true`
    pub strict: Option<bool>
}

impl ResponseFormatOptions
{   pub fn named(name: impl Into<String>) -> Self
    {   ResponseFormatOptions
        {   name: Some(name.into())
          , strict: None
        }
    }
}

/// The registered structured-output schema
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormatConfig
{   pub name: String
  , pub schema: Value
  , pub strict: bool
  , compiled: JsonSchema
}

impl ResponseFormatConfig
{   pub fn compiled(&self) -> &JsonSchema
    {   &self.compiled
    }

    fn spec(&self) -> JsonSchemaSpec
    {   JsonSchemaSpec
        {   name: self.name.clone()
          , schema: self.schema.clone()
          , strict: self.strict
        }
    }
}

/// Result of one HTTP attempt, as seen by the retry loop
enum AttemptOutcome
{   Succeeded(Value)
  , /// Transient failure with attempts left
    Retrying(ServiceError)
  , /// Never retried
    FailedPermanently(ServiceError)
  , /// Transient failure on the last attempt
    Exhausted(ServiceError)
}

/// Chat-completion client for an OpenRouter-compatible endpoint
pub struct ChatCompletionClient
{   endpoint: String
  , api_key: Option<String>
  , model: String
  , sampling: SamplingParameters
  , timeout: Duration
  , retry: RetryPolicy
  , referer: Option<String>
  , app_title: Option<String>
  , system_message: Option<String>
  , user_message: Option<String>
  , response_format: Option<ResponseFormatConfig>
  , schema_counter: u32
  , http_client: reqwest::Client
  , logger: Arc<dyn Logger>
  , usage_sink: Option<Arc<dyn UsageSink>>
}

impl ChatCompletionClient
{   /// Build a client. A missing API key is reported on send, not here.
    pub fn new(config: ClientConfig) -> Self
    {   debug!("Creating ChatCompletionClient");
        ChatCompletionClient
        {   endpoint: config.endpoint()
          , api_key: config.resolve_api_key()
          , model: config.model()
          , sampling: config.sampling()
          , timeout: config.timeout()
          , retry: RetryPolicy::from_config(&config)
          , referer: config.referer.clone()
          , app_title: config.app_title.clone()
          , system_message: None
          , user_message: None
          , response_format: None
          , schema_counter: 0
          , http_client: reqwest::Client::new()
          , logger: Arc::new(LogFacade)
          , usage_sink: None
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self
    {   self.logger = logger;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self
    {   self.usage_sink = Some(sink);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self
    {   self.http_client = client;
        self
    }

    // ===== Accessors =====

    pub fn model(&self) -> &str
    {   &self.model
    }

    pub fn sampling(&self) -> &SamplingParameters
    {   &self.sampling
    }

    pub fn retry_policy(&self) -> &RetryPolicy
    {   &self.retry
    }

    pub fn timeout(&self) -> Duration
    {   self.timeout
    }

    pub fn system_message(&self) -> Option<&str>
    {   self.system_message.as_deref()
    }

    pub fn user_message(&self) -> Option<&str>
    {   self.user_message.as_deref()
    }

    pub fn response_format(&self) -> Option<&ResponseFormatConfig>
    {   self.response_format.as_ref()
    }

    // ===== Setters =====

    pub fn set_system_message(&mut self, text: &str) -> Result<()>
    {   self.system_message = Some(non_blank(text, "System message")?);
        Ok(())
    }

    pub fn clear_system_message(&mut self)
    {   self.system_message = None;
    }

    /// Default user message for sends that pass an empty one
    pub fn set_user_message(&mut self, text: &str) -> Result<()>
    {   self.user_message = Some(non_blank(text, "User message")?);
        Ok(())
    }

    pub fn clear_user_message(&mut self)
    {   self.user_message = None;
    }

    /// Register the schema that subsequent sends request and validate
    pub fn set_response_format(
      &mut self
    , schema: Value
    , options: ResponseFormatOptions
    ) -> Result<()>
    {   if !schema.is_object()
        {   return Err(ServiceError::validation(
              "Response format schema must be a JSON object"
            ));
        }
        let compiled = JsonSchema::compile(&schema)?;

        let name = match options.name
        {   Some(name) => name
          , None => match schema.get("title").and_then(Value::as_str)
            {   Some(title) => title.to_string()
              , None => {
                  self.schema_counter += 1;
                  format!("structured_output_{}", self.schema_counter)
                }
            }
        };
        let name = name.trim().to_string();
        if name.is_empty()
        {   return Err(ServiceError::validation(
              "Response format name must not be empty"
            ));
        }

        debug!("Registered response format '{}'", name);
        self.response_format = Some(ResponseFormatConfig
        {   name
          , schema
          , strict: options.strict.unwrap_or(true)
          , compiled
        });
        Ok(())
    }

    pub fn clear_response_format(&mut self)
    {   self.response_format = None;
    }

    /// Switch model; `parameters` are merged over the current ones
    pub fn set_model(
      &mut self
    , name: &str
    , parameters: Option<SamplingParameters>
    ) -> Result<()>
    {   self.model = non_blank(name, "Model name")?;
        if let Some(params) = parameters
        {   self.sampling.merge(&params);
        }
        Ok(())
    }

    // ===== Send =====

    /// Payload for `user_message` under the current configuration
    pub fn build_request(&self, user_message: &str) -> Result<ChatRequest>
    {   let message = user_message.trim();
        let message = if !message.is_empty()
        {   message.to_string()
        } else
        {   self.user_message.clone().ok_or_else(|| {
              ServiceError::validation("User message must not be empty")
            })?
        };

        Ok(ChatRequest::build(
          &self.model,
          self.system_message.as_deref(),
          &message,
          &self.sampling,
          self.response_format.as_ref().map(ResponseFormatConfig::spec)
        ))
    }

    /// Send one user message. An empty `user_message` falls back to the
    /// one set with `set_user_message`.
    pub async fn send_chat_message(&self, user_message: &str)
      -> Result<ChatResult>
    {   match self.dispatch(user_message).await
        {   Ok(result) => Ok(result)
          , Err((e, attempts)) => {
              self.logger.error(&failure_line(&e, attempts));
              Err(e)
            }
        }
    }

    /// On failure, also reports how many HTTP attempts were made
    async fn dispatch(&self, user_message: &str)
      -> std::result::Result<ChatResult, (ServiceError, u32)>
    {   let payload = self.build_request(user_message)
          .map_err(|e| (e, 0))?;
        trace!("Chat request payload: {:?}", payload);

        let api_key = self.api_key
          .as_deref()
          .map(str::trim)
          .filter(|k| !k.is_empty())
          .ok_or_else(|| {
            (ServiceError::configuration(
              "Missing API key: set OPENROUTER_API_KEY or pass api_key"
            ), 0)
          })?;

        let started = Instant::now();
        let max_attempts = self.retry.max_attempts();
        let mut last_error = None;
        let mut attempt = 1;

        while attempt <= max_attempts
        {   match self.attempt(&payload, api_key, attempt).await
            {   AttemptOutcome::Succeeded(raw) => {
                  return self.finish(raw, attempt, started)
                    .map_err(|e| (e, attempt));
                }
              , AttemptOutcome::Retrying(err) => {
                  let delay = self.retry.backoff_for_attempt(attempt);
                  self.logger.warn(&format!(
                    "Chat request attempt {}/{} failed: {}. Retrying in {}ms",
                    attempt, max_attempts, err, delay.as_millis()
                  ));
                  last_error = Some(err);
                  tokio::time::sleep(delay).await;
                }
              , AttemptOutcome::FailedPermanently(err) => {
                  return Err((err, attempt));
                }
              , AttemptOutcome::Exhausted(err) => {
                  last_error = Some(err);
                  break;
                }
            }
            attempt += 1;
        }

        let mut err = ServiceError::network(format!(
          "Chat request failed after {} attempts", max_attempts
        ));
        if let Some(last) = last_error
        {   err = err.with_cause(last);
        }
        Err((err, attempt.min(max_attempts)))
    }

    async fn attempt(
      &self
    , payload: &ChatRequest
    , api_key: &str
    , attempt: u32
    ) -> AttemptOutcome
    {   let has_more = self.retry.has_attempts_left(attempt);
        debug!("Chat request attempt {} to {}", attempt, self.endpoint);

        let mut request = self.http_client
          .post(&self.endpoint)
          .header("Content-Type", "application/json")
          .header("Accept", "application/json")
          .bearer_auth(api_key)
          .json(payload);
        if let Some(referer) = &self.referer
        {   request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title
        {   request = request.header("X-Title", title);
        }

        // Dropping the future on timeout aborts the in-flight request.
        let exchange = async {
          let response = request.send().await?;
          let status = response.status().as_u16();
          let body = response.text().await?;
          Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(self.timeout, exchange).await
        {   Err(elapsed) => {
              let err = ServiceError::network(format!(
                "Request timed out after {}ms", self.timeout.as_millis()
              )).with_cause(elapsed);
              if has_more
              {   AttemptOutcome::Retrying(err)
              } else
              {   AttemptOutcome::Exhausted(err)
              }
            }
          , Ok(Err(e)) => {
              let transient = is_transient_transport_error(&e);
              let err = ServiceError::network(format!(
                "Request to {} failed", self.endpoint
              )).with_cause(e);
              if transient && has_more
              {   AttemptOutcome::Retrying(err)
              } else
              {   AttemptOutcome::FailedPermanently(err)
              }
            }
          , Ok(Ok((status, body))) => {
              trace!("Chat response status: {}", status);
              classify_response(status, body, has_more)
            }
        }
    }

    fn finish(
      &self
    , raw: Value
    , attempts: u32
    , started: Instant
    ) -> Result<ChatResult>
    {   let envelope = CompletionEnvelope::from_raw(&raw)?;
        let choice = envelope.first_choice()?;
        let message = choice.message.as_ref()
          .ok_or_else(|| {
            ServiceError::api("Chat completion choice has no message")
          })?;
        let content = extract_text_content(&message.content)?;

        let parsed = match &self.response_format
        {   Some(format) => {
              let value = match &message.parsed
              {   Some(value) => value.clone()
                , None => parse_structured_content(&content)?
              };
              format.compiled.validate(&value)?;
              Some(value)
            }
          , None => None
        };

        let result = ChatResult
        {   id: envelope.id.clone()
          , model: envelope.model.clone()
              .unwrap_or_else(|| self.model.clone())
          , content
          , parsed
          , usage: envelope.usage.unwrap_or_default()
          , finish_reason: choice.finish_reason.clone()
          , attempts
          , raw
        };

        self.logger.info(&format!(
          "Chat completion from {} after {} attempt(s)",
          result.model, attempts
        ));
        if let Some(sink) = &self.usage_sink
        {   sink.record(&UsageRecord
            {   request_id: result.id.clone()
              , model: result.model.clone()
              , usage: result.usage
              , attempts
              , elapsed: started.elapsed()
            });
        }
        Ok(result)
    }
}

/// Decide what an HTTP response means for the retry loop
fn classify_response(status: u16, body: String, has_more: bool)
  -> AttemptOutcome
{   let success = (200..300).contains(&status);
    let parsed: Value = match serde_json::from_str(&body)
    {   Ok(value) => value
      , Err(e) if success => {
          return AttemptOutcome::FailedPermanently(
            ServiceError::api("Response body is not valid JSON")
              .with_status(status)
              .with_details(Value::String(body))
              .with_cause(e)
          );
        }
      , Err(_) => json!({ "message": body })
    };

    if success
    {   return AttemptOutcome::Succeeded(parsed);
    }

    let message = extract_error_message(&parsed, status);
    if is_retriable_status(status) && has_more
    {   return AttemptOutcome::Retrying(
          ServiceError::api(message)
            .with_status(status)
            .with_details(parsed)
        );
    }

    let err = if status == 401
    {   ServiceError::configuration(format!(
          "API key rejected: {}", message
        ))
    } else
    {   ServiceError::api(message)
    };
    AttemptOutcome::FailedPermanently(
      err.with_status(status).with_details(parsed)
    )
}

/// `Chat request failed after N attempt(s): <error>; caused by: <source>...`
fn failure_line(err: &ServiceError, attempts: u32) -> String
{   let mut line = format!(
      "Chat request failed after {} attempt(s): {}", attempts, err
    );
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source
    {   line.push_str("; caused by: ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}

fn non_blank(text: &str, what: &str) -> Result<String>
{   let trimmed = text.trim();
    if trimmed.is_empty()
    {   return Err(ServiceError::validation(format!(
          "{} must not be empty", what
        )));
    }
    Ok(trimmed.to_string())
}
