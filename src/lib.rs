pub mod error;
pub mod config;
pub mod logger;
pub mod usage;
pub mod schema;
pub mod request;
pub mod response;
pub mod retry;
pub mod providers;
pub mod client;

/*

openrouter-chat: a chat-completion client for OpenRouter-compatible
endpoints, with retry/backoff and JSON-Schema checked structured output.

src/
├── lib.rs          # Re-exports and reply types
├── error.rs        # ServiceError and its four kinds
├── config.rs       # ClientConfig, sampling parameters, API key lookup
├── logger.rs       # info/warn/error sink
├── usage.rs        # token usage records, separate from error logs
├── schema.rs       # JSON Schema subset: compile + validate
├── request.rs      # outbound payload
├── response.rs     # ChatResult, content extraction, code fences
├── retry.rs        # retry policy and retriable statuses
├── providers/
│   ├── mod.rs
│   └── openrouter.rs  # ChatCompletionClient
└── client.rs       # ChatBackend: task-owned client shared over channels

*/

pub use client::ChatBackend;
pub use config::{ClientConfig, SamplingParameters};
pub use error::{ErrorKind, ServiceError};
pub use logger::{LogFacade, Logger};
pub use providers::openrouter::{
  ChatCompletionClient, ResponseFormatConfig, ResponseFormatOptions,
};
pub use response::{ChatResult, TokenUsage};
pub use retry::RetryPolicy;
pub use schema::JsonSchema;
pub use usage::{LogUsageSink, UsageRecord, UsageSink};

// ===== SendChatMessage =====

pub type SendChatReply = Result<ChatResult, ServiceError>;
pub type SendChatReplySender
  = tokio::sync::mpsc::UnboundedSender<SendChatReply>;

// ===== Configuration updates and shutdown =====

pub type UpdateReply = Result<(), ServiceError>;
pub type UpdateReplySender
  = tokio::sync::mpsc::UnboundedSender<UpdateReply>;
