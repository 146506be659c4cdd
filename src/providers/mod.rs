//! Chat-completion endpoint clients

pub mod openrouter;

// Re-export for convenience
pub use openrouter::ChatCompletionClient;
