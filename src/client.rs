use serde_json::Value;
use tokio::sync::mpsc;
use log::{debug, error, info};

use crate::config::{ClientConfig, SamplingParameters};
use crate::error::ServiceError;
use crate::providers::openrouter::{ChatCompletionClient, ResponseFormatOptions};

/// Commands processed by the backend task, strictly in arrival order
pub enum BackendCommand
{   SendChatMessage
    {   message: String
      , reply: crate::SendChatReplySender
    }
  , SetSystemMessage
    {   text: String
      , reply: crate::UpdateReplySender
    }
  , ClearSystemMessage
    {   reply: crate::UpdateReplySender
    }
  , SetResponseFormat
    {   schema: Value
      , options: ResponseFormatOptions
      , reply: crate::UpdateReplySender
    }
  , ClearResponseFormat
    {   reply: crate::UpdateReplySender
    }
  , SetModel
    {   name: String
      , parameters: Option<SamplingParameters>
      , reply: crate::UpdateReplySender
    }
  , Shutdown
    {   reply: crate::UpdateReplySender
    }
}

/// Handle to a task that owns one `ChatCompletionClient`.
/// Any number of callers can share it; configuration changes and sends
/// are applied one at a time, so a send always sees the configuration
/// set before it was queued.
pub struct ChatBackend
{   tx: mpsc::UnboundedSender<BackendCommand>
  , _task_handle: tokio::task::JoinHandle<()>
}

impl ChatBackend
{   /// Create and spawn a new backend.
    /// Returns immediately - spawns background task
    pub fn new(config: ClientConfig) -> Self
    {   Self::with_client(ChatCompletionClient::new(config))
    }

    pub fn with_client(client: ChatCompletionClient) -> Self
    {   debug!("Creating ChatBackend with task ownership");
        let (tx, rx) = mpsc::unbounded_channel();
        let _task_handle = tokio::spawn(async move {
          run_backend_loop(rx, client).await
        });
        ChatBackend
        {   tx
          , _task_handle
        }
    }

    fn queue(&self, cmd: BackendCommand) -> Result<(), ServiceError>
    {   self.tx.send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            ServiceError::configuration("Chat backend is shut down")
          })
    }

    async fn await_update(
      mut rx: mpsc::UnboundedReceiver<crate::UpdateReply>
    ) -> crate::UpdateReply
    {   rx.recv().await.unwrap_or_else(|| {
          Err(ServiceError::configuration(
            "Chat backend stopped before replying"
          ))
        })
    }

    /// Queue a send - returns almost immediately
    pub fn send_chat_message(
      &self
    , message: impl Into<String>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SendChatReply>,
        ServiceError
      >
    {   let (reply, reply_rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::SendChatMessage
        {   message: message.into()
          , reply
        })?;
        Ok(reply_rx)
    }

    /// Queue a send and wait for its result
    pub async fn chat(&self, message: impl Into<String>)
      -> crate::SendChatReply
    {   let mut rx = self.send_chat_message(message)?;
        rx.recv().await.unwrap_or_else(|| {
          Err(ServiceError::configuration(
            "Chat backend stopped before replying"
          ))
        })
    }

    pub async fn set_system_message(&self, text: impl Into<String>)
      -> crate::UpdateReply
    {   let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::SetSystemMessage
        {   text: text.into()
          , reply
        })?;
        Self::await_update(rx).await
    }

    pub async fn clear_system_message(&self) -> crate::UpdateReply
    {   let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::ClearSystemMessage { reply })?;
        Self::await_update(rx).await
    }

    pub async fn set_response_format(
      &self
    , schema: Value
    , options: ResponseFormatOptions
    ) -> crate::UpdateReply
    {   let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::SetResponseFormat
        {   schema
          , options
          , reply
        })?;
        Self::await_update(rx).await
    }

    pub async fn clear_response_format(&self) -> crate::UpdateReply
    {   let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::ClearResponseFormat { reply })?;
        Self::await_update(rx).await
    }

    pub async fn set_model(
      &self
    , name: impl Into<String>
    , parameters: Option<SamplingParameters>
    ) -> crate::UpdateReply
    {   let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::SetModel
        {   name: name.into()
          , parameters
          , reply
        })?;
        Self::await_update(rx).await
    }

    /// Gracefully shutdown the backend
    pub async fn shutdown(self) -> crate::UpdateReply
    {   debug!("Shutting down ChatBackend");
        let (reply, rx) = mpsc::unbounded_channel();
        self.queue(BackendCommand::Shutdown { reply })?;
        Self::await_update(rx).await
    }
}

/// Main backend event loop
async fn run_backend_loop(
  mut rx: mpsc::UnboundedReceiver<BackendCommand>
, mut client: ChatCompletionClient
)
{   debug!("Starting ChatBackend event loop");
    while let Some(cmd) = rx.recv().await
    { match cmd
      {   BackendCommand::SendChatMessage { message, reply } => {
            debug!("Processing SendChatMessage");
            let result = client.send_chat_message(&message).await;
            let _ = reply.send(result);
          }
        , BackendCommand::SetSystemMessage { text, reply } => {
            let _ = reply.send(client.set_system_message(&text));
          }
        , BackendCommand::ClearSystemMessage { reply } => {
            client.clear_system_message();
            let _ = reply.send(Ok(()));
          }
        , BackendCommand::SetResponseFormat { schema, options, reply } => {
            let _ = reply.send(
              client.set_response_format(schema, options)
            );
          }
        , BackendCommand::ClearResponseFormat { reply } => {
            client.clear_response_format();
            let _ = reply.send(Ok(()));
          }
        , BackendCommand::SetModel { name, parameters, reply } => {
            let _ = reply.send(client.set_model(&name, parameters));
          }
        , BackendCommand::Shutdown { reply } => {
            let _ = reply.send(Ok(()));
            info!("ChatBackend shutting down");
            break;
          }
      }
    }
    debug!("ChatBackend event loop finished");
}
