use std::fmt;
use std::sync::Arc;

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{   /// Missing/invalid credentials or setup. Never retried.
    Configuration
  , /// Bad caller input, bad schema, or a response failing the schema
    Validation
  , /// Transport failure that exhausted retries
    Network
  , /// Remote endpoint returned a failure or a broken payload
    Api
}

impl ErrorKind
{   pub fn code(&self) -> &'static str
    {   match self
        {   ErrorKind::Configuration => "CONFIGURATION_ERROR"
          , ErrorKind::Validation => "VALIDATION_ERROR"
          , ErrorKind::Network => "NETWORK_ERROR"
          , ErrorKind::Api => "API_ERROR"
        }
    }
}

impl fmt::Display for ErrorKind
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.code())
    }
}

pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Error raised by every public operation of the chat client.
/// Implements Clone for sending through channels
#[derive(Debug, Clone)]
pub struct ServiceError
{   pub kind: ErrorKind
  , pub message: String
  , /// HTTP status of the failing response, if any
    pub status: Option<u16>
  , /// Raw error payload or extra context
    pub details: Option<serde_json::Value>
  , /// JSON pointer of a schema mismatch, e.g. `#/flashcards/0`
    pub pointer: Option<String>
  , pub cause: Option<Cause>
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError
{   pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self
    {   ServiceError
        {   kind
          , message: message.into()
          , status: None
          , details: None
          , pointer: None
          , cause: None
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self
    {   Self::new(ErrorKind::Configuration, message)
    }

    pub fn validation(message: impl Into<String>) -> Self
    {   Self::new(ErrorKind::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self
    {   Self::new(ErrorKind::Network, message)
    }

    pub fn api(message: impl Into<String>) -> Self
    {   Self::new(ErrorKind::Api, message)
    }

    pub fn with_status(mut self, status: u16) -> Self
    {   self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self
    {   self.details = Some(details);
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self
    {   self.pointer = Some(pointer.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
      E: std::error::Error + Send + Sync + 'static
    {   self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> &'static str
    {   self.kind.code()
    }

    /// Configuration and validation failures are the caller's fault
    /// (4xx-equivalent); network and API failures are upstream (5xx).
    pub fn is_client_error(&self) -> bool
    {   matches!(
          self.kind,
          ErrorKind::Configuration | ErrorKind::Validation
        )
    }
}

impl fmt::Display for ServiceError
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   write!(f, "[{}] {}", self.kind.code(), self.message)?;
        if let Some(status) = self.status
        {   write!(f, " (status {})", status)?;
        }
        if let Some(pointer) = &self.pointer
        {   write!(f, " at {}", pointer)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError
{   fn source(&self) -> Option<&(dyn std::error::Error + 'static)>
    {   self.cause
          .as_deref()
          .map(|c| c as &(dyn std::error::Error + 'static))
    }
}
