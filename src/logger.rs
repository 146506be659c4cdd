//! Operator-facing log sink used by the chat client

/// Sink for the client's info/warn/error lines
pub trait Logger: Send + Sync
{   fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default sink: forwards to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl Logger for LogFacade
{   fn info(&self, message: &str)
    {   log::info!("{}", message);
    }

    fn warn(&self, message: &str)
    {   log::warn!("{}", message);
    }

    fn error(&self, message: &str)
    {   log::error!("{}", message);
    }
}
