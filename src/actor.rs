use std::error::Error as StdError;
use std::fmt;
use tracing::error;
use tracing_error::SpanTrace;

/// Error type carried across actor boundaries. Wraps the cause together with
/// the span trace captured where the error was created, so the log line at
/// the actor root still points at the failing operation.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    cause: ErrorKind,
    trace: SpanTrace,
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Fatal(anyhow::Error),
    #[error(transparent)]
    NonFatal(#[from] anyhow::Error),
}

impl Error {
    pub fn fatal(cause: anyhow::Error) -> Self {
        Self {
            cause: ErrorKind::Fatal(cause),
            trace: SpanTrace::capture(),
        }
    }

    pub fn non_fatal(cause: anyhow::Error) -> Self {
        Self {
            cause: ErrorKind::NonFatal(cause),
            trace: SpanTrace::capture(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, fmt)
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(cause: E) -> Self {
        Self {
            cause: ErrorKind::from(cause),
            trace: SpanTrace::capture(),
        }
    }
}

/// Shared `Actor::error` hook. Only a `Fatal` error stops the owning actor;
/// everything else is logged and absorbed so the next periodic cycle still
/// gets its turn.
pub fn handle_error(error: Box<dyn StdError + Send + Sync>) -> bool {
    let (message, stop_actor, trace) = match error.downcast_ref::<Error>() {
        Some(e) => (
            format!("{:?}", e.cause),
            matches!(&e.cause, ErrorKind::Fatal(_)),
            Some(&e.trace),
        ),
        None => (format!("{:?}", error), false, None),
    };

    error!(
        %stop_actor,
        "ActorError: {} SpanTrace: {}",
        message,
        trace
            .map(|t| format!("{}", t))
            .unwrap_or_else(|| String::from("None"))
    );

    stop_actor
}
