use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid event type: {0}")]
    InvalidEvent(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("no deferred tasks to be flushed")]
    EmptyQueue,
    #[error("queue entry already ran")]
    AlreadyRun,
    #[error("{0}")]
    Injected(InjectedError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("operation canceled before it ran")]
    Canceled,
    #[error("config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure configured by a test through `fail_next` or `force_cancel`.
///
/// Delivered through completions and cancel callbacks, never returned from
/// the call that enqueued the operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectedError {
    pub code: String,
    pub message: String,
}

impl InjectedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied() -> Self {
        Self::new("PERMISSION_DENIED", "permission denied")
    }
}

impl fmt::Display for InjectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<InjectedError> for Error {
    fn from(err: InjectedError) -> Self {
        Self::Injected(err)
    }
}
