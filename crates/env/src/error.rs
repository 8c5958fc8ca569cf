//! Environment error types.

use thiserror::Error;

/// Coarse classification of an [`EnvError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Provisioning,
    Discovery,
    ProtocolConnect,
    NotFound,
    Sequence,
    Closed,
    UnsupportedEvent,
    Evaluation,
    Runtime,
    Cdp,
    Timeout,
    Decode,
}

/// Errors that can occur while driving an environment.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("sandbox provisioning failed: {0}")]
    Provisioning(String),

    #[error("sandbox discovery failed: {0}")]
    Discovery(String),

    #[error("could not connect to devtools: {0}")]
    ProtocolConnect(String),

    #[error("likely 404 page (no base game found for {0})")]
    NotFound(String),

    #[error("{0}")]
    Sequence(&'static str),

    #[error("environment already closed")]
    Closed,

    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("JavaScript evaluation failed: {0}")]
    Evaluation(String),

    /// A container runtime invocation failed. Carries the invoking arguments.
    #[error("{command}: {message}")]
    Runtime { command: String, message: String },

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("observation decode failed: {0}")]
    Decode(String),

    #[error("{operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<EnvError>,
    },
}

impl EnvError {
    /// Wrap this error with the name of the operation that produced it.
    #[must_use]
    pub fn context(self, operation: &'static str) -> Self {
        Self::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// Classify the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Provisioning(_) => ErrorKind::Provisioning,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::ProtocolConnect(_) => ErrorKind::ProtocolConnect,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Sequence(_) => ErrorKind::Sequence,
            Self::Closed => ErrorKind::Closed,
            Self::UnsupportedEvent(_) => ErrorKind::UnsupportedEvent,
            Self::Evaluation(_) => ErrorKind::Evaluation,
            Self::Runtime { .. } => ErrorKind::Runtime,
            Self::Cdp(_) => ErrorKind::Cdp,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Context { source, .. } => source.kind(),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for EnvError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        match err {
            chromiumoxide::error::CdpError::JavascriptException(details) => {
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                EnvError::Evaluation(message)
            },
            other => EnvError::Cdp(other.to_string()),
        }
    }
}

/// Attach an operation name to the error side of a result.
pub trait ResultExt<T> {
    fn op(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

pub type Result<T> = std::result::Result<T, EnvError>;
