use thiserror::Error;

/// Failure raised while converting a raw response body into a typed value.
///
/// Converters can only fail with this type; the dispatch handles route it to
/// the active callback's failure method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    // ---
    message: String,
}

impl ConversionError {
    /// Create a conversion error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        // ---
        Self {
            message: message.into(),
        }
    }

    /// Borrow the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json: {err}"))
    }
}

/// Errors that can occur while building, dispatching or completing a call
/// or a subscription.
///
/// `Error` is `Clone` because a handle caches its creation fault and replays
/// the same value to every later caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O-level failure while creating the raw transport operation
    /// (payload encoding, connection setup). Recoverable and cached.
    #[error("unable to create request: {0}")]
    Construction(String),

    /// Any other recoverable failure while creating the raw operation
    /// (malformed arguments, unresolved topic placeholders). Cached.
    #[error("unexpected failure: {0}")]
    Unexpected(String),

    /// Unrecoverable failure. Never cached, always returned to the caller.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The response payload could not be converted into the target type.
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The transport reported a failure (disconnect, closed subscription).
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The in-flight exchange was canceled.
    #[error("canceled")]
    Canceled,

    /// The handle already issued its terminal dispatch action.
    #[error("already executed")]
    AlreadyExecuted,

    /// A reply was expected but the request has no reply route.
    #[error("request has no reply route")]
    MissingReplyRoute,

    /// A required configuration value was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value was provided but is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true for faults that must never be cached on a handle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Returns true for faults that a handle may cache and replay.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
