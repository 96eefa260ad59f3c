//! Error types for transport sessions.

use bstr::BString;

use crate::transport::Direction;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`SmartTransport`](crate::SmartTransport) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was missing or empty.
    #[error("Invalid argument: {0}")]
    Argument(&'static str),

    /// The peer or the session violated the protocol.
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Refs were requested before the advertisement was loaded.
    #[error("The transport has not yet loaded the refs")]
    RefsNotLoaded,

    /// A phase operation was invoked on a session of the other direction.
    #[error("This operation is only valid for {0}")]
    WrongDirection(Direction),

    /// The remote reported a fatal error.
    #[error("Remote error: {0}")]
    Remote(BString),

    /// A visitor or cooperative poll point observed a cancellation request.
    #[error("The operation was cancelled")]
    Cancelled,

    /// Wire-level failure while parsing or encoding packets.
    #[error(transparent)]
    Wire(#[from] gix_smart_core::Error),

    /// I/O error on the active stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Subtransport-defined failure, propagated unchanged.
    #[error("Generic error: {0}")]
    Boxed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// `true` if this outcome is a cooperative cancellation.
    ///
    /// Cancellation is a non-fatal outcome distinct from protocol and I/O
    /// failures; callers typically do not log it as an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
