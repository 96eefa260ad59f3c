//! Error types for wire-level packet handling.

use bstr::BString;

/// Result type alias for wire-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while reading, decoding or encoding packets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pkt-line frame itself could not be decoded.
    #[error("Packetline decode error: {0}")]
    Decode(#[from] gix_packetline::decode::Error),

    /// A packet carried an unparseable object id.
    #[error("Invalid object id in packet: {0}")]
    InvalidId(#[from] gix_hash::decode::Error),

    /// A packet had a recognizable type but malformed structure.
    #[error("Malformed {kind} packet: {line:?}")]
    Malformed {
        /// The packet type that failed to parse.
        kind: &'static str,
        /// The offending line, without its framing.
        line: BString,
    },
}
