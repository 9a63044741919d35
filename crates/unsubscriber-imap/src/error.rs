//! Error types for the IMAP scanner.

use thiserror::Error;
use unsubscriber_core::ConnectionError;

/// Errors that can occur while scanning a mailbox.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session could not be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Server returned NO.
    #[error("server returned NO: {0}")]
    No(String),

    /// Server returned BAD.
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// Protocol violation or unexpected data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A header could not be decoded.
    #[error("cannot decode {0:?}")]
    Decode(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
