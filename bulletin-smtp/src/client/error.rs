//! Error types for the SMTP client.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors that can occur when talking to a relay.
///
/// Rejections carry the stage of the transaction that failed so callers can
/// tell a refused recipient from a refused sender or refused content.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a code the client did not expect at this point.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// The server refused the envelope sender (MAIL FROM).
    #[error("Sender refused: {code} {message}")]
    SenderRefused { code: u16, message: String },

    /// The server refused the recipient (RCPT TO).
    #[error("Recipient refused: {code} {message}")]
    RecipientRefused { code: u16, message: String },

    /// The server refused the DATA command or the message content.
    #[error("Message data rejected: {code} {message}")]
    DataRejected { code: u16, message: String },

    /// The server rejected the supplied credentials.
    #[error("Authentication failed: {code} {message}")]
    AuthenticationFailed { code: u16, message: String },

    /// The server offers no authentication mechanism the client speaks.
    #[error("Server does not support a usable AUTH mechanism (offered: {0})")]
    AuthUnsupported(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// A command did not complete in time.
    #[error("Timed out after {after:?} waiting for {command}")]
    Timeout { command: String, after: Duration },

    /// The message could not be assembled.
    #[error("Invalid message: {0}")]
    BuilderError(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),
}

impl ClientError {
    /// Returns `true` if the session is gone and must be re-established
    /// before anything else can be sent.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
