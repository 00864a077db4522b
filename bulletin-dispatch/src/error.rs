//! Typed errors for loading run inputs and for fatal run failures.
//!
//! Per-recipient failures are never errors at this level: they are
//! classified into [`crate::FailureKind`] and recorded. Everything here
//! ends the run before (or instead of) sending.

use std::path::PathBuf;

use bulletin_smtp::client::ClientError;
use thiserror::Error;

/// A run input (suppression list, recipients, template) could not be read.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A headered file lacks the column that holds addresses.
    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Sending without the suppression list is never allowed.
    #[error("Suppression list unavailable, refusing to send: {0}")]
    Suppression(#[source] LoadError),

    #[error("Recipient list unavailable: {0}")]
    Recipients(#[source] LoadError),

    #[error("Template unavailable: {0}")]
    Template(#[source] LoadError),

    /// The relay refused our credentials or offers no usable mechanism.
    #[error("Relay authentication failed: {0}")]
    Auth(#[source] ClientError),

    /// The relay could not be reached or the session could not be set up.
    #[error("Relay connection failed: {0}")]
    Connect(#[source] ClientError),

    /// The configured sender cannot be used as an envelope address.
    #[error("Invalid sender: {0}")]
    Sender(#[source] ClientError),

    #[error("Unable to write results: {0}")]
    Recorder(#[source] std::io::Error),
}

impl DispatchError {
    /// Sorts a session set-up failure into [`Self::Auth`] or [`Self::Connect`].
    #[must_use]
    pub fn from_session(error: ClientError) -> Self {
        match error {
            ClientError::AuthenticationFailed { .. } | ClientError::AuthUnsupported(_) => {
                Self::Auth(error)
            }
            _ => Self::Connect(error),
        }
    }
}

/// Specialized `Result` for fatal run failures.
pub type Result<T> = std::result::Result<T, DispatchError>;
