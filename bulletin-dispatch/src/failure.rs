//! Classification of a failed send attempt.
//!
//! Every transport or protocol error that reaches the dispatcher is turned
//! into a [`FailureKind`] here, once. The engine only ever looks at the
//! classified value.

use bulletin_smtp::client::ClientError;

/// Text a provider includes when it rejects the sending pattern itself.
pub const POLICY_VIOLATION_MARKER: &str = "policy violation";

/// What went wrong with one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The session is gone; reconnecting and retrying may help.
    Disconnected { detail: String },

    /// The relay refused this recipient or this message.
    Rejected { code: u16, message: String },

    /// Anything else.
    Other { detail: String },
}

impl FailureKind {
    /// Returns `true` if the failure text reports a provider policy violation.
    ///
    /// The check is a case-insensitive substring match and applies to every
    /// kind of failure.
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        let text = match self {
            Self::Rejected { message, .. } => message,
            Self::Disconnected { detail } | Self::Other { detail } => detail,
        };
        text.to_lowercase().contains(POLICY_VIOLATION_MARKER)
    }

    /// Returns the SMTP status code of a rejection.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The text written to the results file for this failure.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Rejected { code, message } => format!("{code} {message}").trim().to_string(),
            Self::Disconnected { detail } | Self::Other { detail } => detail.clone(),
        }
    }

    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl From<ClientError> for FailureKind {
    fn from(error: ClientError) -> Self {
        if error.is_disconnect() {
            return Self::Disconnected {
                detail: error.to_string(),
            };
        }

        match error {
            ClientError::RecipientRefused { code, message }
            | ClientError::DataRejected { code, message } => Self::Rejected { code, message },
            other => Self::Other {
                detail: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail())
    }
}
