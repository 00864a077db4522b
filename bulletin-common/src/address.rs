//! Address normalisation.
//!
//! Recipient and suppression files are written by people, so addresses are
//! compared after trimming surrounding whitespace and lowercasing. No further
//! canonicalisation (dots, plus-tags) is attempted.

/// Returns the canonical comparison form of `address`.
#[must_use]
pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}
