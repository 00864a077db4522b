//! HTML message body with `${field}` placeholders.

use std::path::Path;

use crate::{error::LoadError, recipients::Recipient};

/// The message body shared by every recipient of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    body: String,
}

impl MessageTemplate {
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Reads the template once for the whole run.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the file cannot be read as UTF-8.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        std::fs::read_to_string(path)
            .map(Self::new)
            .map_err(|e| LoadError::io(path, e))
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replaces `${name}` with the recipient's `name` column.
    ///
    /// Names are matched case-insensitively. Placeholders without a matching
    /// column, and unterminated ones, are left as written.
    #[must_use]
    pub fn render(&self, recipient: &Recipient) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let name = after[..end].trim().to_lowercase();
            match recipient.field(&name) {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }
}
