//! Recipient list loading.

use std::{collections::BTreeMap, path::Path};

use bulletin_common::tracing;

use crate::error::LoadError;

const EMAIL_COLUMN: &str = "email";

/// One row of the recipient file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// 1-based position of the data row in the file.
    pub row: usize,
    /// The address exactly as it appears in the file, trimmed.
    pub email: String,
    /// Every column of the row, keyed by header, for template substitution.
    pub fields: BTreeMap<String, String>,
}

impl Recipient {
    /// Builds a recipient with no extra fields.
    #[must_use]
    pub fn new(row: usize, email: impl Into<String>) -> Self {
        let email = email.into();
        let fields = BTreeMap::from([(EMAIL_COLUMN.to_string(), email.clone())]);
        Self { row, email, fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Reads the recipient file in order.
///
/// A header row naming an `email` column is required. Rows with a blank
/// address are kept so the run records them as failed.
///
/// # Errors
///
/// Returns a [`LoadError`] if the file cannot be read, is not valid CSV, or
/// has no `email` column.
pub fn load_recipients(path: &Path) -> Result<Vec<Recipient>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::csv(path, e))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LoadError::csv(path, e))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    let Some(column) = headers.iter().position(|h| h == EMAIL_COLUMN) else {
        return Err(LoadError::MissingColumn {
            path: path.to_path_buf(),
            column: EMAIL_COLUMN.to_string(),
        });
    };

    let mut recipients = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| LoadError::csv(path, e))?;
        let row = index + 1;

        let email = record.get(column).unwrap_or_default();
        if email.is_empty() {
            tracing::warn!(row, "Recipient row has no address");
        }

        let fields = headers
            .iter()
            .cloned()
            .zip(record.iter().map(ToString::to_string))
            .collect();
        recipients.push(Recipient {
            row,
            email: email.to_string(),
            fields,
        });
    }

    tracing::info!(path = %path.display(), count = recipients.len(), "Loaded recipients");
    Ok(recipients)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_rows_keep_order_and_fields() {
        let file = file_with("Email,name\na@example.com,Ann\n,Nobody\nb@example.com,Ben\n");
        let recipients = load_recipients(file.path()).unwrap();

        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[0].email, "a@example.com");
        assert_eq!(recipients[0].row, 1);
        assert_eq!(recipients[0].field("name"), Some("Ann"));
        assert_eq!(recipients[1].email, "");
        assert_eq!(recipients[1].field("name"), Some("Nobody"));
        assert_eq!(recipients[2].email, "b@example.com");
        assert_eq!(recipients[2].row, 3);
    }

    #[test]
    fn test_missing_email_column() {
        let file = file_with("address,name\na@example.com,Ann\n");
        let result = load_recipients(file.path());
        assert!(matches!(result, Err(LoadError::MissingColumn { .. })));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_recipients(&dir.path().join("nope.csv")).is_err());
    }

    #[test]
    fn test_new_has_email_field() {
        let recipient = Recipient::new(7, "x@example.com");
        assert_eq!(recipient.field("email"), Some("x@example.com"));
    }
}
