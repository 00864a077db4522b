//! The set of addresses that must never receive mail.

use std::{collections::HashSet, fs::File, path::Path};

use bulletin_common::{address, tracing};

use crate::error::LoadError;

const EMAIL_COLUMN: &str = "email";

/// Immutable lookup of suppressed addresses, normalized to lowercase.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSet {
    addresses: HashSet<String>,
}

impl SuppressionSet {
    /// Loads a suppression file.
    ///
    /// The file may carry a header row naming an `email` column, or be a
    /// single headerless column. In the headerless form a stray `email`
    /// value is ignored, as are blank values.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the file is missing, unreadable, or not
    /// valid CSV. Callers must not send anything in that case.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
        lock_shared(&file, path);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut rows = reader.records();
        let mut addresses = HashSet::new();

        let Some(first) = rows.next() else {
            tracing::info!(path = %path.display(), "Suppression list is empty");
            return Ok(Self { addresses });
        };
        let first = first.map_err(|e| LoadError::csv(path, e))?;

        let column = first
            .iter()
            .position(|field| field.eq_ignore_ascii_case(EMAIL_COLUMN));
        let headered = column.is_some();
        let column = column.unwrap_or(0);

        if !headered {
            insert(&mut addresses, first.get(column));
        }
        for row in rows {
            let row = row.map_err(|e| LoadError::csv(path, e))?;
            insert(&mut addresses, row.get(column));
        }

        tracing::info!(
            path = %path.display(),
            headered,
            count = addresses.len(),
            "Loaded suppression list"
        );

        Ok(Self { addresses })
    }

    /// Returns `true` if `email` is suppressed, ignoring case and
    /// surrounding whitespace.
    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        self.addresses.contains(&address::normalize(email))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for SuppressionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut addresses = HashSet::new();
        for email in iter {
            insert(&mut addresses, Some(email.as_ref()));
        }
        Self { addresses }
    }
}

fn insert(addresses: &mut HashSet<String>, value: Option<&str>) {
    let Some(value) = value.map(address::normalize) else {
        return;
    };
    if !value.is_empty() && value != EMAIL_COLUMN {
        addresses.insert(value);
    }
}

/// Takes a shared advisory lock for the duration of the read.
///
/// The lock goes away when `file` is closed. Failing to lock is not fatal.
#[cfg(unix)]
#[allow(unsafe_code)]
fn lock_shared(file: &File, path: &Path) {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH) };
    if rc != 0 {
        tracing::warn!(
            path = %path.display(),
            error = %std::io::Error::last_os_error(),
            "Unable to lock suppression list, reading anyway"
        );
    }
}

#[cfg(not(unix))]
const fn lock_shared(_file: &File, _path: &Path) {}
