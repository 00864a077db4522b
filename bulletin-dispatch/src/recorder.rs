//! Per-run results file: one row per recipient that reached a decision.

use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bulletin_common::tracing;
use chrono::{DateTime, Local};

/// Header row of every results file.
pub const HEADER: [&str; 3] = ["email", "status", "error_message"];

/// Final status of one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeStatus {
    Success,
    SkippedBlacklist,
    /// The destination domain does not accept mail.
    Skipped,
    SkippedPolicyViolation,
    Failed,
}

impl OutcomeStatus {
    pub const ALL: [Self; 5] = [
        Self::Success,
        Self::SkippedBlacklist,
        Self::Skipped,
        Self::SkippedPolicyViolation,
        Self::Failed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SkippedBlacklist => "skipped_blacklist",
            Self::Skipped => "skipped",
            Self::SkippedPolicyViolation => "skipped_policy_violation",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown outcome status '{s}'"))
    }
}

/// One row of the results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub email: String,
    pub status: OutcomeStatus,
    pub detail: String,
}

impl OutcomeRecord {
    #[must_use]
    pub fn new(email: impl Into<String>, status: OutcomeStatus, detail: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Append-only CSV writer for [`OutcomeRecord`]s.
///
/// Each row is flushed as soon as it is written, so a crash loses nothing
/// already recorded.
pub struct OutcomeRecorder<W: Write> {
    writer: csv::Writer<W>,
    path: Option<PathBuf>,
    rows: usize,
}

/// Name of the results file for a run started at `started_at`.
#[must_use]
pub fn results_file_name(started_at: &DateTime<Local>) -> String {
    format!("sending_results_{}.csv", started_at.format("%Y%m%d_%H%M%S"))
}

impl OutcomeRecorder<File> {
    /// Creates `dir` if needed and starts a new results file in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created or the
    /// header cannot be written.
    pub fn create(dir: &Path, started_at: &DateTime<Local>) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(results_file_name(started_at));
        let file = File::create(&path)?;

        let mut recorder = Self::from_writer(file)?;
        tracing::info!(path = %path.display(), "Recording results");
        recorder.path = Some(path);
        Ok(recorder)
    }
}

impl<W: Write> OutcomeRecorder<W> {
    /// Wraps any writer and writes the header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn from_writer(writer: W) -> io::Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);
        writer.write_record(HEADER)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: None,
            rows: 0,
        })
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written or flushed.
    pub fn record(&mut self, record: &OutcomeRecord) -> io::Result<()> {
        self.writer
            .write_record([record.email.as_str(), record.status.as_str(), record.detail.as_str()])?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// File backing this recorder, if it writes to one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rows written so far, excluding the header.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered data cannot be flushed.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}
