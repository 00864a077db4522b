//! Builds the RFC 5322 message handed to DATA.

use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, FixedOffset, Local};
use data_encoding::BASE64;

use super::error::{ClientError, Result};

/// Length of a base64 body line, per RFC 2045.
const BODY_LINE_LEN: usize = 76;

/// Raw bytes per RFC 2047 encoded-word; keeps each word under 75 characters.
const ENCODED_WORD_CHUNK: usize = 45;

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Body flavour of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyKind {
    #[default]
    Html,
    Text,
}

impl BodyKind {
    const fn content_type(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Builder for a single-part message.
///
/// The body is always sent base64 encoded so that long HTML lines and
/// non-ASCII text survive relays that only accept 7-bit content.
///
/// ```
/// use bulletin_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("News <news@example.com>")
///     .to("reader@example.org")
///     .subject("Spring issue")
///     .html("<p>Hello</p>")
///     .build()
///     .unwrap();
/// assert!(message.contains("Subject: Spring issue\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: String,
    kind: BodyKind,
    date: Option<DateTime<FixedOffset>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header. Display names are allowed.
    #[must_use]
    pub fn from(mut self, mailbox: impl Into<String>) -> Self {
        self.from = Some(mailbox.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, mailbox: impl Into<String>) -> Self {
        self.to.push(mailbox.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header, emitted after the standard ones in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.kind = BodyKind::Html;
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.kind = BodyKind::Text;
        self
    }

    /// Overrides the Date header (defaults to the local time at build).
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the generated Message-ID. Angle brackets are added if missing.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Renders the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` if From or To are missing or the
    /// From mailbox cannot be parsed.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::BuilderError("missing From".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError("missing To".to_string()));
        }

        let date = self
            .date
            .unwrap_or_else(|| Local::now().fixed_offset())
            .to_rfc2822();
        let message_id = match self.message_id {
            Some(id) if id.starts_with('<') => id,
            Some(id) => format!("<{id}>"),
            None => generate_message_id(&envelope_address(from)?),
        };

        let mut message = String::with_capacity(self.body.len() * 4 / 3 + 1024);
        write!(message, "From: {from}\r\n")?;
        write!(message, "To: {}\r\n", self.to.join(", "))?;
        if let Some(subject) = &self.subject {
            write!(message, "Subject: {}\r\n", encode_header(subject))?;
        }
        write!(message, "Date: {date}\r\n")?;
        write!(message, "Message-ID: {message_id}\r\n")?;
        for (name, value) in &self.headers {
            write!(message, "{name}: {}\r\n", encode_header(value))?;
        }
        write!(message, "MIME-Version: 1.0\r\n")?;
        write!(message, "Content-Type: {}\r\n", self.kind.content_type())?;
        write!(message, "Content-Transfer-Encoding: base64\r\n")?;
        write!(message, "\r\n")?;

        let encoded = BASE64.encode(self.body.as_bytes());
        for chunk in encoded.as_bytes().chunks(BODY_LINE_LEN) {
            message.push_str(std::str::from_utf8(chunk)?);
            message.push_str("\r\n");
        }

        Ok(message)
    }
}

/// Extracts the bare address from a mailbox such as `News <news@example.com>`.
///
/// # Errors
///
/// Returns `ClientError::BuilderError` if the value is not a single mailbox.
pub fn envelope_address(mailbox: &str) -> Result<String> {
    let parsed = mailparse::addrparse(mailbox)
        .map_err(|e| ClientError::BuilderError(format!("Invalid mailbox '{mailbox}': {e}")))?;

    match parsed.iter().next() {
        Some(mailparse::MailAddr::Single(info)) if parsed.len() == 1 => Ok(info.addr.clone()),
        _ => Err(ClientError::BuilderError(format!(
            "Expected a single mailbox, got '{mailbox}'"
        ))),
    }
}

/// RFC 2047 encodes `value` when it is not plain printable ASCII.
fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + ENCODED_WORD_CHUNK).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        words.push(format!(
            "=?utf-8?B?{}?=",
            BASE64.encode(value[start..end].as_bytes())
        ));
        start = end;
    }

    words.join("\r\n ")
}

fn generate_message_id(sender: &str) -> String {
    let domain = sender.rsplit_once('@').map_or("localhost", |(_, d)| d);
    let sequence = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = Local::now().timestamp_nanos_opt().unwrap_or_default();

    format!("<{stamp:x}.{}.{sequence}@{domain}>", std::process::id())
}
