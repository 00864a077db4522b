//! SMTP client for submitting mail to an authenticated relay.
//!
//! The client keeps one session open for as long as the caller wants it and
//! runs one transaction per message. It supports:
//!
//! - Implicit TLS (SMTPS), STARTTLS, or plaintext connections
//! - AUTH PLAIN and AUTH LOGIN
//! - Stage-specific rejection errors (sender, recipient, data)
//! - Per-command timeouts
//!
//! # Example
//!
//! ```no_run
//! use bulletin_smtp::client::{ConnectOptions, MessageBuilder, Security, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ConnectOptions {
//!     security: Security::Tls,
//!     ..ConnectOptions::default()
//! };
//! let mut client = SmtpClient::connect("smtp.example.com", 465, options).await?;
//! client.handshake().await?;
//! client.authenticate("news@example.com", "secret").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("news@example.com")
//!     .to("reader@example.org")
//!     .subject("Hello")
//!     .html("<p>Hello</p>")
//!     .build()?;
//! client
//!     .send_mail("news@example.com", "reader@example.org", &message)
//!     .await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod options;
mod response;
mod smtp_client;
mod tls;

pub use error::{ClientError, Result};
pub use message::{BodyKind, MessageBuilder, envelope_address};
pub use options::{ConnectOptions, Security, Timeouts};
pub use response::{Capabilities, Response, ResponseLine};
pub use smtp_client::SmtpClient;
