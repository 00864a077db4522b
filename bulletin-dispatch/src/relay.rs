//! The single authenticated relay session used by a run.

use std::fmt;

use async_trait::async_trait;
use bulletin_common::tracing;
use bulletin_smtp::client::{ClientError, ConnectOptions, Result, Security, SmtpClient, Timeouts};
use serde::{Deserialize, Serialize};

/// One fully built message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Envelope sender (bare address).
    pub from: String,
    /// Envelope recipient.
    pub to: String,
    /// RFC 5322 message, CRLF line endings.
    pub content: String,
}

/// Owner of the relay session.
///
/// Implementations never retry on their own: after a disconnect the
/// dispatcher decides whether to call [`Relay::reopen`] and try again.
#[async_trait]
pub trait Relay: Send {
    /// Connects, authenticates and disconnects again.
    async fn verify(&mut self) -> Result<()>;

    /// Establishes the long-lived session.
    async fn open(&mut self) -> Result<()>;

    /// Sends one message over the live session.
    async fn send(&mut self, message: &OutgoingMessage) -> Result<()>;

    /// Drops the current session, if any, and opens a new one.
    async fn reopen(&mut self) -> Result<()>;

    /// Ends the session politely. Failures are only logged.
    async fn close(&mut self);
}

/// Where and how to reach the relay.
#[derive(Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,

    /// Default: 465
    #[serde(default = "default_port")]
    pub port: u16,

    /// Leave empty to skip authentication.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub security: Security,

    /// Default: `localhost`
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: Timeouts,
}

const fn default_port() -> u16 {
    465
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .field("helo_name", &self.helo_name)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl RelayConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            security: Security::default(),
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            timeouts: Timeouts::default(),
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            security: self.security,
            timeouts: self.timeouts.clone(),
            helo_name: self.helo_name.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

/// [`Relay`] backed by [`SmtpClient`].
pub struct SmtpRelay {
    config: RelayConfig,
    session: Option<SmtpClient>,
}

impl SmtpRelay {
    #[must_use]
    pub const fn new(config: RelayConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(SmtpClient::is_connected)
    }

    async fn connect_authenticated(&self) -> Result<SmtpClient> {
        let config = &self.config;
        tracing::debug!(host = %config.host, port = config.port, security = ?config.security, "Connecting to relay");

        let mut client =
            SmtpClient::connect(&config.host, config.port, config.connect_options()).await?;
        client.handshake().await?;

        if config.username.is_empty() {
            tracing::debug!("No username configured, skipping authentication");
        } else {
            client
                .authenticate(&config.username, &config.password)
                .await?;
        }

        Ok(client)
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn verify(&mut self) -> Result<()> {
        let mut client = self.connect_authenticated().await?;
        if let Err(e) = client.quit().await {
            tracing::debug!(error = %e, "QUIT after connection check failed");
        }
        tracing::info!(host = %self.config.host, "Relay connection check succeeded");
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        self.session = Some(self.connect_authenticated().await?);
        tracing::info!(host = %self.config.host, port = self.config.port, "Relay session open");
        Ok(())
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let session = self.session.as_mut().ok_or(ClientError::ConnectionClosed)?;
        session
            .send_mail(&message.from, &message.to, &message.content)
            .await?;
        Ok(())
    }

    async fn reopen(&mut self) -> Result<()> {
        self.session = None;
        self.open().await
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take()
            && session.is_connected()
            && let Err(e) = session.quit().await
        {
            tracing::warn!(error = %e, "Failed to close relay session cleanly");
        }
    }
}
