//! SMTP client session with implicit TLS, STARTTLS, AUTH and mail transactions.

use std::time::Duration;

use bulletin_common::{incoming, outgoing, tracing};
use data_encoding::BASE64;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::error::Elapsed,
};

use super::{
    error::{ClientError, Result},
    options::{ConnectOptions, Security},
    response::{Capabilities, Response},
    tls,
};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = tls::connector(accept_invalid_certs)?;
                let tls_stream = connector
                    .connect(tls::server_name(domain)?, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

/// One session with a relay.
///
/// A session is opened with [`SmtpClient::connect`], greeted with
/// [`SmtpClient::handshake`], optionally authenticated, and can then carry
/// any number of [`SmtpClient::send_mail`] transactions until [`SmtpClient::quit`].
///
/// Whenever a read or write fails in a way that leaves the stream unusable,
/// or a command times out, the connection is dropped so later calls fail
/// fast with [`ClientError::ConnectionClosed`].
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    options: ConnectOptions,
    capabilities: Capabilities,
}

impl SmtpClient {
    /// Connects to `host:port` and reads the 220 greeting.
    ///
    /// With [`Security::Tls`] the TLS handshake happens before the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, the TLS handshake, or the greeting
    /// fails.
    pub async fn connect(host: &str, port: u16, options: ConnectOptions) -> Result<Self> {
        let connect_timeout = options.timeouts.connect();
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout {
                command: format!("connection to {host}:{port}"),
                after: connect_timeout,
            })??;

        let mut connection = ClientConnection::Plain(stream);
        if options.security == Security::Tls {
            connection = tokio::time::timeout(
                connect_timeout,
                connection.upgrade_to_tls(host, options.accept_invalid_certs),
            )
            .await
            .map_err(|_| ClientError::Timeout {
                command: "TLS handshake".to_string(),
                after: connect_timeout,
            })??;
        }

        let mut client = Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain: host.to_string(),
            options,
            capabilities: Capabilities::default(),
        };

        let after = client.options.timeouts.command();
        let result = tokio::time::timeout(after, client.read_response()).await;
        let greeting = client.settle("greeting", after, result)?;
        if greeting.code != 220 {
            return Err(ClientError::UnexpectedResponse {
                code: greeting.code,
                message: greeting.message(),
            });
        }

        Ok(client)
    }

    /// Sends EHLO (falling back to HELO), upgrading with STARTTLS first when
    /// the session is configured for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the greeting or STARTTLS is
    /// required but unavailable.
    pub async fn handshake(&mut self) -> Result<&Capabilities> {
        self.ehlo().await?;

        if self.options.security == Security::StartTls {
            if !self.capabilities.supports("STARTTLS") {
                return Err(ClientError::TlsError(
                    "Server does not advertise STARTTLS".to_string(),
                ));
            }

            let response = self.command("STARTTLS").await?;
            if response.code != 220 {
                return Err(ClientError::TlsError(format!(
                    "Server rejected STARTTLS: {} {}",
                    response.code,
                    response.message()
                )));
            }

            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            let after = self.options.timeouts.connect();
            let upgraded = tokio::time::timeout(
                after,
                connection.upgrade_to_tls(&self.server_domain, self.options.accept_invalid_certs),
            )
            .await;
            self.connection = Some(self.settle("STARTTLS handshake", after, upgraded)?);
            self.buffer_pos = 0;

            // RFC 3207: forget everything learned before the upgrade.
            self.ehlo().await?;
        }

        Ok(&self.capabilities)
    }

    async fn ehlo(&mut self) -> Result<()> {
        let helo_name = self.options.helo_name.clone();
        let response = self.command(&format!("EHLO {helo_name}")).await?;

        if response.is_success() {
            self.capabilities = Capabilities::from_ehlo(&response);
            return Ok(());
        }

        let response = self.command(&format!("HELO {helo_name}")).await?;
        if !response.is_success() {
            return Err(ClientError::UnexpectedResponse {
                code: response.code,
                message: response.message(),
            });
        }
        self.capabilities = Capabilities::default();
        Ok(())
    }

    /// Authenticates with the first mechanism both sides support,
    /// preferring PLAIN over LOGIN.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AuthenticationFailed` if the credentials are
    /// refused and `ClientError::AuthUnsupported` if no mechanism matches.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let mechanisms = self.capabilities.auth_mechanisms();

        if mechanisms.iter().any(|m| m == "PLAIN") {
            self.auth_plain(username, password).await
        } else if mechanisms.iter().any(|m| m == "LOGIN") {
            self.auth_login(username, password).await
        } else if mechanisms.is_empty() {
            Err(ClientError::AuthUnsupported("none".to_string()))
        } else {
            Err(ClientError::AuthUnsupported(mechanisms.join(" ")))
        }
    }

    async fn auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        // RFC 4616: [authzid] NUL authcid NUL passwd
        let payload = BASE64.encode(format!("\0{username}\0{password}").as_bytes());

        let mut response = self
            .secret_command(&format!("AUTH PLAIN {payload}"), "AUTH PLAIN <redacted>")
            .await?;
        if response.code == 334 {
            response = self.secret_command(&payload, "<redacted>").await?;
        }

        expect_authenticated(&response)
    }

    async fn auth_login(&mut self, username: &str, password: &str) -> Result<()> {
        let mut response = self.command("AUTH LOGIN").await?;
        if response.code == 334 {
            response = self
                .secret_command(&BASE64.encode(username.as_bytes()), "<username>")
                .await?;
        }
        if response.code == 334 {
            response = self
                .secret_command(&BASE64.encode(password.as_bytes()), "<redacted>")
                .await?;
        }

        expect_authenticated(&response)
    }

    /// Runs one complete mail transaction for a single recipient.
    ///
    /// Rejections are reported with the stage that failed. After a rejection
    /// before the end of DATA the transaction is reset so the session can be
    /// reused for the next message.
    ///
    /// # Errors
    ///
    /// Returns `SenderRefused`, `RecipientRefused` or `DataRejected` for
    /// server rejections, or a transport error.
    pub async fn send_mail(&mut self, from: &str, to: &str, content: &str) -> Result<Response> {
        let response = self.command(&format!("MAIL FROM:<{from}>")).await?;
        if !response.is_success() {
            self.reset().await;
            return Err(ClientError::SenderRefused {
                code: response.code,
                message: response.message(),
            });
        }

        let response = self.command(&format!("RCPT TO:<{to}>")).await?;
        if !response.is_success() {
            self.reset().await;
            return Err(ClientError::RecipientRefused {
                code: response.code,
                message: response.message(),
            });
        }

        let response = self.command("DATA").await?;
        if !response.is_intermediate() {
            self.reset().await;
            return Err(ClientError::DataRejected {
                code: response.code,
                message: response.message(),
            });
        }

        let after = self.options.timeouts.data();
        let result = tokio::time::timeout(after, self.send_data(content)).await;
        let response = self.settle("message data", after, result)?;
        if !response.is_success() {
            return Err(ClientError::DataRejected {
                code: response.code,
                message: response.message(),
            });
        }

        Ok(response)
    }

    /// Sends QUIT and drops the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await;
        self.connection = None;
        response
    }

    /// Extensions from the most recent EHLO.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends a raw command and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails or times out.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.secret_command(command, command).await
    }

    /// Like [`Self::command`] but logs `shown` instead of the real line.
    async fn secret_command(&mut self, command: &str, shown: &str) -> Result<Response> {
        let after = self.options.timeouts.command();
        let label = shown.split_whitespace().next().unwrap_or(shown).to_string();
        let result = tokio::time::timeout(after, self.exchange(command, shown)).await;
        self.settle(&label, after, result)
    }

    async fn exchange(&mut self, command: &str, shown: &str) -> Result<Response> {
        outgoing!("{shown}");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_response().await
    }

    /// Best-effort RSET after a rejected transaction.
    async fn reset(&mut self) {
        if let Err(e) = self.command("RSET").await {
            tracing::debug!(error = %e, "RSET after rejected transaction failed");
        }
    }

    /// Transmits message content with dot-stuffing and the end-of-data marker.
    async fn send_data(&mut self, content: &str) -> Result<Response> {
        let mut wire = String::with_capacity(content.len() + 64);
        for line in content.split_inclusive('\n') {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.starts_with('.') {
                wire.push('.');
            }
            wire.push_str(line);
            wire.push_str("\r\n");
        }
        wire.push_str(".\r\n");

        outgoing!("<{} bytes of message data>", wire.len());
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(wire.as_bytes())
            .await?;

        self.read_response().await
    }

    /// Drops the connection when `result` left it in an unknown state.
    fn settle<T>(
        &mut self,
        label: &str,
        after: Duration,
        result: std::result::Result<Result<T>, Elapsed>,
    ) -> Result<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_disconnect() {
                    self.connection = None;
                }
                Err(e)
            }
            Err(_) => {
                self.connection = None;
                Err(ClientError::Timeout {
                    command: label.to_string(),
                    after,
                })
            }
        }
    }

    /// Forgets the session after an unreadable reply; the stream position
    /// is unknown, so nothing more can be read from it.
    fn discard_connection(&mut self) {
        self.connection = None;
        self.buffer_pos = 0;
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            let parsed = match Response::parse_response(&self.buffer[..self.buffer_pos]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.discard_connection();
                    return Err(e);
                }
            };
            if let Some((response, consumed)) = parsed {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    self.discard_connection();
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

fn expect_authenticated(response: &Response) -> Result<()> {
    if response.code == 235 {
        Ok(())
    } else {
        Err(ClientError::AuthenticationFailed {
            code: response.code,
            message: response.message(),
        })
    }
}
