//! Mock submission relay for exercising the client and the dispatcher
//!
//! The relay speaks enough SMTP to accept authenticated submissions and can:
//! - Require AUTH PLAIN / LOGIN with fixed credentials
//! - Reject chosen recipients at RCPT TO or after DATA
//! - Drop the connection when a chosen recipient is attempted
//! - Record every command and delivered message for assertions
#![allow(dead_code)] // Shared by several test binaries; not every helper is used by each

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use data_encoding::BASE64;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{Mutex, RwLock},
    time::timeout,
};

/// Command seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Other(String),
}

/// A message accepted after DATA.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub from: String,
    pub to: String,
    pub content: String,
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct RelayConfig {
    greeting: Reply,
    auth_mechanisms: Vec<String>,
    credentials: Option<(String, String)>,
    mail_from_response: Reply,
    rcpt_rejections: HashMap<String, Reply>,
    data_rejections: HashMap<String, Reply>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.relay ESMTP ready"),
            auth_mechanisms: vec!["PLAIN".to_string(), "LOGIN".to_string()],
            credentials: None,
            mail_from_response: Reply::new(250, "OK"),
            rcpt_rejections: HashMap::new(),
            data_rejections: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct RelayState {
    commands: RwLock<Vec<SmtpCommand>>,
    delivered: RwLock<Vec<Delivered>>,
    /// Remaining forced disconnects per recipient.
    drops: Mutex<HashMap<String, usize>>,
    connections: AtomicUsize,
}

/// Mock relay listening on a random local port.
pub struct MockRelay {
    addr: SocketAddr,
    state: Arc<RelayState>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder::default()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.state.commands.read().await.clone()
    }

    pub async fn delivered(&self) -> Vec<Delivered> {
        self.state.delivered.read().await.clone()
    }

    /// Number of TCP connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    async fn read_line(
        reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>,
        line: &mut String,
    ) -> std::io::Result<bool> {
        line.clear();
        match timeout(Duration::from_secs(10), reader.read_line(line)).await {
            Ok(Ok(0)) | Err(_) => Ok(false),
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
        }
    }

    fn credentials_match(config: &RelayConfig, username: &str, password: &str) -> bool {
        config
            .credentials
            .as_ref()
            .is_none_or(|(u, p)| u == username && p == password)
    }

    fn decode(value: &str) -> String {
        BASE64
            .decode(value.trim().as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<RelayConfig>,
        state: Arc<RelayState>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut from = String::new();
        let mut to = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;

        while Self::read_line(&mut reader, &mut line).await? {
            let cmd_line = line.trim_end().to_string();
            let (verb, rest) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(v, r)| (v, r));
            let verb = verb.to_ascii_uppercase();

            let (command, reply) = match verb.as_str() {
                "EHLO" => {
                    let mut caps = vec!["mock.relay".to_string(), "SIZE 10000000".to_string()];
                    if !config.auth_mechanisms.is_empty() {
                        caps.push(format!("AUTH {}", config.auth_mechanisms.join(" ")));
                    }
                    let last = caps.len() - 1;
                    let mut bytes = Vec::new();
                    for (i, cap) in caps.iter().enumerate() {
                        let sep = if i == last { ' ' } else { '-' };
                        bytes.extend_from_slice(format!("250{sep}{cap}\r\n").as_bytes());
                    }
                    (SmtpCommand::Ehlo(rest.to_string()), bytes)
                }
                "HELO" => (
                    SmtpCommand::Helo(rest.to_string()),
                    Reply::new(250, "Hello").to_bytes(),
                ),
                "AUTH" => {
                    let (mechanism, initial) =
                        rest.split_once(' ').map_or((rest, None), |(m, i)| (m, Some(i)));
                    let mechanism = mechanism.to_ascii_uppercase();
                    state
                        .commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(mechanism.clone()));

                    let (username, password) = match mechanism.as_str() {
                        "PLAIN" => {
                            let payload = if let Some(initial) = initial {
                                initial.to_string()
                            } else {
                                writer.write_all(b"334 \r\n").await?;
                                if !Self::read_line(&mut reader, &mut line).await? {
                                    return Ok(());
                                }
                                line.trim_end().to_string()
                            };
                            let decoded = Self::decode(&payload);
                            let mut parts = decoded.split('\0').skip(1);
                            (
                                parts.next().unwrap_or_default().to_string(),
                                parts.next().unwrap_or_default().to_string(),
                            )
                        }
                        "LOGIN" => {
                            writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                            if !Self::read_line(&mut reader, &mut line).await? {
                                return Ok(());
                            }
                            let username = Self::decode(&line);
                            writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                            if !Self::read_line(&mut reader, &mut line).await? {
                                return Ok(());
                            }
                            (username, Self::decode(&line))
                        }
                        _ => {
                            writer
                                .write_all(&Reply::new(504, "Unrecognized mechanism").to_bytes())
                                .await?;
                            continue;
                        }
                    };

                    let reply = if Self::credentials_match(&config, &username, &password) {
                        Reply::new(235, "Authentication successful")
                    } else {
                        Reply::new(535, "5.7.8 Authentication credentials invalid")
                    };
                    writer.write_all(&reply.to_bytes()).await?;
                    continue;
                }
                "MAIL" => {
                    from = rest.trim_start_matches("FROM:").trim_matches(['<', '>']).to_string();
                    (
                        SmtpCommand::MailFrom(from.clone()),
                        config.mail_from_response.to_bytes(),
                    )
                }
                "RCPT" => {
                    to = rest.trim_start_matches("TO:").trim_matches(['<', '>']).to_string();
                    state
                        .commands
                        .write()
                        .await
                        .push(SmtpCommand::RcptTo(to.clone()));

                    let mut drops = state.drops.lock().await;
                    if let Some(remaining) = drops.get_mut(&to)
                        && *remaining > 0
                    {
                        *remaining -= 1;
                        return Ok(());
                    }
                    drop(drops);

                    let reply = config
                        .rcpt_rejections
                        .get(&to)
                        .cloned()
                        .unwrap_or_else(|| Reply::new(250, "OK"));
                    writer.write_all(&reply.to_bytes()).await?;
                    continue;
                }
                "DATA" => {
                    state.commands.write().await.push(SmtpCommand::Data);
                    writer
                        .write_all(&Reply::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;

                    let mut content = String::new();
                    loop {
                        if !Self::read_line(&mut reader, &mut line).await? {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        let unstuffed = line.strip_prefix('.').unwrap_or(&line);
                        content.push_str(unstuffed);
                    }

                    let reply = if let Some(rejection) = config.data_rejections.get(&to) {
                        rejection.clone()
                    } else {
                        state.delivered.write().await.push(Delivered {
                            from: from.clone(),
                            to: to.clone(),
                            content,
                        });
                        Reply::new(250, "OK: queued")
                    };
                    writer.write_all(&reply.to_bytes()).await?;
                    continue;
                }
                "RSET" => (SmtpCommand::Rset, Reply::new(250, "Reset").to_bytes()),
                "QUIT" => {
                    state.commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(cmd_line.clone()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            state.commands.write().await.push(command);
            writer.write_all(&reply).await?;
        }

        Ok(())
    }
}

/// Builder for a [`MockRelay`].
#[derive(Default)]
pub struct MockRelayBuilder {
    config: RelayConfig,
    drops: HashMap<String, usize>,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Only accept these credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.config.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Advertise these AUTH mechanisms (empty disables AUTH).
    #[must_use]
    pub fn with_auth_mechanisms(mut self, mechanisms: &[&str]) -> Self {
        self.config.auth_mechanisms = mechanisms.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = Reply::new(code, message);
        self
    }

    /// Reject `recipient` at RCPT TO.
    #[must_use]
    pub fn reject_recipient(mut self, recipient: &str, code: u16, message: &str) -> Self {
        self.config
            .rcpt_rejections
            .insert(recipient.to_string(), Reply::new(code, message));
        self
    }

    /// Reject the message content for `recipient` after DATA.
    #[must_use]
    pub fn reject_data_for(mut self, recipient: &str, code: u16, message: &str) -> Self {
        self.config
            .data_rejections
            .insert(recipient.to_string(), Reply::new(code, message));
        self
    }

    /// Close the connection without replying the next `times` times
    /// `recipient` is given in RCPT TO.
    #[must_use]
    pub fn drop_connection_on(mut self, recipient: &str, times: usize) -> Self {
        self.drops.insert(recipient.to_string(), times);
        self
    }

    /// Bind to a random port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let state = Arc::new(RelayState {
            drops: Mutex::new(self.drops),
            ..RelayState::default()
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let config = Arc::clone(&config);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = MockRelay::handle_client(stream, config, state).await;
                });
            }
        });

        Ok(MockRelay { addr, state })
    }
}
