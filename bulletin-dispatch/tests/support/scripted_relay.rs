//! In-memory [`Relay`] that answers from a per-recipient script.

use std::{
    collections::{HashMap, VecDeque},
    io,
};

use async_trait::async_trait;
use bulletin_dispatch::{OutgoingMessage, Relay};
use bulletin_smtp::client::{ClientError, Result};

/// What the relay does with one send (or reopen).
#[derive(Debug, Clone)]
pub enum Step {
    Deliver,
    /// The session drops mid-transaction.
    Disconnect,
    /// RCPT TO refused.
    RejectRecipient(u16, &'static str),
    /// Content refused after DATA.
    RejectData(u16, &'static str),
    /// MAIL FROM refused.
    RejectSender(u16, &'static str),
    /// Reconnect refused at the TCP level.
    Refuse,
}

impl Step {
    fn into_result(self) -> Result<()> {
        match self {
            Self::Deliver => Ok(()),
            Self::Disconnect => Err(ClientError::Io(io::Error::from(
                io::ErrorKind::ConnectionReset,
            ))),
            Self::RejectRecipient(code, message) => Err(ClientError::RecipientRefused {
                code,
                message: message.to_string(),
            }),
            Self::RejectData(code, message) => Err(ClientError::DataRejected {
                code,
                message: message.to_string(),
            }),
            Self::RejectSender(code, message) => Err(ClientError::SenderRefused {
                code,
                message: message.to_string(),
            }),
            Self::Refuse => Err(ClientError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
        }
    }
}

/// Every call the engine made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Verify,
    Open,
    Send(String),
    Reopen,
    Close,
}

/// Relay whose answers are scripted per recipient.
///
/// Recipients without a script (or whose script ran out) are delivered.
#[derive(Debug, Default)]
pub struct ScriptedRelay {
    sends: HashMap<String, VecDeque<Step>>,
    reopens: VecDeque<Step>,
    pub calls: Vec<Call>,
    pub delivered: Vec<OutgoingMessage>,
}

impl ScriptedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues answers for sends to `to`.
    pub fn script(mut self, to: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.sends
            .entry(to.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Queues answers for reopen calls; unscripted reopens succeed.
    pub fn script_reopens(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.reopens.extend(steps);
        self
    }

    /// Addresses a send was attempted for, in order, with repeats.
    pub fn attempted(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Send(to) => Some(to.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reopen_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::Reopen).count()
    }
}

#[async_trait]
impl Relay for ScriptedRelay {
    async fn verify(&mut self) -> Result<()> {
        self.calls.push(Call::Verify);
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        self.calls.push(Call::Open);
        Ok(())
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        self.calls.push(Call::Send(message.to.clone()));
        let step = self
            .sends
            .get_mut(&message.to)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Deliver);

        let result = step.into_result();
        if result.is_ok() {
            self.delivered.push(message.clone());
        }
        result
    }

    async fn reopen(&mut self) -> Result<()> {
        self.calls.push(Call::Reopen);
        self.reopens
            .pop_front()
            .unwrap_or(Step::Deliver)
            .into_result()
    }

    async fn close(&mut self) {
        self.calls.push(Call::Close);
    }
}
