//! The dispatch loop.
//!
//! Recipients are handled strictly in order, one at a time, over a single
//! relay session:
//!
//! 1. Suppressed addresses are recorded as `skipped_blacklist` and never
//!    touch the counters or the rate limiter.
//! 2. Everyone else gets up to `max_attempts` attempts. Only a dropped
//!    session is retried, after a pause and a reconnect.
//!    A row without an address is never attempted and fails outright.
//! 3. The final failure is classified:
//!    - code 556 (invalid domain): `skipped`, carry on
//!    - policy violation text: `skipped_policy_violation`, pause, carry on
//!    - anything else: `failed`, and the run stops if `stop_on_error` is set
//!
//! A recipient's row is always written before the next recipient starts.

use std::{collections::BTreeMap, io::Write, time::Duration};

use bulletin_common::{internal, tracing};
use bulletin_smtp::client::{MessageBuilder, envelope_address};
use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, WaitReason},
    error::{DispatchError, Result},
    failure::FailureKind,
    rate_limiter::{RateLimitConfig, RateLimiter, RunCounters},
    recipients::Recipient,
    recorder::{OutcomeRecord, OutcomeRecorder, OutcomeStatus},
    relay::{OutgoingMessage, Relay},
    suppression::SuppressionSet,
    template::MessageTemplate,
};

/// Rejection code a relay uses for a destination domain that takes no mail.
pub const INVALID_DOMAIN_CODE: u16 = 556;

/// Detail recorded for suppressed recipients.
pub const SUPPRESSED_DETAIL: &str = "blacklisted";

/// Detail recorded for recipient rows without an address.
pub const MISSING_ADDRESS_DETAIL: &str = "missing address";

/// Retry and pause settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    /// Attempts per recipient, the first one included.
    ///
    /// Default: 3
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before reconnecting after the session dropped.
    ///
    /// Default: 5 seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Pause after a provider policy violation.
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "default_policy_violation_pause")]
    pub policy_violation_pause_secs: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            reconnect_delay_secs: default_reconnect_delay(),
            policy_violation_pause_secs: default_policy_violation_pause(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_reconnect_delay() -> u64 {
    5
}

const fn default_policy_violation_pause() -> u64 {
    600
}

/// Fixed headers of the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Mailbox for the From header, e.g. `News <news@example.com>`.
    pub from: String,
    pub subject: String,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every recipient reached a decision.
    Completed,
    /// `stop_on_error` halted the run on this recipient.
    Aborted { email: String, detail: String },
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Number of recipients handed to the dispatcher.
    pub recipients: usize,
    pub total_sent: u64,
    pub last_successful_email: Option<String>,
    /// Rows written per status.
    pub counts: BTreeMap<OutcomeStatus, usize>,
}

impl RunReport {
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or_default()
    }

    /// Recipients that received a row.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Drives one run over a list of recipients.
pub struct Dispatcher<'a> {
    suppression: &'a SuppressionSet,
    template: &'a MessageTemplate,
    email: &'a EmailConfig,
    clock: &'a dyn Clock,
    limiter: RateLimiter,
    policy: DispatchPolicy,
    stop_on_error: bool,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher with default pacing and policy that stops on
    /// the first unclassified failure.
    #[must_use]
    pub fn new(
        suppression: &'a SuppressionSet,
        template: &'a MessageTemplate,
        email: &'a EmailConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            suppression,
            template,
            email,
            clock,
            limiter: RateLimiter::new(RateLimitConfig::default()),
            policy: DispatchPolicy::default(),
            stop_on_error: true,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = RateLimiter::new(config);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Processes `recipients` in order over `relay`, which must already be
    /// open.
    ///
    /// Per-recipient failures are recorded, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Sender`] if the From mailbox is unusable and
    /// [`DispatchError::Recorder`] if a row cannot be written.
    pub async fn run<R, W>(
        &self,
        recipients: &[Recipient],
        relay: &mut R,
        recorder: &mut OutcomeRecorder<W>,
        counters: &mut RunCounters,
    ) -> Result<RunReport>
    where
        R: Relay + ?Sized,
        W: Write,
    {
        let sender = envelope_address(&self.email.from).map_err(DispatchError::Sender)?;
        let total = recipients.len();
        let mut counts = BTreeMap::new();

        for (index, recipient) in recipients.iter().enumerate() {
            let email = recipient.email.trim();

            if self.suppression.contains(email) {
                internal!(
                    level = INFO,
                    "Skipping {}/{}: {} (suppressed)",
                    index + 1,
                    total,
                    email
                );
                let record =
                    OutcomeRecord::new(email, OutcomeStatus::SkippedBlacklist, SUPPRESSED_DETAIL);
                Self::write(recorder, &record, &mut counts)?;
                continue;
            }

            internal!(level = INFO, "Processing {}/{}: {}", index + 1, total, email);

            let attempt = if email.is_empty() {
                Err(FailureKind::Other {
                    detail: MISSING_ADDRESS_DETAIL.to_string(),
                })
            } else {
                self.deliver(recipient, &sender, relay, counters).await
            };
            let failure = match attempt {
                Ok(()) => {
                    tracing::info!(email, "Sent");
                    let record = OutcomeRecord::new(email, OutcomeStatus::Success, "");
                    Self::write(recorder, &record, &mut counts)?;
                    continue;
                }
                Err(failure) => failure,
            };

            let status = Self::classify(&failure);
            let detail = failure.detail();
            Self::write(
                recorder,
                &OutcomeRecord::new(email, status, detail.as_str()),
                &mut counts,
            )?;

            match status {
                OutcomeStatus::Skipped => {
                    tracing::warn!(email, %detail, "Destination domain does not accept mail, skipped");
                }
                OutcomeStatus::SkippedPolicyViolation => {
                    tracing::warn!(email, %detail, "Provider reported a policy violation");
                    self.clock
                        .sleep(
                            Duration::from_secs(self.policy.policy_violation_pause_secs),
                            WaitReason::PolicyViolation,
                        )
                        .await;
                }
                _ => {
                    tracing::error!(email, %detail, "Failed to send");
                    if self.stop_on_error {
                        tracing::error!(
                            failed = email,
                            last_successful = counters.last_successful_email.as_deref().unwrap_or("none"),
                            total_sent = counters.total_sent,
                            "Stopping due to error"
                        );
                        return Ok(Self::report(
                            RunOutcome::Aborted {
                                email: email.to_string(),
                                detail,
                            },
                            total,
                            counters,
                            counts,
                        ));
                    }
                }
            }
        }

        tracing::info!(
            last_successful = counters.last_successful_email.as_deref().unwrap_or("none"),
            total_sent = counters.total_sent,
            "Run complete"
        );
        Ok(Self::report(RunOutcome::Completed, total, counters, counts))
    }

    /// Runs the attempt loop for one recipient.
    ///
    /// Only disconnects are retried. A reconnect that fails consumes an
    /// attempt of its own; if it fails with anything but a disconnect, that
    /// failure is final.
    async fn deliver<R: Relay + ?Sized>(
        &self,
        recipient: &Recipient,
        sender: &str,
        relay: &mut R,
        counters: &mut RunCounters,
    ) -> std::result::Result<(), FailureKind> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.limiter.before_send(counters, self.clock).await;

            let sent = match self.build(recipient, sender) {
                Ok(message) => relay.send(&message).await,
                Err(e) => Err(e),
            };
            let failure = match sent {
                Ok(()) => {
                    counters.record_success(recipient.email.trim(), self.clock.now());
                    return Ok(());
                }
                Err(e) => FailureKind::from(e),
            };

            if !failure.is_disconnect() || attempt >= max_attempts {
                return Err(failure);
            }

            tracing::warn!(
                email = recipient.email.trim(),
                %failure,
                "Connection lost, reconnecting in {}s",
                self.policy.reconnect_delay_secs
            );

            loop {
                self.clock
                    .sleep(
                        Duration::from_secs(self.policy.reconnect_delay_secs),
                        WaitReason::Reconnect,
                    )
                    .await;
                attempt += 1;
                internal!(level = INFO, "Retry attempt {}/{}", attempt, max_attempts);

                match relay.reopen().await {
                    Ok(()) => break,
                    Err(e) => {
                        let failure = FailureKind::from(e);
                        if !failure.is_disconnect() || attempt >= max_attempts {
                            return Err(failure);
                        }
                        tracing::warn!(%failure, "Reconnect failed");
                    }
                }
            }
        }
    }

    fn build(
        &self,
        recipient: &Recipient,
        sender: &str,
    ) -> bulletin_smtp::client::Result<OutgoingMessage> {
        let to = recipient.email.trim();
        let content = MessageBuilder::new()
            .from(self.email.from.as_str())
            .to(to)
            .subject(self.email.subject.as_str())
            .html(self.template.render(recipient))
            .build()?;

        Ok(OutgoingMessage {
            from: sender.to_string(),
            to: to.to_string(),
            content,
        })
    }

    fn classify(failure: &FailureKind) -> OutcomeStatus {
        if failure.code() == Some(INVALID_DOMAIN_CODE) {
            OutcomeStatus::Skipped
        } else if failure.is_policy_violation() {
            OutcomeStatus::SkippedPolicyViolation
        } else {
            OutcomeStatus::Failed
        }
    }

    fn write<W: Write>(
        recorder: &mut OutcomeRecorder<W>,
        record: &OutcomeRecord,
        counts: &mut BTreeMap<OutcomeStatus, usize>,
    ) -> Result<()> {
        recorder.record(record).map_err(DispatchError::Recorder)?;
        *counts.entry(record.status).or_default() += 1;
        Ok(())
    }

    fn report(
        outcome: RunOutcome,
        recipients: usize,
        counters: &RunCounters,
        counts: BTreeMap<OutcomeStatus, usize>,
    ) -> RunReport {
        RunReport {
            outcome,
            recipients,
            total_sent: counters.total_sent,
            last_successful_email: counters.last_successful_email.clone(),
            counts,
        }
    }
}
