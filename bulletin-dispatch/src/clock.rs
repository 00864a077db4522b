//! Time source and waiting for the dispatcher.
//!
//! All pauses the engine takes go through [`Clock`], so a run can be driven
//! by [`ManualClock`] without any real time passing.

use std::{
    io::{IsTerminal, Write},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bulletin_common::tracing;
use parking_lot::Mutex;

/// Why the dispatcher is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitReason {
    /// Minimum spacing between two sends.
    Spacing,
    /// Cooldown after a full batch.
    BatchCooldown,
    /// Pause before re-establishing a dropped session.
    Reconnect,
    /// Pause after the provider reported a policy violation.
    PolicyViolation,
}

impl WaitReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spacing => "spacing",
            Self::BatchCooldown => "batch cooldown",
            Self::Reconnect => "reconnect delay",
            Self::PolicyViolation => "policy violation pause",
        }
    }

    /// Long waits are shown to the operator as a countdown.
    const fn is_operator_visible(self) -> bool {
        matches!(self, Self::BatchCooldown | Self::PolicyViolation)
    }
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Blocks the run for `duration`. Never cancelled from within.
    async fn sleep(&self, duration: Duration, reason: WaitReason);
}

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    async fn countdown(duration: Duration, reason: WaitReason) {
        let mut remaining = duration;
        let mut stderr = std::io::stderr();
        while !remaining.is_zero() {
            let _ = write!(stderr, "\r{reason}: {:>5}s remaining ", remaining.as_secs());
            let _ = stderr.flush();

            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        let _ = writeln!(stderr, "\r{reason}: done{:<20}", "");
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration, reason: WaitReason) {
        if duration.is_zero() {
            return;
        }

        if reason.is_operator_visible() {
            tracing::info!(
                seconds = duration.as_secs_f64(),
                reason = %reason,
                "Pausing"
            );
            if std::io::stderr().is_terminal() {
                Self::countdown(duration, reason).await;
                return;
            }
        } else {
            tracing::debug!(seconds = duration.as_secs_f64(), reason = %reason, "Waiting");
        }

        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// Every call to [`Clock::sleep`] advances the clock by the requested
/// duration immediately and is recorded for later inspection.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    waits: Mutex<Vec<(Duration, WaitReason)>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            waits: Mutex::new(Vec::new()),
        }
    }

    /// Moves time forward without recording a wait, as if work took `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Every wait taken so far, in order.
    #[must_use]
    pub fn waits(&self) -> Vec<(Duration, WaitReason)> {
        self.waits.lock().clone()
    }

    /// Waits taken for `reason`, in order.
    #[must_use]
    pub fn waits_for(&self, reason: WaitReason) -> Vec<Duration> {
        self.waits
            .lock()
            .iter()
            .filter(|(_, r)| *r == reason)
            .map(|(d, _)| *d)
            .collect()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    async fn sleep(&self, duration: Duration, reason: WaitReason) {
        self.waits.lock().push((duration, reason));
        self.advance(duration);
    }
}
