//! Sender-side pacing: a minimum gap between sends plus a cooldown after
//! every full batch.
//!
//! # Example
//!
//! ```text
//! emails_per_batch: 3, delay_between_emails: 2.0, batch_delay: 60
//! - send 1 immediately
//! - sends 2 and 3 at least 2s after the previous one
//! - before send 4: wait 60s, counter back to 0
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, WaitReason};

/// Pacing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sends allowed before a cooldown.
    ///
    /// Default: 50
    #[serde(default = "default_emails_per_batch")]
    pub emails_per_batch: u32,

    /// Minimum seconds between two consecutive sends.
    ///
    /// Default: 2.0
    #[serde(default = "default_delay_between_emails")]
    pub delay_between_emails: f64,

    /// Seconds to pause once a batch is full.
    ///
    /// Default: 300 (5 minutes)
    #[serde(default = "default_batch_delay")]
    pub batch_delay: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            emails_per_batch: default_emails_per_batch(),
            delay_between_emails: default_delay_between_emails(),
            batch_delay: default_batch_delay(),
        }
    }
}

const fn default_emails_per_batch() -> u32 {
    50
}

const fn default_delay_between_emails() -> f64 {
    2.0
}

const fn default_batch_delay() -> u64 {
    300
}

/// Run-scoped counters, owned by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Sends since the last batch cooldown.
    pub sent_count: u32,
    /// Sends over the whole run. Never reset.
    pub total_sent: u64,
    pub last_send_time: Option<Instant>,
    pub last_successful_email: Option<String>,
}

impl RunCounters {
    /// Notes a successful send to `email` at `at`.
    pub fn record_success(&mut self, email: &str, at: Instant) {
        self.sent_count += 1;
        self.total_sent += 1;
        self.last_send_time = Some(at);
        self.last_successful_email = Some(email.to_string());
    }
}

/// Applies [`RateLimitConfig`] before every transmission attempt.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn spacing(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.delay_between_emails).unwrap_or(Duration::ZERO)
    }

    /// Waits as required before the next attempt.
    ///
    /// A full batch takes precedence: the cooldown is taken and the batch
    /// counter reset, and the spacing rule is not applied on that call.
    /// Otherwise the remainder of the minimum spacing since the last send is
    /// waited out.
    pub async fn before_send(&self, counters: &mut RunCounters, clock: &dyn Clock) {
        if counters.sent_count >= self.config.emails_per_batch {
            bulletin_common::internal!(
                level = INFO,
                "Batch of {} reached, cooling down for {}s",
                counters.sent_count,
                self.config.batch_delay
            );
            clock
                .sleep(
                    Duration::from_secs(self.config.batch_delay),
                    WaitReason::BatchCooldown,
                )
                .await;
            counters.sent_count = 0;
            return;
        }

        let Some(last) = counters.last_send_time else {
            return;
        };
        let elapsed = clock.now().saturating_duration_since(last);
        let spacing = self.spacing();
        if elapsed < spacing {
            clock.sleep(spacing - elapsed, WaitReason::Spacing).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(batch: u32, spacing: f64, cooldown: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            emails_per_batch: batch,
            delay_between_emails: spacing,
            batch_delay: cooldown,
        })
    }

    #[tokio::test]
    async fn test_first_send_does_not_wait() {
        let clock = ManualClock::new();
        let mut counters = RunCounters::default();

        limiter(10, 2.0, 60).before_send(&mut counters, &clock).await;
        assert!(clock.waits().is_empty());
    }

    #[tokio::test]
    async fn test_spacing_waits_for_the_remainder() {
        let clock = ManualClock::new();
        let mut counters = RunCounters::default();
        counters.record_success("a@example.com", clock.now());
        clock.advance(Duration::from_millis(500));

        limiter(10, 2.0, 60).before_send(&mut counters, &clock).await;
        assert_eq!(
            clock.waits_for(WaitReason::Spacing),
            vec![Duration::from_millis(1500)]
        );
    }

    #[tokio::test]
    async fn test_no_wait_once_spacing_elapsed() {
        let clock = ManualClock::new();
        let mut counters = RunCounters::default();
        counters.record_success("a@example.com", clock.now());
        clock.advance(Duration::from_secs(3));

        limiter(10, 2.0, 60).before_send(&mut counters, &clock).await;
        assert!(clock.waits().is_empty());
    }

    #[tokio::test]
    async fn test_full_batch_cools_down_and_resets() {
        let clock = ManualClock::new();
        let mut counters = RunCounters::default();
        counters.record_success("a@example.com", clock.now());
        counters.record_success("b@example.com", clock.now());

        limiter(2, 2.0, 60).before_send(&mut counters, &clock).await;

        // The cooldown replaces the spacing wait on this call.
        assert_eq!(
            clock.waits(),
            vec![(Duration::from_secs(60), WaitReason::BatchCooldown)]
        );
        assert_eq!(counters.sent_count, 0);
        assert_eq!(counters.total_sent, 2);
    }

    #[tokio::test]
    async fn test_invalid_spacing_is_treated_as_zero() {
        let clock = ManualClock::new();
        let mut counters = RunCounters::default();
        counters.record_success("a@example.com", clock.now());

        limiter(10, f64::NAN, 60).before_send(&mut counters, &clock).await;
        assert!(clock.waits().is_empty());
    }
}
