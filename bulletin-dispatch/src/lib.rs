//! Newsletter dispatch: sends one templated message to a recipient list
//! over a single relay session.
//!
//! This crate provides:
//! - Loading of the suppression list, recipients and template
//! - Pacing between sends and cooldowns between batches
//! - The relay session abstraction and its SMTP implementation
//! - Failure classification and the per-recipient results file
//! - The dispatch loop tying it all together

mod clock;
mod engine;
mod error;
mod failure;
mod rate_limiter;
mod recipients;
mod recorder;
mod relay;
mod suppression;
mod template;

pub use clock::{Clock, ManualClock, SystemClock, WaitReason};
pub use engine::{
    DispatchPolicy, Dispatcher, EmailConfig, INVALID_DOMAIN_CODE, MISSING_ADDRESS_DETAIL,
    RunOutcome, RunReport, SUPPRESSED_DETAIL,
};
pub use error::{DispatchError, LoadError, Result};
pub use failure::{FailureKind, POLICY_VIOLATION_MARKER};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RunCounters};
pub use recipients::{Recipient, load_recipients};
pub use recorder::{HEADER, OutcomeRecord, OutcomeRecorder, OutcomeStatus, results_file_name};
pub use relay::{OutgoingMessage, Relay, RelayConfig, SmtpRelay};
pub use suppression::SuppressionSet;
pub use template::MessageTemplate;
