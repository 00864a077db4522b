//! SMTP submission client for bulletin.
//!
//! Only the client half of the protocol lives here: connecting to a relay
//! (implicit TLS, STARTTLS or plaintext), authenticating, and running one
//! mail transaction at a time over a long-lived session.

pub mod client;
