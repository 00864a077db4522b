//! Pieces shared by every bulletin crate: logging setup, the logging macros,
//! and address normalisation.

pub mod address;
pub mod logging;

pub use tracing;
