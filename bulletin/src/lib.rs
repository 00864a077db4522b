//! The `bulletin` command: configuration loading and the run controller
//! that wires the dispatch engine to a real relay.

pub mod config;
pub mod controller;

pub use controller::{Bulletin, Paths};
