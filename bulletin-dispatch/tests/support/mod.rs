#![allow(dead_code)] // Shared by several test binaries; not every helper is used by each

pub mod scripted_relay;

#[path = "../../../bulletin-smtp/tests/support/mock_relay.rs"]
pub mod mock_relay;
