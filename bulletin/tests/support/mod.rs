#[path = "../../../bulletin-smtp/tests/support/mock_relay.rs"]
pub mod mock_relay;
