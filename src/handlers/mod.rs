//! API handlers for the oracle relay

pub mod api;
pub mod oracles;

pub use api::{api_message, health_check};
pub use oracles::list_oracles;
