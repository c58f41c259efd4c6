//! HTTP surface of the session relay.
pub mod bridge_gateway;

pub use bridge_gateway::*;
