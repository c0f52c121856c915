//! Network module.
//!
//! Contains the Gateway (WebSocket listener), per-connection pumps, and the
//! connection registry.

pub mod connection;
pub mod gateway;
pub mod registry;

pub use connection::Connection;
pub use gateway::Gateway;
pub use registry::{ConnectionRegistry, Credential};
