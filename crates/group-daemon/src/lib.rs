//! group-daemon library
//!
//! Exposes the daemon's socket plumbing, config and persistence for testing.

pub mod channel_server;
pub mod config;
pub mod node;
pub mod persistence;
pub mod tcp_relay;
pub mod udp;

pub use config::{ConfigError, DaemonConfig};
pub use persistence::StateStore;
