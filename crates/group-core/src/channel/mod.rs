//! Join/leave channel for managed groups.
//!
//! A short request/response exchange over a reliable stream:
//!
//! ```text
//! joiner                                   creator
//!   EncryptedBlock | UnencryptedBlock  ->
//!   block(request)                     ->
//!                                      <-  OK | ERROR <token>
//!   GoodBye                            ->
//! ```
//!
//! The request is ECIES-encrypted for the creator when its public key is
//! known. Lines are `\n`-terminated UTF-8; blocks are a big-endian `u32`
//! length followed by that many bytes.

mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
mod request;
mod server;

pub use client::{ChannelConnector, TcpConnector, run_exchange};
pub use request::{
    ChannelRequest, JoinRequest, LeaveRequest, Rejection, encode_request, parse_request,
};
pub use server::{ChannelHandler, serve_connection};

use crate::crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

impl ChannelError {
    /// True if the creator refused the proof of password knowledge.
    pub fn is_bad_nonce(&self) -> bool {
        matches!(self, ChannelError::Rejected(token) if token == Rejection::BadNonce.token())
    }
}
