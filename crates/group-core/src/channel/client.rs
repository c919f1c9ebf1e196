use super::request::{
    ENCRYPTED_BLOCK, ERROR_PREFIX, GOODBYE, OK, UNENCRYPTED_BLOCK, encode_request, read_line,
    write_block, write_line,
};
use super::{ChannelError, ChannelRequest, Result};
use crate::crypto::encrypt_for;
use std::io::{Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;
use tracing::debug;

/// Opens the stream a join or leave request travels over.
pub trait ChannelConnector: Send + Sync {
    /// Deliver `request` to the creator at `addr` and wait for its verdict.
    /// `creator_key` is the creator's base64 public key, if advertised.
    fn exchange(
        &self,
        addr: SocketAddrV4,
        request: &ChannelRequest,
        creator_key: Option<&str>,
    ) -> Result<()>;
}

/// Blocking TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConnector for TcpConnector {
    fn exchange(
        &self,
        addr: SocketAddrV4,
        request: &ChannelRequest,
        creator_key: Option<&str>,
    ) -> Result<()> {
        let mut stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        run_exchange(&mut stream, request, creator_key)
    }
}

/// Run the joiner's half of the exchange over an already open stream.
pub fn run_exchange<S: Read + Write>(
    stream: &mut S,
    request: &ChannelRequest,
    creator_key: Option<&str>,
) -> Result<()> {
    send_request(stream, request, creator_key)?;
    await_verdict(stream)
}

/// Write the request block, sealed for the creator when its key is known.
pub fn send_request<W: Write>(
    stream: &mut W,
    request: &ChannelRequest,
    creator_key: Option<&str>,
) -> Result<()> {
    let body = encode_request(request)?;
    match creator_key {
        Some(key) => {
            write_line(stream, ENCRYPTED_BLOCK)?;
            write_block(stream, &encrypt_for(key, &body)?)?;
        }
        None => {
            write_line(stream, UNENCRYPTED_BLOCK)?;
            write_block(stream, &body)?;
        }
    }
    stream.flush()?;
    Ok(())
}

/// Read the creator's answer and say goodbye if it accepted.
pub fn await_verdict<S: Read + Write>(stream: &mut S) -> Result<()> {
    let reply = read_line(stream)?;
    if reply == OK {
        write_line(stream, GOODBYE)?;
        stream.flush()?;
        return Ok(());
    }
    match reply.strip_prefix(ERROR_PREFIX) {
        Some(token) => {
            debug!("Channel request refused: {}", token);
            Err(ChannelError::Rejected(token.to_string()))
        }
        None => Err(ChannelError::Protocol(format!("unexpected reply '{reply}'"))),
    }
}
