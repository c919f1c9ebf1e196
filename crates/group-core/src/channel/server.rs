use super::request::{
    ENCRYPTED_BLOCK, ERROR_PREFIX, GOODBYE, OK, UNENCRYPTED_BLOCK, parse_request, read_block,
    read_line, write_line,
};
use super::{ChannelError, ChannelRequest, JoinRequest, LeaveRequest, Rejection, Result};
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// The creator's side of the channel.
pub trait ChannelHandler: Send + Sync {
    /// Decrypt an `EncryptedBlock` with this node's private key.
    fn open_request(&self, encrypted: &[u8]) -> Result<Vec<u8>>;

    fn handle_join(&self, from: Ipv4Addr, request: &JoinRequest) -> std::result::Result<(), Rejection>;

    fn handle_leave(
        &self,
        from: Ipv4Addr,
        request: &LeaveRequest,
    ) -> std::result::Result<(), Rejection>;
}

/// Serve one request on an accepted stream.
///
/// I/O and framing errors are returned; a request that can be read but not
/// honoured gets an `ERROR <token>` reply and `Ok(())`.
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    from: Ipv4Addr,
    handler: &dyn ChannelHandler,
) -> Result<()> {
    let framing = read_line(stream)?;
    let block = read_block(stream)?;
    let body = match framing.as_str() {
        ENCRYPTED_BLOCK => handler.open_request(&block),
        UNENCRYPTED_BLOCK => Ok(block),
        other => {
            return Err(ChannelError::Protocol(format!("unexpected framing '{other}'")));
        }
    };

    let verdict = body
        .and_then(|body| parse_request(&body))
        .map_err(|e| {
            warn!("Unreadable channel request from {}: {}", from, e);
            Rejection::Malformed
        })
        .and_then(|request| match request {
            ChannelRequest::Join(join) => handler.handle_join(from, &join),
            ChannelRequest::Leave(leave) => handler.handle_leave(from, &leave),
        });

    match verdict {
        Ok(()) => {
            write_line(stream, OK)?;
            stream.flush()?;
            match read_line(stream) {
                Ok(line) if line == GOODBYE => {}
                Ok(line) => debug!("Expected GoodBye from {}, got '{}'", from, line),
                Err(e) => debug!("No GoodBye from {}: {}", from, e),
            }
        }
        Err(rejection) => {
            write_line(stream, &format!("{ERROR_PREFIX}{}", rejection.token()))?;
            stream.flush()?;
        }
    }
    Ok(())
}
