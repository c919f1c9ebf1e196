//! In-process channel for tests.
//!
//! A [`MemoryConnector`] routes requests by IP to registered handlers and
//! runs both halves of the exchange over in-memory buffers.

use super::client::{await_verdict, send_request};
use super::{ChannelConnector, ChannelError, ChannelHandler, ChannelRequest, Result, serve_connection};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, Weak};

type Routes = Arc<Mutex<HashMap<Ipv4Addr, Weak<dyn ChannelHandler>>>>;

#[derive(Clone, Default)]
pub struct MemoryConnector {
    routes: Routes,
    local: Option<Ipv4Addr>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector sharing these routes whose requests come from `local`.
    pub fn bound_to(&self, local: Ipv4Addr) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
            local: Some(local),
        }
    }

    /// Serve requests addressed to `ip`. Only a weak reference is kept.
    pub fn register(&self, ip: Ipv4Addr, handler: &Arc<dyn ChannelHandler>) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ip, Arc::downgrade(handler));
    }

    fn handler(&self, ip: &Ipv4Addr) -> Option<Arc<dyn ChannelHandler>> {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(ip)
            .and_then(Weak::upgrade)
    }
}

impl ChannelConnector for MemoryConnector {
    fn exchange(
        &self,
        addr: SocketAddrV4,
        request: &ChannelRequest,
        creator_key: Option<&str>,
    ) -> Result<()> {
        let handler = self.handler(addr.ip()).ok_or_else(|| {
            ChannelError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening on {addr}"),
            ))
        })?;

        // The joiner writes its request, the server answers it, then the
        // joiner reads that answer.
        let mut joiner = Pipe::default();
        send_request(&mut joiner, request, creator_key)?;
        let mut sent = joiner.output;
        sent.extend_from_slice(b"GoodBye\n");

        let mut creator = Pipe::with_input(sent);
        serve_connection(&mut creator, self.local.unwrap_or(Ipv4Addr::LOCALHOST), &*handler)?;

        let mut verdict = Pipe::with_input(creator.output);
        await_verdict(&mut verdict)
    }
}

/// Reads from a fixed buffer, writes to another.
#[derive(Default)]
struct Pipe {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Pipe {
    fn with_input(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            ..Default::default()
        }
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{JoinRequest, LeaveRequest, Rejection};
    use crate::crypto::NodeKeyPair;
    use crate::protocol::GroupKind;

    struct Recorder {
        keys: NodeKeyPair,
        seen: Mutex<Vec<(Ipv4Addr, ChannelRequest)>>,
        verdict: std::result::Result<(), Rejection>,
    }

    impl ChannelHandler for Recorder {
        fn open_request(&self, encrypted: &[u8]) -> Result<Vec<u8>> {
            Ok(self.keys.decrypt(encrypted)?)
        }

        fn handle_join(
            &self,
            from: Ipv4Addr,
            request: &JoinRequest,
        ) -> std::result::Result<(), Rejection> {
            self.seen
                .lock()
                .unwrap()
                .push((from, ChannelRequest::Join(request.clone())));
            self.verdict
        }

        fn handle_leave(
            &self,
            from: Ipv4Addr,
            request: &LeaveRequest,
        ) -> std::result::Result<(), Rejection> {
            self.seen
                .lock()
                .unwrap()
                .push((from, ChannelRequest::Leave(request.clone())));
            self.verdict
        }
    }

    fn recorder(verdict: std::result::Result<(), Rejection>) -> Arc<Recorder> {
        Arc::new(Recorder {
            keys: NodeKeyPair::generate(),
            seen: Mutex::new(Vec::new()),
            verdict,
        })
    }

    fn join_request() -> ChannelRequest {
        ChannelRequest::Join(JoinRequest {
            kind: GroupKind::PublicManaged,
            node_id: "joiner".parse().unwrap(),
            group: "lobby".into(),
            join_data: Some(b"hello".to_vec()),
            public_key: None,
            nonce: None,
        })
    }

    const CREATOR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const JOINER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    #[test]
    fn test_plain_exchange_accepted() {
        let hub = MemoryConnector::new();
        let rec = recorder(Ok(()));
        let handler: Arc<dyn ChannelHandler> = rec.clone();
        hub.register(CREATOR, &handler);

        hub.bound_to(JOINER)
            .exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), None)
            .unwrap();
        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (JOINER, join_request()));
    }

    #[test]
    fn test_encrypted_exchange() {
        let hub = MemoryConnector::new();
        let rec = recorder(Ok(()));
        let key = rec.keys.public_base64();
        let handler: Arc<dyn ChannelHandler> = rec.clone();
        hub.register(CREATOR, &handler);

        hub.bound_to(JOINER)
            .exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), Some(&key))
            .unwrap();
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_encrypted_for_wrong_key_is_malformed() {
        let hub = MemoryConnector::new();
        let rec = recorder(Ok(()));
        let handler: Arc<dyn ChannelHandler> = rec.clone();
        hub.register(CREATOR, &handler);

        let stranger = NodeKeyPair::generate().public_base64();
        let err = hub
            .exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), Some(&stranger))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Rejected(ref t) if t == "Malformed"));
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejection_token_surfaces() {
        let hub = MemoryConnector::new();
        let rec = recorder(Err(Rejection::BadNonce));
        let handler: Arc<dyn ChannelHandler> = rec.clone();
        hub.register(CREATOR, &handler);

        let err = hub
            .exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), None)
            .unwrap_err();
        assert!(err.is_bad_nonce());
    }

    #[test]
    fn test_nobody_listening() {
        let hub = MemoryConnector::new();
        assert!(matches!(
            hub.exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), None),
            Err(ChannelError::Io(_))
        ));
    }

    #[test]
    fn test_dropped_handler_unreachable() {
        let hub = MemoryConnector::new();
        {
            let handler: Arc<dyn ChannelHandler> = recorder(Ok(()));
            hub.register(CREATOR, &handler);
        }
        assert!(hub
            .exchange(SocketAddrV4::new(CREATOR, 8500), &join_request(), None)
            .is_err());
    }
}
