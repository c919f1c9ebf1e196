//! TCP relay interface.
//!
//! Carries broadcasts to relay nodes beyond the local broadcast domains.
//! Each datagram travels as a big-endian `u32` length followed by the
//! packet.
//!
//! Sends never touch the network. They queue the packet for a writer task
//! owning that relay's stream, so a slow or dead relay cannot stall the
//! engine. A writer that fails to connect drops packets until its back-off
//! delay has passed.

use group_core::transport::{InterfaceSpec, Result, TransportError};
use group_core::{GroupManager, InterfaceId, InterfaceKind, Nic, NetworkInterface};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Frames above this are treated as a broken stream.
pub const MAX_FRAME: usize = 65_535;

/// Packets waiting per relay before sends start failing.
pub const QUEUE_DEPTH: usize = 256;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct TcpRelayInterface {
    relays: Vec<SocketAddrV4>,
    queues: HashMap<SocketAddrV4, mpsc::Sender<Vec<u8>>>,
}

impl TcpRelayInterface {
    /// Spawn one writer per relay on the current tokio runtime.
    pub fn new(relays: Vec<SocketAddrV4>) -> io::Result<Self> {
        Self::with_queue_depth(relays, QUEUE_DEPTH)
    }

    pub fn with_queue_depth(relays: Vec<SocketAddrV4>, depth: usize) -> io::Result<Self> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        let mut queues = HashMap::new();
        for relay in &relays {
            if queues.contains_key(relay) {
                continue;
            }
            let (tx, rx) = mpsc::channel(depth);
            runtime.spawn(run_writer(*relay, rx));
            queues.insert(*relay, tx);
        }
        info!("TCP relay interface with {} relay node(s)", queues.len());
        Ok(Self { relays, queues })
    }

    pub fn from_spec(spec: &InterfaceSpec) -> Result<Self> {
        Ok(Self::new(spec.relay_nodes.clone())?)
    }

    pub fn relays(&self) -> &[SocketAddrV4] {
        &self.relays
    }

    fn enqueue(&self, relay: SocketAddrV4, packet: &[u8]) -> std::result::Result<(), String> {
        let queue = self
            .queues
            .get(&relay)
            .ok_or_else(|| format!("{relay}: no writer"))?;
        queue.try_send(packet.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => format!("{relay}: queue full"),
            TrySendError::Closed(_) => format!("{relay}: writer stopped"),
        })
    }
}

impl NetworkInterface for TcpRelayInterface {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::TcpRelay
    }

    fn nic(&self) -> Option<Nic> {
        None
    }

    fn broadcast(&self, packet: &[u8]) -> Result<()> {
        let failed: Vec<String> = self
            .queues
            .keys()
            .filter_map(|relay| self.enqueue(*relay, packet).err())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(TransportError::SendFailed(failed.join(", ")))
        }
    }

    /// Unicasts reach a relay node by IP; the relay's own port is used.
    fn send_to(&self, addr: SocketAddrV4, packet: &[u8]) -> Result<()> {
        let relay = self
            .relays
            .iter()
            .find(|relay| relay.ip() == addr.ip())
            .ok_or_else(|| TransportError::Unreachable(addr.to_string()))?;
        self.enqueue(*relay, packet)
            .map_err(TransportError::SendFailed)
    }
}

pub fn encode_frame(packet: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(packet.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    let mut frame = Vec::with_capacity(4 + packet.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(packet);
    Ok(frame)
}

/// Reconnect delay after failed connects, doubling up to a cap.
#[derive(Debug, Clone)]
struct Backoff {
    delay: Duration,
    retry_at: Option<Instant>,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: MIN_BACKOFF,
            retry_at: None,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Record a failed connect and return how long to wait.
    fn failed(&mut self, now: Instant) -> Duration {
        let wait = self.delay;
        self.retry_at = Some(now + wait);
        self.delay = (self.delay * 2).min(MAX_BACKOFF);
        wait
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

async fn connect(relay: SocketAddrV4) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(relay))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Own the stream to one relay and write every queued packet to it.
async fn run_writer(relay: SocketAddrV4, mut queue: mpsc::Receiver<Vec<u8>>) {
    let mut stream: Option<TcpStream> = None;
    let mut backoff = Backoff::new();
    while let Some(packet) = queue.recv().await {
        if stream.is_none() {
            if !backoff.ready(Instant::now()) {
                continue;
            }
            match connect(relay).await {
                Ok(connected) => {
                    debug!("Connected to relay {}", relay);
                    backoff.reset();
                    stream = Some(connected);
                }
                Err(e) => {
                    let wait = backoff.failed(Instant::now());
                    warn!("Relay {} unreachable, retrying in {:?}: {}", relay, wait, e);
                    continue;
                }
            }
        }
        let Some(out) = stream.as_mut() else {
            continue;
        };
        let written = match encode_frame(&packet) {
            Ok(frame) => out.write_all(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!("Relay stream to {} broken: {}", relay, e);
            stream = None;
        }
    }
    debug!("Writer for relay {} stopped", relay);
}

/// Accept relay streams and feed their frames into the engine as arrivals
/// on `iface`.
pub async fn run_relay_listener(listener: TcpListener, iface: InterfaceId, manager: Arc<GroupManager>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Relay stream from {}", addr);
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(e) = read_frames(stream, iface, &manager).await {
                        debug!("Relay stream from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept relay connection: {}", e);
            }
        }
    }
}

async fn read_frames<R: AsyncRead + Unpin>(
    mut stream: R,
    iface: InterfaceId,
    manager: &GroupManager,
) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
        let len = stream.read_u32().await? as usize;
        if len > MAX_FRAME {
            warn!("Relay frame of {} bytes, dropping stream", len);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized frame"));
        }
        buf.resize(len, 0);
        stream.read_exact(&mut buf).await?;
        manager.handle_packet(iface, &buf);
    }
}
