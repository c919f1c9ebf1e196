//! Accept loop for the join/leave channel.
//!
//! Each connection is served on the blocking pool by
//! [`group_core::channel::serve_connection`], the engine acting as handler.

use group_core::GroupManager;
use group_core::channel::serve_connection;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    info!("Channel server listening on port {}", port);
    Ok(listener)
}

pub async fn run_channel_server(listener: TcpListener, manager: Arc<GroupManager>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let Some(from) = peer_ipv4(addr) else {
                    debug!("Ignoring channel connection from {}", addr);
                    continue;
                };
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, from, manager).await {
                        warn!("Channel request from {} failed: {}", from, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept channel connection: {}", e);
            }
        }
    }
}

async fn serve(stream: TcpStream, from: Ipv4Addr, manager: Arc<GroupManager>) -> anyhow::Result<()> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    tokio::task::spawn_blocking(move || {
        let mut stream = stream;
        serve_connection(&mut stream, from, manager.as_ref())
    })
    .await??;
    debug!("Served channel request from {}", from);
    Ok(())
}

fn peer_ipv4(addr: SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}
