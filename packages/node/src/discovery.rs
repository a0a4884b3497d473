//! UDP beacon discovery: emitter and listener tasks that maintain the peer
//! directory.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::DiscoveryConfig;
use crate::directory::PeerDirectory;
use crate::error::NodeError;

/// Binds the UDP discovery socket. `SO_REUSEADDR` lets multiple
/// single-host test nodes share the beacon port.
fn bind_discovery_socket(port: u16) -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Spawns the beacon emitter: broadcasts `{node_id, tcp_port}` every
/// `config.beacon_interval`. Errors are logged and the loop continues.
pub fn spawn_emitter(
    node_id: String,
    tcp_port: u16,
    config: DiscoveryConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "discovery emitter failed to bind local socket");
                return;
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            tracing::warn!(error = %e, "discovery emitter failed to enable broadcast");
            return;
        }

        let beacon = meshdoc_core::wire::Beacon { node_id, tcp_port };
        let Ok(payload) = serde_json::to_vec(&beacon) else {
            tracing::warn!("discovery emitter failed to encode beacon");
            return;
        };
        let target: SocketAddr = (IpAddr::V4(config.broadcast_addr), config.udp_port).into();

        let mut interval = tokio::time::interval(config.beacon_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = socket.send_to(&payload, target).await {
                        tracing::warn!(error = %e, "discovery emitter failed to send beacon");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

/// Spawns the beacon listener: receives datagrams on the discovery port,
/// parses JSON, discards self-beacons, and upserts the directory.
pub fn spawn_listener(
    node_id: String,
    config: DiscoveryConfig,
    directory: Arc<PeerDirectory>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, NodeError> {
    let std_socket = bind_discovery_socket(config.udp_port)
        .map_err(|e| NodeError::Discovery(format!("failed to bind UDP discovery port: {e}")))?;
    let socket = UdpSocket::from_std(std_socket)
        .map_err(|e| NodeError::Discovery(format!("failed to register discovery socket: {e}")))?;

    Ok(tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                res = socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, sender)) => {
                            handle_datagram(&buf[..len], sender, &node_id, &config, &directory);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "discovery listener recv failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }))
}

fn handle_datagram(
    data: &[u8],
    sender: SocketAddr,
    self_node_id: &str,
    config: &DiscoveryConfig,
    directory: &PeerDirectory,
) {
    let beacon: meshdoc_core::wire::Beacon = match serde_json::from_slice(data) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, sender = %sender, "malformed discovery beacon, dropping");
            return;
        }
    };

    if beacon.node_id == self_node_id {
        return;
    }

    let peer_ip = if config.loopback_override { IpAddr::V4(Ipv4Addr::LOCALHOST) } else { sender.ip() };
    let peer_addr = SocketAddr::new(peer_ip, beacon.tcp_port);
    directory.upsert(beacon.node_id, peer_addr);
}
