//! Local network address discovery

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tracing::warn;

/// Non-routable address used to pick the outbound interface. Connecting a UDP
/// socket only selects a route; no packet is sent.
const PROBE_TARGET: &str = "10.255.255.255:1";

/// Address of the interface the host would use for outbound traffic
pub fn local_ip_address() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
    socket.connect(PROBE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}

/// Like [`local_ip_address`], falling back to loopback when the host has no route
pub fn local_ip_or_loopback() -> IpAddr {
    local_ip_address().unwrap_or_else(|e| {
        warn!("Could not determine local IP address, using loopback: {}", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}
