//! Outbound address detection for `X-Real-IP`.

use metricsd_shared::{ErrorEnvelope, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

/// Local address the OS would route from when talking to `server`.
///
/// `server` is `host:port`. Connecting a UDP socket only selects a route;
/// no packet is sent.
pub fn detect_local_ip(server: &str) -> Result<IpAddr> {
    let target = resolve(server)?;
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

fn resolve(server: &str) -> Result<SocketAddr> {
    let host = server
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    host.to_socket_addrs()
        .map_err(|error| {
            ErrorEnvelope::from(error).with_metadata("address", host.to_string())
        })?
        .next()
        .ok_or_else(|| {
            ErrorEnvelope::invalid_input("server address resolved to nothing")
                .with_metadata("address", host.to_string())
        })
}
