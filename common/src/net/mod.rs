use std::net::{Ipv4Addr, SocketAddr};

use log::debug;
use tokio::net::TcpListener;

#[cfg(target_os = "windows")]
mod win;

#[cfg(not(target_os = "windows"))]
mod rest;

/// All IPv4 addresses assigned to the local interfaces, in interface order.
pub fn ipv4_addresses() -> Vec<Ipv4Addr> {
    #[cfg(target_os = "windows")]
    {
        win::ipv4_addresses()
    }

    #[cfg(not(target_os = "windows"))]
    {
        rest::ipv4_addresses()
    }
}

/// Pick the address a renderer on the LAN is most likely to reach.
///
/// Prefers a `192.168.0.0/16` address, then any other non-loopback IPv4 address, and
/// falls back to loopback when nothing else is available.
pub fn pick_local_ipv4(candidates: &[Ipv4Addr]) -> Ipv4Addr {
    let usable = || {
        candidates
            .iter()
            .filter(|ip| !ip.is_loopback() && !ip.is_unspecified() && !ip.is_link_local())
    };

    usable()
        .find(|ip| ip.octets()[0] == 192 && ip.octets()[1] == 168)
        .or_else(|| usable().next())
        .copied()
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

pub fn best_local_ipv4() -> Ipv4Addr {
    let ip = pick_local_ipv4(&ipv4_addresses());
    debug!("Selected local address {ip}");
    ip
}

/// Bind a listener on `ip` with a port chosen by the OS.
pub async fn bind_ephemeral(ip: Ipv4Addr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((ip, 0)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}
