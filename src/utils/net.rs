//! Network address helpers

use std::net::{IpAddr, SocketAddr, UdpSocket};

/// LAN address other machines can reach this host on.
///
/// Connects a UDP socket towards a public address to let the OS pick the
/// outbound interface; no packet is sent.
pub fn private_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}

/// Host part for a URL, bracketing IPv6 addresses
pub fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

/// Local and LAN URLs for the startup banner
pub fn access_urls(scheme: &str, bind: SocketAddr) -> (String, Option<String>) {
    let port = bind.port();
    let local = format!("{}://localhost:{}", scheme, port);
    let lan = if bind.ip().is_loopback() {
        None
    } else {
        private_ip().map(|ip| format!("{}://{}:{}", scheme, url_host(ip), port))
    };
    (local, lan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_url_host() {
        assert_eq!(url_host(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))), "192.168.1.5");
        assert_eq!(url_host(IpAddr::V6(Ipv6Addr::LOCALHOST)), "[::1]");
    }

    #[test]
    fn test_loopback_bind_has_no_lan_url() {
        let (local, lan) = access_urls("https", "127.0.0.1:8000".parse().unwrap());
        assert_eq!(local, "https://localhost:8000");
        assert!(lan.is_none());
    }
}
