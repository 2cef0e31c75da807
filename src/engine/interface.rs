//! Network interface detection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Whether the host has a usable route out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub connected: bool,
    /// Source address the OS picked for the outbound route
    pub local_addr: Option<IpAddr>,
}

impl InterfaceInfo {
    pub fn connected(local_addr: IpAddr) -> Self {
        Self {
            connected: true,
            local_addr: Some(local_addr),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait InterfaceProbe: Send + Sync {
    async fn detect(&self) -> InterfaceInfo;
}

/// Detects a route by connecting an unbound UDP socket.
///
/// `connect` on a datagram socket sends nothing; it only asks the kernel to
/// choose a source address for the destination, which fails or yields an
/// unspecified address when no interface can reach it.
#[derive(Debug, Clone)]
pub struct UdpRouteProbe {
    target: SocketAddr,
}

impl UdpRouteProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for UdpRouteProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 80)))
    }
}

#[async_trait]
impl InterfaceProbe for UdpRouteProbe {
    async fn detect(&self) -> InterfaceInfo {
        let bind = if self.target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let local: std::io::Result<SocketAddr> = async {
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(self.target).await?;
            socket.local_addr()
        }
        .await;

        match local {
            Ok(addr) if !addr.ip().is_unspecified() && !addr.ip().is_loopback() => {
                InterfaceInfo::connected(addr.ip())
            }
            Ok(_) => InterfaceInfo::disconnected(),
            Err(e) => {
                tracing::trace!(target_addr = %self.target, error = %e, "No route");
                InterfaceInfo::disconnected()
            }
        }
    }
}
