//! Datagram socket capability.
//!
//! The protocol core only ever needs two non-blocking operations, captured by
//! [`DatagramSocket`]. [`Socket`] implements it on top of
//! `tokio::net::UdpSocket`; [`crate::simulator`] implements it in memory.
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{lookup_host, UdpSocket};

use crate::error::Error;

/// Receive buffer size: large enough for any IPv4 or IPv6 UDP payload.
pub const MAX_DATAGRAM: usize = 65_535;

/// Non-blocking datagram send/receive.
///
/// Implementations must never block: `recv_from` returns `Ok(None)` once no
/// datagram is pending.
pub trait DatagramSocket {
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()>;

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A non-blocking UDP socket.
///
/// Must be used from inside a tokio runtime; readiness is picked up by the
/// reactor whenever the driving task yields (e.g. between ticks).
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, Error> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind a listening socket on every interface.
    ///
    /// With `dual_mode` the socket binds `[::]` so IPv4 and IPv6 peers share
    /// it; hosts without IPv6 fall back to `0.0.0.0`.
    pub async fn bind_server(port: u16, dual_mode: bool) -> Result<Self, Error> {
        let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        if !dual_mode {
            return Self::bind(v4).await;
        }
        match Self::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))).await {
            Ok(socket) => Ok(socket),
            Err(e) => {
                log::warn!("[socket] dual-mode bind failed ({e}), using IPv4 only");
                Self::bind(v4).await
            }
        }
    }

    /// Bind an ephemeral client socket of the same address family as `remote`.
    pub async fn bind_for(remote: SocketAddr) -> Result<Self, Error> {
        let local = match remote {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        Self::bind(local).await
    }
}

impl DatagramSocket for Socket {
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        match self.inner.try_send_to(datagram, target) {
            Ok(_) => Ok(()),
            // A full send buffer behaves like a lost datagram.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("[socket] send buffer full, dropping {} bytes", datagram.len());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.try_recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Resolve `host` to the first address it maps to.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let mut addrs = lookup_host((host, port)).await?;
    addrs.next().ok_or_else(|| {
        Error::Socket(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {host}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_reports_assigned_port() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(socket.local_addr.port(), 0);
        assert_eq!(DatagramSocket::local_addr(&socket).unwrap(), socket.local_addr);
    }

    #[tokio::test]
    async fn recv_on_idle_socket_returns_none() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.recv_from(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_numeric_host() {
        let addr = resolve("127.0.0.1", 7777).await.unwrap();
        assert_eq!(addr, "127.0.0.1:7777".parse().unwrap());
    }
}
