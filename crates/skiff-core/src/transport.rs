//! Datagram transports.
//!
//! The driver only needs to send one datagram to an address and receive the
//! next datagram with its source. [`UdpTransport`] does that over a tokio
//! socket; [`MemoryTransport`] does it over in-process channels so
//! transfers can be exercised without the network.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::wire::PeerAddr;

/// Unreliable datagram delivery between two endpoints.
pub trait Transport: Send + Sync {
    fn send_to(&self, buf: &[u8], peer: SocketAddr)
        -> impl Future<Output = io::Result<()>> + Send;

    /// Receive one datagram into `buf`. Anything past `buf.len()` is lost.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Resolve `host:port` text to the first socket address it names.
pub async fn resolve(addr: &PeerAddr) -> io::Result<SocketAddr> {
    let target = addr.to_string();
    let mut addrs = tokio::net::lookup_host(target.as_str()).await?;
    addrs.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{target} did not resolve to any address"),
        )
    })
}

// ── UDP ───────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(local = %socket.local_addr()?, "socket bound");
        Ok(Self { socket })
    }
}

impl From<UdpSocket> for UdpTransport {
    fn from(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(buf, peer).await?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {sent} of {} bytes", buf.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

type Datagram = (SocketAddr, Bytes);

/// One end of an in-process link built by [`memory_pair`].
///
/// Datagrams addressed anywhere but the other end are dropped, as a UDP
/// send to an unbound port would be.
#[derive(Debug)]
pub struct MemoryTransport {
    local: SocketAddr,
    peer: SocketAddr,
    to_peer: mpsc::UnboundedSender<Datagram>,
    inbox: mpsc::UnboundedSender<Datagram>,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

/// Two transports wired to each other, claiming addresses `a` and `b`.
pub fn memory_pair(a: SocketAddr, b: SocketAddr) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let end_a = MemoryTransport {
        local: a,
        peer: b,
        to_peer: b_tx.clone(),
        inbox: a_tx.clone(),
        rx: Mutex::new(a_rx),
    };
    let end_b = MemoryTransport {
        local: b,
        peer: a,
        to_peer: a_tx,
        inbox: b_tx,
        rx: Mutex::new(b_rx),
    };
    (end_a, end_b)
}

impl MemoryTransport {
    /// Deliver `bytes` to this end as though `from` had sent them.
    pub fn inject(&self, from: SocketAddr, bytes: impl Into<Bytes>) {
        let _ = self.inbox.send((from, bytes.into()));
    }
}

impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<()> {
        if peer != self.peer {
            tracing::trace!(%peer, "no such memory endpoint, datagram dropped");
            return Ok(());
        }
        // A closed peer behaves like a silent network.
        let _ = self.to_peer.send((self.local, Bytes::copy_from_slice(buf)));
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let (from, data) = rx.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "memory link closed")
        })?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}
