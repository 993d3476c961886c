//! Byte-stream transports the link can run over.
//!
//! The delivery engine is written against [`Transport`]: any full-duplex
//! async byte stream that can name its peer.  TCP stands in for the paired
//! device socket; in-memory duplex pipes serve tests and the simulator.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::LinkError;

/// A connected byte stream to the remote peer.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Human-readable name of the peer (address or device name).
    fn remote_host(&self) -> String;
}

impl Transport for TcpStream {
    fn remote_host(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    }
}

impl Transport for DuplexStream {
    fn remote_host(&self) -> String {
        "in-memory".to_owned()
    }
}

// ---------------------------------------------------------------------------
// TCP helpers
// ---------------------------------------------------------------------------

/// Open an outbound stream to `addr`.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream, LinkError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// A bound TCP listener handing out peer streams.
#[derive(Debug)]
pub struct Listener {
    /// Address this listener is bound to (filled in after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: TcpListener,
}

impl Listener {
    /// Bind to `addr`.  Passing `127.0.0.1:0` lets the OS choose a port.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, LinkError> {
        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Wait for the next peer.
    pub async fn accept(&self) -> Result<TcpStream, LinkError> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        log::debug!("[link] accepted stream from {addr}");
        Ok(stream)
    }
}
