/// Byte-stream transport shared by the protocol clients.
///
/// The stream is strictly ordered and single-reader; protocol clients frame
/// their own messages on top of raw bytes. The `bytes_read` counter lets the
/// orchestrator tell whether a failed negotiation attempt already consumed
/// reply bytes (in which case the stream is mid-protocol and must not be
/// retried).

use crate::error::Error;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

pub(crate) type TunnelRegistry = Mutex<HashMap<u64, Arc<AtomicBool>>>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct Transport<S> {
    stream: S,
    bytes_read: u64,
    closed: bool,
}

impl Transport<TcpStream> {
    /// Open a TCP connection to `host:port`. Name resolution, refusal and
    /// unreachability all surface as [`Error::Connect`]; the caller bounds
    /// the wait with its own deadline.
    pub async fn open(host: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connect {
                host: host.to_string(),
                port,
                source: e,
            })?;
        Ok(Transport::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    pub fn new(stream: S) -> Self {
        Transport {
            stream,
            bytes_read: 0,
            closed: false,
        }
    }

    /// Total bytes consumed from the peer so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read exactly `buf.len()` bytes. Fails with [`Error::Io`] if the peer
    /// closes first.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.check_open()?;
        self.stream.read_exact(buf).await?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }

    /// Read bytes up to and including the first CRLF. Fails with
    /// [`Error::Protocol`] if `max_bytes` is exceeded without finding the
    /// delimiter.
    pub async fn read_until_crlf(&mut self, max_bytes: usize) -> Result<Vec<u8>, Error> {
        self.check_open()?;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await?;
            self.bytes_read += 1;
            line.push(byte[0]);
            if line.ends_with(b"\r\n") {
                return Ok(line);
            }
            if line.len() >= max_bytes {
                return Err(Error::Protocol(format!(
                    "no CRLF within {max_bytes} bytes"
                )));
            }
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.check_open()?;
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Idempotent close. Safe on a half-open stream; shutdown errors are
    /// ignored because the underlying resource is released on drop anyway.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tunnel
// ---------------------------------------------------------------------------

/// A live end-to-end tunnel, handed to the caller after every hop succeeded.
///
/// Single-owner: the engine never reads or writes it. The only strings
/// attached are administrative: `close_all` trips the shared flag, after
/// which every poll fails, and dropping the tunnel deregisters it from the
/// engine's live set.
#[derive(Debug)]
pub struct Tunnel {
    stream: TcpStream,
    closed: Arc<AtomicBool>,
    registry: Weak<TunnelRegistry>,
    id: u64,
}

impl Tunnel {
    pub(crate) fn new(
        stream: TcpStream,
        closed: Arc<AtomicBool>,
        registry: Weak<TunnelRegistry>,
        id: u64,
    ) -> Self {
        Tunnel {
            stream,
            closed,
            registry,
            id,
        }
    }

    /// True once the engine's `close_all` has revoked this tunnel.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    fn revoked() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "tunnel closed by engine")
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.closed.load(Ordering::Relaxed) {
            return Poll::Ready(Err(Self::revoked()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed.load(Ordering::Relaxed) {
            return Poll::Ready(Err(Self::revoked()));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed.load(Ordering::Relaxed) {
            return Poll::Ready(Err(Self::revoked()));
        }
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut map) = registry.lock() {
                map.remove(&self.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
