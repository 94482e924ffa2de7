//! Transport abstraction for the device TCP link
//!
//! The device speaks a half-duplex, line-oriented ASCII protocol on a single
//! TCP stream. These traits abstract the stream so the session state machine
//! can be tested with mockall without a live device; the concrete types use
//! tokio TCP sockets.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Result, SolysError};

/// One receive call returns whatever is currently available, up to this many
/// bytes. The device never sends lines anywhere near this long.
const RECV_BUFFER_SIZE: usize = 1024;

/// How long a drain read waits for further stale data before deciding the
/// stream is quiet.
const DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Trait for the device stream
///
/// Abstracts the raw socket operations, enabling mocking for tests that
/// don't require actual network I/O.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceTransport: Send {
    /// Send a command line and return the immediate reply
    async fn send(&mut self, line: &str) -> Result<String>;

    /// Receive whatever the device has available, bounded by the read timeout
    async fn receive(&mut self) -> Result<String>;

    /// Discard stale, unsolicited data until the stream goes quiet
    async fn drain(&mut self) -> Result<()>;

    /// Shut the stream down
    async fn close(&mut self) -> Result<()>;
}

/// Trait for creating device transports
///
/// The session reconnects by asking its factory for a fresh transport, so
/// reconnection paths are mockable too.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DeviceTransport>>;
}

/// TCP implementation of the device transport
pub struct TcpTransport {
    stream: TcpStream,
    read_timeout: Duration,
}

impl TcpTransport {
    /// Open a new connection to the device
    pub async fn connect(host: &str, port: u16, read_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("Connecting to device at {} with timeout {:?}", addr, read_timeout);

        let stream = tokio::time::timeout(read_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SolysError::Timeout(format!("Connection to {addr} timed out")))?
            .map_err(|e| {
                SolysError::ConnectionFailed(format!("Failed to connect to {addr}: {e}"))
            })?;

        debug!("TCP connection established to {}", addr);
        Ok(Self {
            stream,
            read_timeout,
        })
    }

    async fn read_chunk(&mut self, deadline: Duration) -> Result<Option<String>> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        match tokio::time::timeout(deadline, self.stream.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(SolysError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by device",
            ))),
            Ok(Ok(n)) => Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Ok(Err(e)) => Err(SolysError::Io(e)),
        }
    }
}

#[async_trait]
impl DeviceTransport for TcpTransport {
    async fn send(&mut self, line: &str) -> Result<String> {
        trace!("-> {}", line);
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(SolysError::Io)?;
        self.stream.flush().await.map_err(SolysError::Io)?;
        self.receive().await
    }

    async fn receive(&mut self) -> Result<String> {
        let reply = self
            .read_chunk(self.read_timeout)
            .await?
            .ok_or_else(|| SolysError::Timeout("No reply within read timeout".to_string()))?;
        trace!("<- {}", reply.trim_end());
        Ok(reply)
    }

    async fn drain(&mut self) -> Result<()> {
        let mut discarded = 0usize;
        loop {
            match self.read_chunk(DRAIN_WINDOW).await {
                Ok(Some(chunk)) => discarded += chunk.len(),
                Ok(None) => break,
                // A dying stream is the session's problem on the next send,
                // not the drain's.
                Err(_) => break,
            }
        }
        if discarded > 0 {
            debug!("Drained {} stale bytes before sending", discarded);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(SolysError::Io)
    }
}

/// TCP implementation of the transport factory
pub struct TcpTransportFactory {
    host: String,
    port: u16,
    read_timeout: Duration,
}

impl TcpTransportFactory {
    pub fn new(host: impl Into<String>, port: u16, read_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout,
        }
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn connect(&self) -> Result<Box<dyn DeviceTransport>> {
        let transport = TcpTransport::connect(&self.host, self.port, self.read_timeout).await?;
        Ok(Box::new(transport))
    }
}

/// Whether a send/receive failure means the stream itself died and a
/// reconnect is worth attempting.
pub fn is_connection_dropped(err: &SolysError) -> bool {
    match err {
        SolysError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_drop_detection() {
        let reset = SolysError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_connection_dropped(&reset));

        let timeout = SolysError::Timeout("slow".to_string());
        assert!(!is_connection_dropped(&timeout));

        let rejected = SolysError::Device {
            code: "3".to_string(),
            reason: "unrecognized command".to_string(),
            raw: "NO 3".to_string(),
        };
        assert!(!is_connection_dropped(&rejected));
    }
}
