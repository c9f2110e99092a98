//! Byte transport between the host and the capture process
//!
//! The capture process owns the endpoint: a named pipe derived from its
//! process id, or a loopback TCP port. The host connects to it, retrying
//! while the capture process is still starting up. Traffic is raw bytes in
//! both directions. From the capture side, [`EOF_MARKER`] announces that the
//! target has exited; from the host side, [`Control`] sequences drive the
//! target's lifecycle.

pub mod handshake;
pub mod pipe;
pub mod socket;

pub use crate::buffer::EOF_MARKER;

use crate::result::{ExpectError, TransportError};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Default loopback port for the socket transport
pub const DEFAULT_PORT: u16 = 4321;

/// Delay between connection attempts while the capture process starts
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// First byte of every control sequence sent by the host
pub const CONTROL_PREFIX: u8 = 0x01;

/// Which kind of endpoint connects the two processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Named pipe `\\.\pipe\console_expect_<capture pid>` (Windows only)
    Pipe,
    /// Loopback TCP socket
    Socket {
        /// Port the capture process listens on
        port: u16,
    },
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(windows) {
            TransportKind::Pipe
        } else {
            TransportKind::Socket { port: DEFAULT_PORT }
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Pipe => f.write_str("pipe"),
            TransportKind::Socket { port } => write!(f, "socket:{port}"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ExpectError;

    /// Accepts `pipe`, `socket` and `socket:<port>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ExpectError::Usage(format!("unknown transport {s:?}"));
        match s.trim().to_ascii_lowercase().as_str() {
            "pipe" => Ok(TransportKind::Pipe),
            "socket" => Ok(TransportKind::Socket { port: DEFAULT_PORT }),
            other => {
                let port = other.strip_prefix("socket:").ok_or_else(unknown)?;
                let port = port.parse().map_err(|_| unknown())?;
                Ok(TransportKind::Socket { port })
            }
        }
    }
}

/// Host-to-capture control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Terminate the target program
    Terminate,
    /// Deliver Ctrl+C to the target's console
    Interrupt,
    /// Show the console window
    Show,
    /// Hide the console window
    Hide,
}

impl Control {
    /// Wire encoding: [`CONTROL_PREFIX`] followed by one code byte
    pub fn to_bytes(self) -> [u8; 2] {
        let code = match self {
            Control::Terminate => b'1',
            Control::Interrupt => b'2',
            Control::Show => b'3',
            Control::Hide => b'4',
        };
        [CONTROL_PREFIX, code]
    }

    /// Decode the byte following [`CONTROL_PREFIX`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'1' => Some(Control::Terminate),
            b'2' => Some(Control::Interrupt),
            b'3' => Some(Control::Show),
            b'4' => Some(Control::Hide),
            _ => None,
        }
    }
}

/// Outcome of one receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes arrived
    Data(Bytes),
    /// Nothing arrived within the wait
    Idle,
    /// The peer closed the connection
    Closed,
}

/// A bidirectional byte stream the expect engine can drive.
///
/// Implemented by [`Connection`] and by
/// [`ChildSession`](crate::ChildSession), which adds process lifecycle on
/// top of its connection.
pub trait ByteChannel: Send {
    /// Write all of `data`.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read at most `max` bytes, waiting no longer than `wait`.
    fn receive(
        &mut self,
        max: usize,
        wait: Duration,
    ) -> impl Future<Output = Result<Received, TransportError>> + Send;

    /// Release the channel. Further sends and receives fail.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// An established connection to the peer process.
pub struct Connection {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    endpoint: String,
    closed: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Connection {
    /// Wrap any duplex stream.
    pub fn from_stream<S>(stream: S, endpoint: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            endpoint: endpoint.into(),
            closed: false,
        }
    }

    /// Pipe name or socket address of the peer
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` once [`ByteChannel::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read exactly `len` bytes, waiting no longer than `wait` in total.
    pub async fn receive_exact(
        &mut self,
        len: usize,
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; len];
        match tokio::time::timeout(wait, self.reader.read_exact(&mut buf)).await {
            Err(_) => Err(TransportError::Handshake(format!(
                "no data from {} within {wait:?}",
                self.endpoint
            ))),
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) if is_disconnect(&e) || e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

impl ByteChannel for Connection {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let result = async {
            self.writer.write_all(data).await?;
            self.writer.flush().await
        }
        .await;
        match result {
            Ok(()) => {
                trace!(endpoint = %self.endpoint, len = data.len(), "sent");
                Ok(())
            }
            Err(e) if is_disconnect(&e) => Err(TransportError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    async fn receive(&mut self, max: usize, wait: Duration) -> Result<Received, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; max.max(1)];
        match tokio::time::timeout(wait, self.reader.read(&mut buf)).await {
            Err(_) => Ok(Received::Idle),
            Ok(Ok(0)) => {
                debug!(endpoint = %self.endpoint, "peer closed the connection");
                Ok(Received::Closed)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                trace!(endpoint = %self.endpoint, len = n, "received");
                Ok(Received::Data(Bytes::from(buf)))
            }
            Ok(Err(e)) if is_disconnect(&e) => Ok(Received::Closed),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!(endpoint = %self.endpoint, error = %e, "shutdown failed");
        }
    }
}

/// Errors that mean the peer is gone rather than that something broke.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Name of the pipe a capture process with id `capture_pid` creates.
pub fn pipe_name(capture_pid: u32) -> String {
    format!(r"\\.\pipe\console_expect_{capture_pid}")
}

/// Connect the host to the capture process with id `capture_pid`.
pub async fn connect(
    kind: TransportKind,
    capture_pid: u32,
    timeout: Duration,
) -> Result<Connection, TransportError> {
    match kind {
        TransportKind::Pipe => pipe::connect(&pipe_name(capture_pid), timeout).await,
        TransportKind::Socket { port } => {
            let stream = socket::connect(port, timeout).await?;
            Ok(Connection::from_stream(stream, format!("127.0.0.1:{port}")))
        }
    }
}

/// The capture side's endpoint, created before the target is launched.
pub enum Listener {
    /// A named pipe instance waiting for its client
    Pipe(pipe::PipeListener),
    /// A bound loopback socket
    Socket(tokio::net::TcpListener),
}

impl Listener {
    /// Create the endpoint for a capture process with id `own_pid`.
    pub async fn bind(kind: TransportKind, own_pid: u32) -> Result<Self, TransportError> {
        match kind {
            TransportKind::Pipe => Ok(Listener::Pipe(pipe::PipeListener::create(&pipe_name(
                own_pid,
            ))?)),
            TransportKind::Socket { port } => Ok(Listener::Socket(socket::bind(port).await?)),
        }
    }

    /// Wait for the host to connect.
    pub async fn accept(self) -> Result<Connection, TransportError> {
        match self {
            Listener::Pipe(listener) => listener.accept().await,
            Listener::Socket(listener) => {
                let (stream, peer) = socket::accept(&listener).await?;
                Ok(Connection::from_stream(stream, peer.to_string()))
            }
        }
    }
}
