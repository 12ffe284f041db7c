//! Stream transport -- endpoints, listeners, framed connections.
//!
//! Sellers listen on TCP or a Unix socket. Every connection is wrapped in a
//! `Framed<_, MessageCodec>` so reads always yield whole messages no matter
//! how the kernel splits or merges the byte stream.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use enertrade_protocol::{MessageCodec, ProtocolError, WireMessage};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Byte stream a connection runs over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

/// Where a seller listens or a buyer dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    /// A bare `:port` TCP address binds all interfaces.
    pub fn new(network: Network, addr: &str) -> Self {
        match network {
            Network::Tcp if addr.starts_with(':') => Endpoint::Tcp(format!("0.0.0.0{addr}")),
            Network::Tcp => Endpoint::Tcp(addr.to_string()),
            Network::Unix => Endpoint::Unix(PathBuf::from(addr)),
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Endpoint::Tcp(_) => Network::Tcp,
            Endpoint::Unix(_) => Network::Unix,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

// ============================================================================
// Listener / dialer
// ============================================================================

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl Listener {
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                remove_stale_socket(path)?;
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok(Listener::Unix(listener, path.clone()))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(unix_unsupported()),
        }
    }

    /// Accept one connection; returns the stream and a printable peer name.
    pub async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }

    /// The bound endpoint, with the real port when bound to port 0.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Listener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Remove a socket left by a previous run. Any other file at the path is
/// left alone and reported as `AlreadyExists`.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn connect(endpoint: &Endpoint) -> io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(unix_unsupported()),
    }
}

#[cfg(not(unix))]
fn unix_unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not available on this platform",
    )
}

// ============================================================================
// Framed connection
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no message within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
}

/// One negotiation stream: framed reads with a per-read timeout.
pub struct Connection<S = BoxedStream> {
    framed: Framed<S, MessageCodec>,
    read_timeout: Duration,
    peer: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, codec: MessageCodec, read_timeout: Duration, peer: String) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            read_timeout,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Next whole message. `Ok(None)` when the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<WireMessage>, SessionError> {
        match tokio::time::timeout(self.read_timeout, self.framed.next()).await {
            Err(_) => Err(SessionError::Timeout(self.read_timeout)),
            Ok(None) => Ok(None),
            Ok(Some(Ok(msg))) => Ok(Some(msg)),
            Ok(Some(Err(e))) => Err(e.into()),
        }
    }

    /// Like `recv`, but a clean close is an error.
    pub async fn expect(&mut self) -> Result<WireMessage, SessionError> {
        self.recv().await?.ok_or(SessionError::Closed)
    }

    /// Write one frame and flush it.
    pub async fn send(&mut self, msg: WireMessage) -> Result<(), SessionError> {
        self.framed.send(msg).await?;
        Ok(())
    }
}
