//! Listener for PostgreSQL protocol connections.
//!
//! Accepts connections on TCP or a Unix socket and runs one [`Session`] per
//! connection in its own task. Sessions share nothing but the backend.

use crate::backend::Backend;
use crate::config::{Config, ConfigError};
use crate::session::Session;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, info_span, Instrument};

/// Pending connection queue length
const LISTEN_BACKLOG: i32 = 1024;

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    /// Accepts `tcp://host:port`, `unix:///path`, or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            |reason: &str| ConfigError::InvalidListenAddr(s.to_string(), reason.to_string());

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("tcp", s),
        };

        match scheme {
            "tcp" => {
                let addr = rest
                    .to_socket_addrs()
                    .map_err(|e| invalid(&e.to_string()))?
                    .next()
                    .ok_or_else(|| invalid("address did not resolve"))?;
                Ok(ListenAddr::Tcp(addr))
            }
            "unix" => {
                if rest.is_empty() {
                    return Err(invalid("missing socket path"));
                }
                Ok(ListenAddr::Unix(PathBuf::from(rest)))
            }
            other => Err(invalid(&format!("Invalid network protocol: {other}"))),
        }
    }
}

/// A listener that hands out client streams
trait Acceptor {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept one connection, returning it with a printable peer name
    async fn accept_client(&self) -> io::Result<(Self::Stream, String)>;
}

impl Acceptor for TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept_client(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }
}

#[cfg(unix)]
impl Acceptor for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept_client(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.accept().await?;
        let name = peer
            .as_pathname()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unix".to_string());
        Ok((stream, name))
    }
}

/// Server instance
pub struct Server {
    config: Config,
    backend: Arc<dyn Backend>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            backend,
            connection_limit,
        }
    }

    /// Accept connections until Ctrl-C
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        match self.config.bind_address.parse::<ListenAddr>()? {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::from_std(create_tcp_listener(addr)?)?;
                info!(address = %addr, "PGProtoServer listening");
                self.serve(listener, shutdown).await
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                remove_stale_socket(&path)?;
                let listener = tokio::net::UnixListener::bind(&path)?;
                info!(address = %path.display(), "PGProtoServer listening");
                let result = self.serve(listener, shutdown).await;
                remove_stale_socket(&path)?;
                result
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Unix sockets are not supported on this platform",
            )
            .into()),
        }
    }

    async fn serve<A, F>(&self, listener: A, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        A: Acceptor,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => permit?,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept_client() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer, permit),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        info!("Server shutting down");
        Ok(())
    }

    fn spawn_session<S>(&self, stream: S, peer: String, permit: OwnedSemaphorePermit)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let max_message_size = self.config.max_message_size;
        let span = info_span!("connection", client = %peer);

        tokio::spawn(
            async move {
                info!("Client connected");
                let mut session =
                    Session::new(stream, backend).with_max_message_size(max_message_size);
                if let Err(e) = session.run().await {
                    error!(error = %e, "Connection error");
                }
                info!("Client disconnected");
                drop(permit);
            }
            .instrument(span),
        );
    }
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_tcp_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Remove a socket file left behind by an earlier run. Any other kind of file
/// at the path is an error and is left alone.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
