//! Listener accepting host connections on a plugin endpoint.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use plexus_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, ConnectionStream, TRANSPORT_TARGET, TransportError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listener bound to a plugin endpoint.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds `endpoint` and switches the socket to non-blocking accepts.
    ///
    /// A stale Unix socket file left by a dead process is removed first; a
    /// socket still owned by a live listener is refused.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint cannot be bound.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, TransportError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    ListenerKind::Unix(bind_unix(path.as_std_path())?)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(TransportError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        };
        let bound = Self {
            endpoint: endpoint.clone(),
            listener,
        };
        if let Err(source) = bound.set_nonblocking() {
            #[cfg(unix)]
            cleanup_unix_socket(&bound.endpoint);
            return Err(TransportError::NonBlocking {
                source: Arc::new(source),
            });
        }
        Ok(bound)
    }

    /// The endpoint peers should dial.
    ///
    /// For TCP this reports the port actually assigned, so binding port `0`
    /// yields a concrete endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::LocalAddr`] when the bound address cannot be
    /// read.
    pub fn local_endpoint(&self) -> Result<SocketEndpoint, TransportError> {
        match &self.listener {
            ListenerKind::Tcp(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|source| TransportError::LocalAddr {
                        source: Arc::new(source),
                    })?;
                Ok(SocketEndpoint::tcp(addr.ip().to_string(), addr.port()))
            }
            #[cfg(unix)]
            ListenerKind::Unix(_) => Ok(self.endpoint.clone()),
        }
    }

    /// Accepts connections until `shutdown` is raised, handing each one to
    /// `handler` on its own thread.
    ///
    /// Blocks the calling thread. The Unix socket file, if any, is removed on
    /// return.
    pub fn run(self, shutdown: &AtomicBool, handler: Arc<dyn ConnectionHandler>) {
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %self.endpoint,
            "plugin listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !shutdown.load(Ordering::SeqCst) {
            match self.accept() {
                Ok(Some(stream)) => {
                    last_error = None;
                    let worker = Arc::clone(&handler);
                    thread::spawn(move || worker.handle(stream));
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: TRANSPORT_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        debug!(
            target: TRANSPORT_TARGET,
            endpoint = %self.endpoint,
            "plugin listener stopped"
        );

        #[cfg(unix)]
        cleanup_unix_socket(&self.endpoint);
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match &self.listener {
            ListenerKind::Tcp(tcp) => tcp.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            ListenerKind::Unix(unix) => unix.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, TransportError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_owned(),
            port,
            source: Arc::new(source),
        })?;
    let addr: SocketAddr = addrs.next().ok_or_else(|| TransportError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| TransportError::BindTcp {
        addr,
        source: Arc::new(source),
    })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, TransportError> {
    let display = || path.display().to_string();
    if path.exists() {
        let metadata =
            fs::symlink_metadata(path).map_err(|source| TransportError::UnixMetadata {
                path: display(),
                source: Arc::new(source),
            })?;
        if !metadata.file_type().is_socket() {
            return Err(TransportError::UnixNotSocket { path: display() });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => return Err(TransportError::UnixInUse { path: display() }),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| TransportError::UnixCleanup {
                    path: display(),
                    source: Arc::new(source),
                })?;
            }
            Err(error) => {
                return Err(TransportError::UnixProbe {
                    path: display(),
                    source: Arc::new(error),
                });
            }
        }
    }
    UnixListener::bind(path).map_err(|source| TransportError::BindUnix {
        path: display(),
        source: Arc::new(source),
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let SocketEndpoint::Unix { path } = endpoint else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: TRANSPORT_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
