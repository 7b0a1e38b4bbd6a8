//! Connected stream abstraction over TCP and Unix sockets.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use plexus_config::SocketEndpoint;

use super::TransportError;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Stream types carrying a plugin session.
#[derive(Debug)]
pub enum ConnectionStream {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Opens a second handle to the same connection.
    ///
    /// # Errors
    ///
    /// Propagates the operating system's failure to duplicate the socket.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Shuts down both directions, waking any thread blocked on a read.
    ///
    /// # Errors
    ///
    /// Propagates the shutdown failure; `NotConnected` means the peer already
    /// went away.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    /// Bounds blocking reads; `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Fails when the timeout is zero or the socket rejects the option.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Bounds blocking writes; `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Fails when the timeout is zero or the socket rejects the option.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_write_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_write_timeout(timeout),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Dials a plugin endpoint, giving up after `timeout`.
///
/// Name resolution and every resolved TCP address share one deadline, so the
/// whole dial never outlasts `timeout`.
///
/// # Errors
///
/// Returns [`TransportError`] when resolution fails or no address accepts the
/// connection in time.
pub fn connect(
    endpoint: &SocketEndpoint,
    timeout: Duration,
) -> Result<ConnectionStream, TransportError> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            connect_tcp(endpoint, host, *port, timeout).map(ConnectionStream::Tcp)
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                UnixStream::connect(path.as_std_path())
                    .map(ConnectionStream::Unix)
                    .map_err(|source| TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source: Arc::new(source),
                    })
            }

            #[cfg(not(unix))]
            {
                let _ = (path, timeout);
                Err(TransportError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

fn connect_tcp(
    endpoint: &SocketEndpoint,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let deadline = Instant::now() + timeout;
    let addrs = resolve(endpoint, host, port, deadline)?;
    dial(endpoint, host, port, &addrs, deadline)
}

/// Resolves `host`, abandoning the lookup once `deadline` passes.
fn resolve(
    endpoint: &SocketEndpoint,
    host: &str,
    port: u16,
    deadline: Instant,
) -> Result<Vec<SocketAddr>, TransportError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let resolve_error = |source: io::Error| TransportError::Resolve {
        host: host.to_owned(),
        port,
        source: Arc::new(source),
    };
    let (tx, rx) = mpsc::channel();
    let query = (host.to_owned(), port);
    thread::Builder::new()
        .name(String::from("plexus-resolve"))
        .spawn(move || {
            let resolved = query.to_socket_addrs().map(Iterator::collect::<Vec<_>>);
            // The dialler may have given up already.
            tx.send(resolved).ok();
        })
        .map_err(resolve_error)?;
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(resolved) => resolved.map_err(resolve_error),
        Err(RecvTimeoutError::Timeout) => Err(timed_out(endpoint)),
        Err(RecvTimeoutError::Disconnected) => Err(resolve_error(io::Error::other(
            "resolver thread exited without an answer",
        ))),
    }
}

/// Tries each address in turn until one accepts or `deadline` passes.
fn dial(
    endpoint: &SocketEndpoint,
    host: &str,
    port: u16,
    addrs: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(endpoint));
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }
    let Some(source) = last_error else {
        return Err(TransportError::ResolveEmpty {
            host: host.to_owned(),
            port,
        });
    };
    Err(TransportError::Connect {
        endpoint: endpoint.to_string(),
        source: Arc::new(source),
    })
}

fn timed_out(endpoint: &SocketEndpoint) -> TransportError {
    TransportError::Connect {
        endpoint: endpoint.to_string(),
        source: Arc::new(io::Error::new(
            io::ErrorKind::TimedOut,
            "connect deadline elapsed",
        )),
    }
}
