//! Accepted connections and the handler contract they are served through.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

trait Duplex: Read + Write {}

impl<T: Read + Write> Duplex for T {}

enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Blocking byte stream of one accepted client, labelled with its peer.
pub(crate) struct ConnectionStream {
    peer: String,
    socket: Socket,
}

impl ConnectionStream {
    pub(crate) fn tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "tcp:?".to_owned(), |addr| format!("tcp:{addr}"));
        Self {
            peer,
            socket: Socket::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn unix(stream: UnixStream) -> Self {
        let peer = stream
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|path| format!("unix:{}", path.display())))
            .unwrap_or_else(|| "unix".to_owned());
        Self {
            peer,
            socket: Socket::Unix(stream),
        }
    }

    /// Label of the remote end used in logs and calls.
    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    /// Second handle on the socket that can close it from another thread.
    pub(crate) fn closer(&self) -> io::Result<Closer> {
        let socket = match &self.socket {
            Socket::Tcp(stream) => Socket::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            Socket::Unix(stream) => Socket::Unix(stream.try_clone()?),
        };
        Ok(Closer { socket })
    }

    fn duplex(&mut self) -> &mut dyn Duplex {
        match &mut self.socket {
            Socket::Tcp(stream) => stream,
            #[cfg(unix)]
            Socket::Unix(stream) => stream,
        }
    }
}

/// Shuts an accepted socket down in both directions, waking a worker blocked
/// on it with end-of-stream.
pub(crate) struct Closer {
    socket: Socket,
}

impl Closer {
    pub(crate) fn close(&self) -> io::Result<()> {
        let closed = match &self.socket {
            Socket::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Socket::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match closed {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.duplex().read(buf)
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.duplex().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.duplex().flush()
    }
}

impl std::fmt::Debug for ConnectionStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionStream")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Serves accepted connections on a pool worker.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves `stream` until either side closes it.
    fn handle(&self, stream: ConnectionStream);
}
