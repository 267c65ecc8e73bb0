// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The socket to the daemon: a Unix domain socket, or TCP on the loopback interface.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix(PathBuf),
    /// `host:port`.
    Tcp(String),
}

impl Address {
    /// An absolute path is a Unix socket; a bare port is TCP on 127.0.0.1; anything else is taken
    /// as `host:port`.
    pub fn parse(address: &str) -> Self {
        if address.starts_with('/') {
            Address::Unix(PathBuf::from(address))
        } else if address.contains(':') {
            Address::Tcp(address.to_string())
        } else {
            Address::Tcp(format!("127.0.0.1:{address}"))
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "{}", path.to_string_lossy()),
            Address::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// Interval between connection attempts while the daemon's accept queue is full.
#[cfg(unix)]
const CONNECT_RETRY: Duration = Duration::from_millis(1);

/// Connects to a Unix socket within `timeout`. A Unix connect either completes at once or fails
/// with `EAGAIN` when the listener's backlog is full, so the non-blocking connect is retried until
/// the deadline.
#[cfg(unix)]
fn connect_unix(path: &Path, timeout: Duration) -> io::Result<UnixStream> {
    use nix::errno::Errno;
    use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, UnixAddr};
    use std::os::unix::io::AsRawFd;

    let deadline = Instant::now() + timeout;
    let addr = UnixAddr::new(path)?;
    let stream = UnixStream::from(socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )?);
    stream.set_nonblocking(true)?;

    loop {
        match connect(stream.as_raw_fd(), &addr) {
            Ok(()) | Err(Errno::EISCONN) => break,
            Err(Errno::EAGAIN | Errno::EINPROGRESS | Errno::EALREADY | Errno::EINTR) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out connecting to the daemon socket",
                    ));
                }
                std::thread::sleep(left.min(CONNECT_RETRY));
            }
            Err(errno) => return Err(errno.into()),
        }
    }
    stream.set_nonblocking(false)?;
    Ok(stream)
}

/// An open connection to the daemon.
#[derive(Debug)]
pub enum Connection {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    pub fn connect(address: &Address, timeout: Duration) -> io::Result<Self> {
        match address {
            #[cfg(unix)]
            Address::Unix(path) => connect_unix(path, timeout).map(Connection::Unix),
            #[cfg(not(unix))]
            Address::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
            Address::Tcp(addr) => {
                let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
                })?;
                let stream = TcpStream::connect_timeout(&addr, timeout)?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
        }
    }

    /// Bounds the next reads and writes. `timeout` must not be zero.
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Connection::Unix(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))
            }
            Connection::Tcp(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))
            }
        }
    }
}

#[cfg(unix)]
impl From<UnixStream> for Connection {
    fn from(stream: UnixStream) -> Self {
        Connection::Unix(stream)
    }
}

impl From<TcpStream> for Connection {
    fn from(stream: TcpStream) -> Self {
        Connection::Tcp(stream)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Connection::Unix(s) => s.read(buf),
            Connection::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Connection::Unix(s) => s.write(buf),
            Connection::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Connection::Unix(s) => s.flush(),
            Connection::Tcp(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            Address::parse("/tmp/.apm-agent.sock"),
            Address::Unix("/tmp/.apm-agent.sock".into())
        );
        assert_eq!(Address::parse("31339"), Address::Tcp("127.0.0.1:31339".into()));
        assert_eq!(
            Address::parse("daemon.local:31339"),
            Address::Tcp("daemon.local:31339".into())
        );
        assert_eq!(Address::parse("31339").to_string(), "127.0.0.1:31339");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_tcp_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = Address::parse(&listener.local_addr().unwrap().port().to_string());
        let mut conn = Connection::connect(&address, Duration::from_secs(1)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        conn.set_timeout(Duration::from_secs(1)).unwrap();
        conn.write_all(b"ping").unwrap();
        let mut buf = [0; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    #[cfg(unix)]
    #[cfg_attr(miri, ignore)]
    fn test_unix_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let address = Address::Unix(path.clone());

        let err = Connection::connect(&address, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let mut conn = Connection::connect(&address, Duration::from_secs(1)).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        conn.set_timeout(Duration::from_secs(1)).unwrap();
        conn.write_all(b"ping").unwrap();
        let mut buf = [0; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    #[cfg(target_os = "linux")]
    #[cfg_attr(miri, ignore)]
    fn test_unix_connect_honors_timeout() {
        use nix::sys::socket::{
            bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr,
        };
        use std::os::unix::io::AsRawFd;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.sock");
        // a listener that never accepts, with the smallest accept queue
        let listener = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .unwrap();
        bind(listener.as_raw_fd(), &UnixAddr::new(&path).unwrap()).unwrap();
        listen(&listener, Backlog::new(1).unwrap()).unwrap();

        let address = Address::Unix(path);
        let timeout = Duration::from_millis(50);
        let mut pending = Vec::new();
        let err = loop {
            let started = Instant::now();
            match Connection::connect(&address, timeout) {
                Ok(conn) => pending.push(conn),
                Err(err) => {
                    assert!(started.elapsed() >= timeout);
                    break err;
                }
            }
            assert!(pending.len() < 64, "accept queue never filled up");
        };
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
