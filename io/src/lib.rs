//! Blocking transports and per-server connection pools.
//!
//! [`Transport`] is the byte-stream contract the protocol driver needs:
//! write a frame, read a delimited header, read an exact-length body.
//! [`TcpConnection`] and [`UdpConnection`] implement it over the two wire
//! carriers; [`ConnectionPool`] caches connections per server according to
//! one of three strategies.

mod error;
mod opts;
mod pool;
pub mod tcp;
pub mod udp;

pub use error::IoError;
pub use opts::{IoOpts, Timeouts};
pub use pool::{ConnectionPool, PoolStrategy};
pub use tcp::TcpConnection;
pub use udp::UdpConnection;

/// Byte-stream operations a protocol driver performs against one server.
///
/// All operations run under per-operation deadlines; any failure leaves the
/// connection unusable.
pub trait Transport {
    /// Writes the whole frame.
    fn write(&mut self, data: &[u8]) -> Result<(), IoError>;

    /// Reads through the first occurrence of `delimiter` (included).
    /// Surplus bytes stay buffered for the next read.
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, IoError>;

    /// Reads exactly `count` bytes, draining buffered input first.
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, IoError>;
}

/// Builds connections to one server. The indirection keeps pools and the
/// proxy state machine testable without sockets.
pub trait Connector {
    type Conn;

    fn connect(&self) -> Result<Self::Conn, IoError>;

    /// The server address, for diagnostics.
    fn server_name(&self) -> &str;
}

/// Which carrier a client talks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
}

/// A live connection over either carrier.
pub enum Connection {
    Tcp(TcpConnection),
    Udp(UdpConnection),
}

impl Transport for Connection {
    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        match self {
            Connection::Tcp(conn) => conn.write(data),
            Connection::Udp(conn) => conn.write(data),
        }
    }

    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, IoError> {
        match self {
            Connection::Tcp(conn) => conn.read_until(delimiter),
            Connection::Udp(conn) => conn.read_until(delimiter),
        }
    }

    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
        match self {
            Connection::Tcp(conn) => conn.read_exact(count),
            Connection::Udp(conn) => conn.read_exact(count),
        }
    }
}

/// Connects to one address over the configured carrier.
#[derive(Debug, Clone)]
pub struct NetConnector {
    kind: TransportKind,
    addr: String,
    opts: IoOpts,
}

impl NetConnector {
    pub fn new(kind: TransportKind, addr: impl Into<String>, opts: IoOpts) -> Self {
        NetConnector {
            kind,
            addr: addr.into(),
            opts,
        }
    }
}

impl Connector for NetConnector {
    type Conn = Connection;

    fn connect(&self) -> Result<Connection, IoError> {
        match self.kind {
            TransportKind::Tcp => {
                TcpConnection::connect(&self.addr, &self.opts).map(Connection::Tcp)
            }
            TransportKind::Udp => {
                UdpConnection::connect(&self.addr, &self.opts).map(Connection::Udp)
            }
        }
    }

    fn server_name(&self) -> &str {
        &self.addr
    }
}
