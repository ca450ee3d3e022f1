//! Blocking TCP transport with per-operation deadlines.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{IoError, IoOpts, Timeouts, Transport};

/// Resolves `host:port` to the first usable socket address.
pub(crate) fn resolve(addr: &str) -> Result<SocketAddr, IoError> {
    addr.to_socket_addrs()
        .map_err(|err| IoError::BadAddress(format!("{addr}: {err}")))?
        .next()
        .ok_or_else(|| IoError::BadAddress(format!("{addr}: no addresses resolved")))
}

/// One TCP connection to one server.
///
/// Reads pull into an internal buffer so that bytes past a delimiter stay
/// available for the next read. Every operation runs against a deadline
/// derived from [`Timeouts`]; expiry surfaces as [`IoError::Timeout`] and
/// the connection must be discarded.
#[derive(Debug)]
pub struct TcpConnection {
    addr: String,
    stream: TcpStream,
    input: Vec<u8>,
    timeouts: Timeouts,
}

impl TcpConnection {
    /// Resolves `addr` and connects within the connect deadline.
    pub fn connect(addr: &str, opts: &IoOpts) -> Result<Self, IoError> {
        let dest = resolve(addr)?;
        let stream = TcpStream::connect_timeout(&dest, opts.timeouts.connect)
            .map_err(|err| IoError::from_std(err, "connect", addr))?;
        // Small request/response exchanges; coalescing only adds latency.
        let _ = stream.set_nodelay(true);
        debug!(server = %addr, resolved = %dest, "connected to memcache server");
        Ok(TcpConnection {
            addr: addr.to_string(),
            stream,
            input: Vec::new(),
            timeouts: opts.timeouts,
        })
    }

    /// Remaining time before `deadline`, or a timeout failure.
    fn remaining(&self, deadline: Instant, context: &str) -> Result<Duration, IoError> {
        deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                IoError::Timeout(format!("can't {context} due to timeout: dst={}", self.addr))
            })
    }

    /// Reads at least one more byte into the buffer, within the deadline.
    fn fill_some(&mut self, deadline: Instant) -> Result<(), IoError> {
        let remaining = self.remaining(deadline, "read")?;
        self.stream
            .set_read_timeout(Some(remaining))
            .map_err(|err| IoError::from_std(err, "read", &self.addr))?;
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(IoError::Io(format!(
                        "connection closed by peer: dst={}",
                        self.addr
                    )))
                }
                Ok(n) => {
                    self.input.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(IoError::from_std(err, "read", &self.addr)),
            }
        }
    }

    /// Removes and returns the first `count` buffered bytes.
    fn take(&mut self, count: usize) -> Vec<u8> {
        let rest = self.input.split_off(count);
        std::mem::replace(&mut self.input, rest)
    }
}

/// Finds `needle` in `haystack`, returning the start offset.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Transport for TcpConnection {
    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        let deadline = Instant::now() + self.timeouts.write;
        let mut written = 0;
        while written < data.len() {
            let remaining = self.remaining(deadline, "write")?;
            self.stream
                .set_write_timeout(Some(remaining))
                .map_err(|err| IoError::from_std(err, "write", &self.addr))?;
            match self.stream.write(&data[written..]) {
                Ok(0) => {
                    return Err(IoError::Io(format!(
                        "connection closed by peer: dst={}",
                        self.addr
                    )))
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(IoError::from_std(err, "write", &self.addr)),
            }
        }
        Ok(())
    }

    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, IoError> {
        let deadline = Instant::now() + self.timeouts.read;
        loop {
            if let Some(at) = find(&self.input, delimiter) {
                return Ok(self.take(at + delimiter.len()));
            }
            self.fill_some(deadline)?;
        }
    }

    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
        let deadline = Instant::now() + self.timeouts.read;
        while self.input.len() < count {
            self.fill_some(deadline)?;
        }
        Ok(self.take(count))
    }
}
