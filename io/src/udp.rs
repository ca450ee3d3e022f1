//! UDP transport with the memcache 8-byte datagram framing.
//!
//! Every datagram starts with `{id: u16, seq: u16, count: u16, reserved:
//! u16}` in network byte order. A request is one datagram (`seq = 0`,
//! `count = 1`); the response may span several, which are reassembled
//! strictly in order before the byte stream is handed to the same
//! delimiter/count readers the TCP path uses.

use std::net::UdpSocket;
use std::time::Instant;

use tracing::debug;

use crate::tcp::resolve;
use crate::{IoError, IoOpts, Timeouts, Transport};

/// Datagram header length.
pub const PACKET_HEADER_LEN: usize = 8;

/// Largest datagram we are willing to receive.
const MAX_DATAGRAM: usize = 1 << 16;

/// The framing header of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Request/response correlation id, echoed back by the server.
    pub id: u16,
    /// Sequence number within the message.
    pub seq: u16,
    /// Total datagram count in the message.
    pub count: u16,
}

impl PacketHeader {
    /// Header for a fresh single-datagram request.
    pub fn request(id: u16) -> Self {
        PacketHeader {
            id,
            seq: 0,
            count: 1,
        }
    }

    pub fn pack(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut out = [0u8; PACKET_HEADER_LEN];
        out[0..2].copy_from_slice(&self.id.to_be_bytes());
        out[2..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..6].copy_from_slice(&self.count.to_be_bytes());
        // bytes 6..8 reserved, zero
        out
    }

    pub fn parse(raw: &[u8]) -> Option<PacketHeader> {
        if raw.len() < PACKET_HEADER_LEN {
            return None;
        }
        Some(PacketHeader {
            id: u16::from_be_bytes([raw[0], raw[1]]),
            seq: u16::from_be_bytes([raw[2], raw[3]]),
            count: u16::from_be_bytes([raw[4], raw[5]]),
        })
    }
}

/// One UDP "connection" to one server.
pub struct UdpConnection {
    addr: String,
    socket: UdpSocket,
    buffer: Vec<u8>,
    id: u16,
    timeouts: Timeouts,
}

impl UdpConnection {
    /// Resolves `addr` and binds a connected UDP socket.
    pub fn connect(addr: &str, opts: &IoOpts) -> Result<Self, IoError> {
        let dest = resolve(addr)?;
        let bind_addr = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket =
            UdpSocket::bind(bind_addr).map_err(|err| IoError::from_std(err, "connect", addr))?;
        socket
            .connect(dest)
            .map_err(|err| IoError::from_std(err, "connect", addr))?;
        Ok(UdpConnection {
            addr: addr.to_string(),
            socket,
            buffer: Vec::new(),
            id: 0,
            timeouts: opts.timeouts,
        })
    }

    /// Receives one datagram within the read deadline, appending its payload
    /// to the reassembly buffer.
    fn receive(&mut self, deadline: Instant) -> Result<PacketHeader, IoError> {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                IoError::Timeout(format!("can't read due to timeout: dst={}", self.addr))
            })?;
        self.socket
            .set_read_timeout(Some(remaining))
            .map_err(|err| IoError::from_std(err, "read", &self.addr))?;
        let mut datagram = [0u8; MAX_DATAGRAM];
        let size = self
            .socket
            .recv(&mut datagram)
            .map_err(|err| IoError::from_std(err, "read", &self.addr))?;
        let header = PacketHeader::parse(&datagram[..size])
            .ok_or_else(|| IoError::Io(format!("short datagram: dst={}", self.addr)))?;
        debug!(
            server = %self.addr,
            id = header.id,
            seq = header.seq,
            count = header.count,
            size,
            "datagram received"
        );
        self.buffer
            .extend_from_slice(&datagram[PACKET_HEADER_LEN..size]);
        Ok(header)
    }

    /// Reassembles one full response message into the buffer.
    fn fill(&mut self) -> Result<(), IoError> {
        let deadline = Instant::now() + self.timeouts.read;
        let first = self.receive(deadline)?;
        if first.seq != 0 {
            return Err(IoError::Io("first: invalid seq number".into()));
        }
        if first.id != self.id {
            return Err(IoError::Io("first: invalid id".into()));
        }
        for expected_seq in 1..first.count {
            let next = self.receive(deadline)?;
            if next.seq != expected_seq {
                return Err(IoError::Io("next: invalid seq number".into()));
            }
            if next.count != first.count {
                return Err(IoError::Io("next: invalid count".into()));
            }
            if next.id != self.id {
                return Err(IoError::Io("next: invalid id".into()));
            }
        }
        Ok(())
    }

    fn take(&mut self, count: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(count);
        std::mem::replace(&mut self.buffer, rest)
    }
}

impl Transport for UdpConnection {
    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.id = rand::random();
        let header = PacketHeader::request(self.id);
        let mut frame = Vec::with_capacity(PACKET_HEADER_LEN + data.len());
        frame.extend_from_slice(&header.pack());
        frame.extend_from_slice(data);

        let deadline = Instant::now() + self.timeouts.write;
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                IoError::Timeout(format!("can't write due to timeout: dst={}", self.addr))
            })?;
        self.socket
            .set_write_timeout(Some(remaining))
            .map_err(|err| IoError::from_std(err, "write", &self.addr))?;
        let sent = self
            .socket
            .send(&frame)
            .map_err(|err| IoError::from_std(err, "write", &self.addr))?;
        if sent != frame.len() {
            return Err(IoError::Io(format!("short datagram send: dst={}", self.addr)));
        }
        Ok(())
    }

    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, IoError> {
        if self.buffer.is_empty() {
            self.fill()?;
        }
        let at = self
            .buffer
            .windows(delimiter.len().max(1))
            .position(|window| window == delimiter)
            .ok_or_else(|| IoError::Io("partial input".into()))?;
        Ok(self.take(at + delimiter.len()))
    }

    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
        if self.buffer.is_empty() {
            self.fill()?;
        }
        if count > self.buffer.len() {
            return Err(IoError::Io("partial input".into()));
        }
        Ok(self.take(count))
    }
}
