//! Memcache wire protocol: command model plus the text and binary codecs.
//!
//! A [`Command`] describes one request independent of wire format. A
//! [`Flavor`] serializes it and parses the response header; when the header
//! announces a body, the caller reads exactly [`Parsed::Body::expected`]
//! bytes and completes the response with [`Response::absorb_body`]. The
//! protocol layer never touches a socket.
//!
//! Protocol details follow the memcached protocol documents:
//! text <https://github.com/memcached/memcached/blob/master/doc/protocol.txt>,
//! binary framing per the 24-byte header with big-endian fields.

pub mod binary;
mod code;
mod command;
mod opts;
mod response;
pub mod text;

pub use code::Code;
pub use command::{ArithVerb, Command, RetrieveVerb, StoreVerb};
pub use opts::Opts;
pub use response::{BodyKind, Parsed, Response};

/// Maximum key length accepted by memcached.
pub const MAX_KEY_LEN: usize = 250;

/// Footer trailing every text-protocol retrieval body: `\r\nEND\r\n`.
pub const VALUE_FOOTER_LEN: usize = 7;

/// Protocol errors raised before any bytes hit the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// The key is empty, too long, or contains whitespace/control bytes.
    #[error("invalid key: {0}")]
    BadKey(String),
    /// The request cannot be expressed in the selected wire flavor.
    #[error("{0}")]
    Unsupported(String),
}

/// Validates a key: at most [`MAX_KEY_LEN`] bytes, no ASCII whitespace and
/// no control characters.
pub fn validate_key(key: &[u8]) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::BadKey("empty key".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::BadKey(format!(
            "key length {} exceeds {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    for &byte in key {
        if byte < 0x20 || byte == 0x7f {
            return Err(ProtocolError::BadKey("key contains control byte".into()));
        }
        if byte == b' ' {
            return Err(ProtocolError::BadKey("key contains whitespace".into()));
        }
    }
    Ok(())
}

/// Wire flavor: line-delimited text or framed binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    /// Line-based protocol, `\r\n` delimited headers.
    #[default]
    Text,
    /// Binary protocol, 24-byte request/response headers.
    Binary,
}

/// How a response header is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFrame {
    /// Read until the `\r\n` delimiter.
    Line,
    /// Read exactly this many bytes.
    Fixed(usize),
}

impl Flavor {
    /// Returns the response-header framing for this flavor.
    pub fn header_frame(&self) -> HeaderFrame {
        match self {
            Flavor::Text => HeaderFrame::Line,
            Flavor::Binary => HeaderFrame::Fixed(binary::HEADER_LEN),
        }
    }

    /// Serializes a command into a wire frame.
    ///
    /// The command's key must already be validated; flavor-specific argument
    /// restrictions (text incr/decr cannot carry an initial value) are
    /// checked here.
    pub fn serialize(&self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Flavor::Text => text::serialize(command),
            Flavor::Binary => Ok(binary::serialize(command)),
        }
    }

    /// Parses a response header for the given command.
    pub fn parse_header(&self, command: &Command, header: &[u8]) -> Parsed {
        match self {
            Flavor::Text => text::parse_header(command, header),
            Flavor::Binary => binary::parse_header(command, header),
        }
    }
}
