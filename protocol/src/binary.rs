//! Binary protocol codec: 24-byte framed headers, big-endian fields.

use crate::{ArithVerb, BodyKind, Code, Command, Parsed, Response, StoreVerb};

/// Size of every request and response header.
pub const HEADER_LEN: usize = 24;

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;

// Opcodes. get and gets share 0x00 (the CAS token always rides the response
// header); set and cas share 0x01 (a nonzero header cas makes it a cas).
pub const OP_GET: u8 = 0x00;
pub const OP_SET: u8 = 0x01;
pub const OP_ADD: u8 = 0x02;
pub const OP_REPLACE: u8 = 0x03;
pub const OP_DELETE: u8 = 0x04;
pub const OP_INCREMENT: u8 = 0x05;
pub const OP_DECREMENT: u8 = 0x06;
pub const OP_FLUSH: u8 = 0x08;
pub const OP_APPEND: u8 = 0x0e;
pub const OP_PREPEND: u8 = 0x0f;
pub const OP_TOUCH: u8 = 0x1c;

/// The 24-byte wire header, kept in host integers; `pack`/`parse` do the
/// endian work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// Reserved on requests, status on responses.
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    fn request(opcode: u8, key_len: u16, extras_len: u8, body_len: u32) -> Self {
        Header {
            magic: REQUEST_MAGIC,
            opcode,
            key_len,
            extras_len,
            data_type: 0,
            status: 0,
            body_len,
            opaque: 0,
            cas: 0,
        }
    }

    /// Serializes the header into its 24 wire bytes.
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.magic;
        out[1] = self.opcode;
        out[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        out[4] = self.extras_len;
        out[5] = self.data_type;
        out[6..8].copy_from_slice(&self.status.to_be_bytes());
        out[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        out[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        out[16..24].copy_from_slice(&self.cas.to_be_bytes());
        out
    }

    /// Parses 24 wire bytes; shorter input yields `None`.
    pub fn parse(raw: &[u8]) -> Option<Header> {
        if raw.len() < HEADER_LEN {
            return None;
        }
        Some(Header {
            magic: raw[0],
            opcode: raw[1],
            key_len: u16::from_be_bytes([raw[2], raw[3]]),
            extras_len: raw[4],
            data_type: raw[5],
            status: u16::from_be_bytes([raw[6], raw[7]]),
            body_len: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
            opaque: u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
            cas: u64::from_be_bytes([
                raw[16], raw[17], raw[18], raw[19], raw[20], raw[21], raw[22], raw[23],
            ]),
        })
    }
}

/// Translates a response status into the shared code enumeration.
fn translate_status(status: u16) -> Code {
    match status {
        0x0001 => Code::NotFound,
        0x0002 => Code::Exists,
        0x0003 | 0x0082 => Code::ServerError,
        0x0004 | 0x0006 => Code::ClientError,
        0x0005 => Code::NotStored,
        _ => Code::Error,
    }
}

/// Serializes a command into a binary request frame.
pub fn serialize(command: &Command) -> Vec<u8> {
    match command {
        Command::Store {
            verb,
            key,
            data,
            opts,
        } => {
            let (opcode, extras_len) = match verb {
                StoreVerb::Set | StoreVerb::Cas => (OP_SET, 8u8),
                StoreVerb::Add => (OP_ADD, 8),
                StoreVerb::Replace => (OP_REPLACE, 8),
                StoreVerb::Append => (OP_APPEND, 0),
                StoreVerb::Prepend => (OP_PREPEND, 0),
            };
            let body_len = extras_len as u32 + key.len() as u32 + data.len() as u32;
            let mut header = Header::request(opcode, key.len() as u16, extras_len, body_len);
            if opts.cas() != 0 {
                header.cas = opts.cas();
            }
            let mut out = header.pack().to_vec();
            if extras_len != 0 {
                out.extend_from_slice(&opts.flags.to_be_bytes());
                out.extend_from_slice(&opts.expiration.to_be_bytes());
            }
            out.extend_from_slice(key);
            out.extend_from_slice(data);
            out
        }
        Command::Retrieve { key, .. } => {
            let header = Header::request(OP_GET, key.len() as u16, 0, key.len() as u32);
            let mut out = header.pack().to_vec();
            out.extend_from_slice(key);
            out
        }
        Command::Arith {
            verb,
            key,
            delta,
            opts,
        } => {
            let opcode = match verb {
                ArithVerb::Incr => OP_INCREMENT,
                ArithVerb::Decr => OP_DECREMENT,
            };
            // extras: delta + initial + expiration
            let extras_len = 20u8;
            let body_len = extras_len as u32 + key.len() as u32;
            let header = Header::request(opcode, key.len() as u16, extras_len, body_len);
            let mut out = header.pack().to_vec();
            out.extend_from_slice(&delta.to_be_bytes());
            out.extend_from_slice(&opts.initial().to_be_bytes());
            out.extend_from_slice(&opts.expiration.to_be_bytes());
            out.extend_from_slice(key);
            out
        }
        Command::Touch { key, expiration } => {
            let extras_len = 4u8;
            let body_len = extras_len as u32 + key.len() as u32;
            let header = Header::request(OP_TOUCH, key.len() as u16, extras_len, body_len);
            let mut out = header.pack().to_vec();
            out.extend_from_slice(&expiration.to_be_bytes());
            out.extend_from_slice(key);
            out
        }
        Command::Delete { key } => {
            let header = Header::request(OP_DELETE, key.len() as u16, 0, key.len() as u32);
            let mut out = header.pack().to_vec();
            out.extend_from_slice(key);
            out
        }
        Command::FlushAll { expiration } => {
            let header = Header::request(OP_FLUSH, 0, 4, 4);
            let mut out = header.pack().to_vec();
            out.extend_from_slice(&expiration.to_be_bytes());
            out
        }
    }
}

/// Parses a binary response header, dispatching on the command family.
pub fn parse_header(command: &Command, raw: &[u8]) -> Parsed {
    if raw.is_empty() {
        return Parsed::Done(Response::new(Code::Empty, "empty response"));
    }
    let header = match Header::parse(raw) {
        Some(header) => header,
        None => return Parsed::Done(Response::new(Code::Unrecognized, "short response header")),
    };
    if header.magic != RESPONSE_MAGIC {
        return Parsed::Done(Response::new(Code::Unrecognized, "bad magic in response"));
    }
    if header.status != 0 {
        return error_response(&header);
    }
    match command {
        Command::Retrieve { .. } => {
            // A hit carries the flags in a 4-byte extras block.
            if header.extras_len != 4 {
                return Parsed::Done(Response::new(Code::Invalid, "bad extras length"));
            }
            Parsed::Body {
                response: Response {
                    code: Code::Ok,
                    data: Vec::new(),
                    flags: 0,
                    cas: header.cas,
                },
                expected: header.body_len as usize,
                kind: BodyKind::BinValue {
                    extras_len: header.extras_len,
                    key_len: header.key_len,
                },
            }
        }
        Command::Arith { .. } => {
            if header.body_len != 8 {
                return Parsed::Done(Response::new(Code::Invalid, "bad body length"));
            }
            Parsed::Body {
                response: Response {
                    code: Code::Ok,
                    data: Vec::new(),
                    flags: 0,
                    cas: header.cas,
                },
                expected: 8,
                kind: BodyKind::BinCounter,
            }
        }
        Command::Store { .. } => done_with_drain(&header, Code::Stored),
        Command::Touch { .. } => done_with_drain(&header, Code::Touched),
        Command::Delete { .. } => done_with_drain(&header, Code::Deleted),
        Command::FlushAll { .. } => done_with_drain(&header, Code::Ok),
    }
}

/// Success response that usually has no body; any body the server did send
/// still has to be drained off the wire.
fn done_with_drain(header: &Header, code: Code) -> Parsed {
    let response = Response {
        code,
        data: Vec::new(),
        flags: 0,
        cas: header.cas,
    };
    if header.body_len == 0 {
        return Parsed::Done(response);
    }
    Parsed::Body {
        response,
        expected: header.body_len as usize,
        kind: BodyKind::Raw,
    }
}

/// Nonzero status: translate it, and read off the diagnostic message body
/// so the connection stays in sync.
fn error_response(header: &Header) -> Parsed {
    let code = translate_status(header.status);
    let response = Response::new(code, "");
    if header.body_len == 0 {
        return Parsed::Done(response);
    }
    Parsed::Body {
        response,
        expected: header.body_len as usize,
        kind: BodyKind::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Opts, RetrieveVerb};

    fn get(key: &str) -> Command {
        Command::Retrieve {
            verb: RetrieveVerb::Get,
            key: key.into(),
        }
    }

    fn response_header(opcode: u8, status: u16, extras_len: u8, key_len: u16, body_len: u32, cas: u64) -> Vec<u8> {
        Header {
            magic: RESPONSE_MAGIC,
            opcode,
            key_len,
            extras_len,
            data_type: 0,
            status,
            body_len,
            opaque: 0,
            cas,
        }
        .pack()
        .to_vec()
    }

    #[test]
    fn header_roundtrip() {
        let header = Header {
            magic: REQUEST_MAGIC,
            opcode: OP_SET,
            key_len: 5,
            extras_len: 8,
            data_type: 0,
            status: 0,
            body_len: 20,
            opaque: 0xdead,
            cas: 0x1122_3344_5566_7788,
        };
        let packed = header.pack();
        assert_eq!(Header::parse(&packed), Some(header));
        // Big-endian spot checks.
        assert_eq!(&packed[2..4], &[0x00, 0x05]);
        assert_eq!(&packed[8..12], &[0x00, 0x00, 0x00, 0x14]);
        assert_eq!(packed[16], 0x11);
        assert_eq!(packed[23], 0x88);
    }

    #[test]
    fn serialize_set_layout() {
        let cmd = Command::Store {
            verb: StoreVerb::Set,
            key: b"key".to_vec(),
            data: b"value".to_vec(),
            opts: Opts::new(3600, 7),
        };
        let wire = serialize(&cmd);
        let header = Header::parse(&wire).unwrap();
        assert_eq!(header.magic, REQUEST_MAGIC);
        assert_eq!(header.opcode, OP_SET);
        assert_eq!(header.key_len, 3);
        assert_eq!(header.extras_len, 8);
        assert_eq!(header.body_len, 8 + 3 + 5);
        assert_eq!(header.cas, 0);
        // extras: flags then expiration, both big-endian
        assert_eq!(&wire[24..28], &7u32.to_be_bytes());
        assert_eq!(&wire[28..32], &3600u32.to_be_bytes());
        assert_eq!(&wire[32..35], b"key");
        assert_eq!(&wire[35..], b"value");
    }

    #[test]
    fn serialize_cas_sets_header_token() {
        let cmd = Command::Store {
            verb: StoreVerb::Cas,
            key: b"k".to_vec(),
            data: b"v".to_vec(),
            opts: Opts::with_cas(0, 0, 42),
        };
        let header = Header::parse(&serialize(&cmd)).unwrap();
        assert_eq!(header.opcode, OP_SET);
        assert_eq!(header.cas, 42);
    }

    #[test]
    fn serialize_append_has_no_extras() {
        let cmd = Command::Store {
            verb: StoreVerb::Append,
            key: b"k".to_vec(),
            data: b"v".to_vec(),
            opts: Opts::default(),
        };
        let wire = serialize(&cmd);
        let header = Header::parse(&wire).unwrap();
        assert_eq!(header.opcode, OP_APPEND);
        assert_eq!(header.extras_len, 0);
        assert_eq!(header.body_len, 2);
        assert_eq!(&wire[24..25], b"k");
    }

    #[test]
    fn serialize_incr_extras() {
        let cmd = Command::Arith {
            verb: ArithVerb::Incr,
            key: b"c".to_vec(),
            delta: 5,
            opts: Opts::with_initial(60, 100),
        };
        let wire = serialize(&cmd);
        let header = Header::parse(&wire).unwrap();
        assert_eq!(header.opcode, OP_INCREMENT);
        assert_eq!(header.extras_len, 20);
        assert_eq!(header.body_len, 20 + 1);
        assert_eq!(&wire[24..32], &5u64.to_be_bytes());
        assert_eq!(&wire[32..40], &100u64.to_be_bytes());
        assert_eq!(&wire[40..44], &60u32.to_be_bytes());
        assert_eq!(&wire[44..], b"c");
    }

    #[test]
    fn serialize_touch_and_flush_extras() {
        let touch = Command::Touch {
            key: b"k".to_vec(),
            expiration: 300,
        };
        let wire = serialize(&touch);
        let header = Header::parse(&wire).unwrap();
        assert_eq!(header.opcode, OP_TOUCH);
        assert_eq!(header.extras_len, 4);
        assert_eq!(&wire[24..28], &300u32.to_be_bytes());

        let flush = Command::FlushAll { expiration: 10 };
        let wire = serialize(&flush);
        let header = Header::parse(&wire).unwrap();
        assert_eq!(header.opcode, OP_FLUSH);
        assert_eq!(header.key_len, 0);
        assert_eq!(header.body_len, 4);
    }

    #[test]
    fn parse_get_hit() {
        let raw = response_header(OP_GET, 0, 4, 0, 4 + 5, 42);
        match parse_header(&get("k"), &raw) {
            Parsed::Body {
                response,
                expected,
                kind,
            } => {
                assert_eq!(response.code, Code::Ok);
                assert_eq!(response.cas, 42);
                assert_eq!(expected, 9);
                assert_eq!(
                    kind,
                    BodyKind::BinValue {
                        extras_len: 4,
                        key_len: 0
                    }
                );
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parse_get_bad_extras() {
        let raw = response_header(OP_GET, 0, 2, 0, 7, 0);
        assert_eq!(parse_header(&get("k"), &raw).unwrap_done().code, Code::Invalid);
    }

    #[test]
    fn parse_bad_magic_taints() {
        let mut raw = response_header(OP_GET, 0, 4, 0, 4, 0);
        raw[0] = REQUEST_MAGIC;
        assert_eq!(
            parse_header(&get("k"), &raw).unwrap_done().code,
            Code::Unrecognized
        );
    }

    #[test]
    fn status_translation() {
        let cases = [
            (0x0001, Code::NotFound),
            (0x0002, Code::Exists),
            (0x0003, Code::ServerError),
            (0x0004, Code::ClientError),
            (0x0005, Code::NotStored),
            (0x0006, Code::ClientError),
            (0x0081, Code::Error),
            (0x0082, Code::ServerError),
            (0x7fff, Code::Error),
        ];
        let cmd = Command::Store {
            verb: StoreVerb::Set,
            key: b"k".to_vec(),
            data: b"v".to_vec(),
            opts: Opts::default(),
        };
        for (status, code) in cases {
            let raw = response_header(OP_SET, status, 0, 0, 0, 0);
            assert_eq!(parse_header(&cmd, &raw).unwrap_done().code, code);
        }
    }

    #[test]
    fn error_message_body_is_drained() {
        // A miss carries "Not found" as its body; the driver must read it.
        let raw = response_header(OP_GET, 0x0001, 0, 0, 9, 0);
        match parse_header(&get("k"), &raw) {
            Parsed::Body {
                response,
                expected,
                kind,
            } => {
                assert_eq!(response.code, Code::NotFound);
                assert_eq!(expected, 9);
                assert_eq!(kind, BodyKind::Raw);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parse_counter() {
        let cmd = Command::Arith {
            verb: ArithVerb::Decr,
            key: b"c".to_vec(),
            delta: 1,
            opts: Opts::default(),
        };
        let raw = response_header(OP_DECREMENT, 0, 0, 0, 8, 3);
        match parse_header(&cmd, &raw) {
            Parsed::Body { expected, kind, .. } => {
                assert_eq!(expected, 8);
                assert_eq!(kind, BodyKind::BinCounter);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        // Wrong body length is invalid.
        let raw = response_header(OP_DECREMENT, 0, 0, 0, 4, 0);
        assert_eq!(parse_header(&cmd, &raw).unwrap_done().code, Code::Invalid);
    }
}
