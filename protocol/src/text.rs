//! Text protocol codec: line-based framing, `\r\n` delimited headers.
//!
//! Retrieval bodies carry a trailing `\r\nEND\r\n` footer that the body
//! reader absorbs; the header parser accounts for it by inflating the
//! expected body size by [`VALUE_FOOTER_LEN`].

use crate::{
    BodyKind, Code, Command, Parsed, ProtocolError, Response, StoreVerb, VALUE_FOOTER_LEN,
};

const CRLF: &[u8] = b"\r\n";

/// Serializes a command into its text-protocol line(s).
pub fn serialize(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    match command {
        Command::Store {
            verb,
            key,
            data,
            opts,
        } => {
            // <verb> <key> <flags> <exptime> <bytes>[ <cas>]\r\n<data>\r\n
            out.extend_from_slice(verb.name().as_bytes());
            out.push(b' ');
            out.extend_from_slice(key);
            out.extend_from_slice(
                format!(" {} {} {}", opts.flags, opts.expiration, data.len()).as_bytes(),
            );
            if *verb == StoreVerb::Cas {
                out.extend_from_slice(format!(" {}", opts.cas()).as_bytes());
            }
            out.extend_from_slice(CRLF);
            out.extend_from_slice(data);
            out.extend_from_slice(CRLF);
        }
        Command::Retrieve { verb, key } => {
            out.extend_from_slice(verb.name().as_bytes());
            out.push(b' ');
            out.extend_from_slice(key);
            out.extend_from_slice(CRLF);
        }
        Command::Arith {
            verb,
            key,
            delta,
            opts,
        } => {
            // The text protocol has no way to carry an initial value.
            if opts.initial() != 0 {
                return Err(ProtocolError::Unsupported(
                    "initial value not expressible in the text protocol".into(),
                ));
            }
            out.extend_from_slice(verb.name().as_bytes());
            out.push(b' ');
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {delta}").as_bytes());
            out.extend_from_slice(CRLF);
        }
        Command::Touch { key, expiration } => {
            out.extend_from_slice(b"touch ");
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {expiration}").as_bytes());
            out.extend_from_slice(CRLF);
        }
        Command::Delete { key } => {
            out.extend_from_slice(b"delete ");
            out.extend_from_slice(key);
            out.extend_from_slice(CRLF);
        }
        Command::FlushAll { expiration } => {
            out.extend_from_slice(b"flush_all");
            if *expiration != 0 {
                out.extend_from_slice(format!(" {expiration}").as_bytes());
            }
            out.extend_from_slice(CRLF);
        }
    }
    Ok(out)
}

/// Parses a response header line, dispatching on the command family.
pub fn parse_header(command: &Command, header: &[u8]) -> Parsed {
    let line = trim_crlf(header);
    if line.is_empty() {
        return Parsed::Done(Response::new(Code::Empty, "empty response"));
    }
    match command {
        Command::Store { .. } => parse_store(line),
        Command::Retrieve { .. } => parse_retrieve(line),
        Command::Arith { .. } => parse_arith(line),
        Command::Touch { .. } => parse_touch(line),
        Command::Delete { .. } => parse_delete(line),
        Command::FlushAll { .. } => parse_flush_all(line),
    }
}

fn trim_crlf(header: &[u8]) -> &[u8] {
    let mut line = header;
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\r' || last == b'\n' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

fn parse_store(line: &[u8]) -> Parsed {
    let done = |code, msg: &str| Parsed::Done(Response::new(code, msg));
    match line.first() {
        Some(b'S') if line.starts_with(b"STORED") => done(Code::Stored, ""),
        Some(b'E') if line.starts_with(b"EXISTS") => done(Code::Exists, "cas id expired"),
        Some(b'N') if line.starts_with(b"NOT_FOUND") => done(Code::NotFound, "cas id is invalid"),
        Some(b'N') if line.starts_with(b"NOT_STORED") => {
            done(Code::NotStored, "key (does not) exist")
        }
        _ => parse_common(line),
    }
}

fn parse_retrieve(line: &[u8]) -> Parsed {
    match line.first() {
        Some(b'E') if line.starts_with(b"END") => {
            Parsed::Done(Response::new(Code::NotFound, "not found"))
        }
        Some(b'V') if line.starts_with(b"VALUE") => parse_value_header(line),
        _ => parse_common(line),
    }
}

/// `VALUE <key> <flags> <bytes> [<cas>]`
fn parse_value_header(line: &[u8]) -> Parsed {
    let text = String::from_utf8_lossy(line);
    let mut fields = text.split_ascii_whitespace();
    let _value = fields.next();
    let _key = fields.next();
    let flags = fields.next().and_then(|f| f.parse::<u32>().ok());
    let bytes = fields.next().and_then(|f| f.parse::<usize>().ok());
    let cas = fields
        .next()
        .and_then(|f| f.parse::<u64>().ok())
        .unwrap_or(0);
    match (flags, bytes) {
        (Some(flags), Some(bytes)) => Parsed::Body {
            response: Response {
                code: Code::Ok,
                data: Vec::new(),
                flags,
                cas,
            },
            expected: bytes + VALUE_FOOTER_LEN,
            kind: BodyKind::TextValue,
        },
        _ => Parsed::Done(Response::new(
            Code::Syntax,
            format!("invalid response: {text}"),
        )),
    }
}

fn parse_arith(line: &[u8]) -> Parsed {
    match line.first() {
        Some(b'N') if line.starts_with(b"NOT_FOUND") => {
            Parsed::Done(Response::new(Code::NotFound, "key does not exist"))
        }
        Some(b'0'..=b'9') => {
            // <value>\r\n — the new counter value.
            Parsed::Done(Response::new(Code::Ok, line.to_vec()))
        }
        _ => parse_common(line),
    }
}

fn parse_touch(line: &[u8]) -> Parsed {
    match line.first() {
        Some(b'T') if line.starts_with(b"TOUCHED") => Parsed::Done(Response::new(Code::Touched, "")),
        Some(b'N') if line.starts_with(b"NOT_FOUND") => {
            Parsed::Done(Response::new(Code::NotFound, "key does not exist"))
        }
        _ => parse_common(line),
    }
}

fn parse_delete(line: &[u8]) -> Parsed {
    match line.first() {
        Some(b'D') if line.starts_with(b"DELETED") => Parsed::Done(Response::new(Code::Deleted, "")),
        Some(b'N') if line.starts_with(b"NOT_FOUND") => {
            Parsed::Done(Response::new(Code::NotFound, "key does not exist"))
        }
        _ => parse_common(line),
    }
}

fn parse_flush_all(line: &[u8]) -> Parsed {
    match line.first() {
        Some(b'O') if line.starts_with(b"OK") => Parsed::Done(Response::new(Code::Ok, "")),
        _ => parse_common(line),
    }
}

/// Error lines every command family can receive. Anything unrecognized
/// taints the connection.
fn parse_common(line: &[u8]) -> Parsed {
    let done = |code, msg: Vec<u8>| {
        Parsed::Done(Response {
            code,
            data: msg,
            flags: 0,
            cas: 0,
        })
    };
    match line.first() {
        Some(b'E') if line.starts_with(b"ERROR") => done(Code::Error, b"syntax error".to_vec()),
        Some(b'C') if line.starts_with(b"CLIENT_ERROR") => {
            done(Code::ClientError, error_desc(line))
        }
        Some(b'S') if line.starts_with(b"SERVER_ERROR") => {
            done(Code::ServerError, error_desc(line))
        }
        _ => done(Code::Unrecognized, line.to_vec()),
    }
}

/// The description after the first space of an error line.
fn error_desc(line: &[u8]) -> Vec<u8> {
    match line.iter().position(|&b| b == b' ') {
        Some(space) => line[space + 1..].to_vec(),
        None => Vec::new(),
    }
}
