use crate::{Code, VALUE_FOOTER_LEN};

/// A decoded server response.
///
/// `data` is the retrieved value for retrievals, the decimal new value for
/// incr/decr, or a diagnostic message for error codes. `flags` and `cas`
/// are only populated by retrievals (and `cas` by binary responses
/// generally).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: Code,
    pub data: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

impl Response {
    /// A body-less response with a diagnostic message.
    pub fn new(code: Code, message: impl Into<Vec<u8>>) -> Self {
        Response {
            code,
            data: message.into(),
            flags: 0,
            cas: 0,
        }
    }

    /// The message as text, for diagnostics.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Completes this response with the body bytes the driver read.
    pub fn absorb_body(&mut self, kind: BodyKind, body: Vec<u8>) {
        match kind {
            BodyKind::Raw => {
                self.data = body;
            }
            BodyKind::TextValue => {
                // The body arrives with its trailing `\r\nEND\r\n` footer.
                let mut body = body;
                body.truncate(body.len().saturating_sub(VALUE_FOOTER_LEN));
                self.data = body;
            }
            BodyKind::BinValue {
                extras_len,
                key_len,
            } => {
                // extras (4-byte flags) + key + value
                if body.len() >= 4 {
                    self.flags = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                }
                let skip = extras_len as usize + key_len as usize;
                self.data = body.get(skip..).unwrap_or_default().to_vec();
            }
            BodyKind::BinCounter => {
                // 8-byte big-endian counter, rendered as decimal text for
                // uniformity with the text codec.
                let mut raw = [0u8; 8];
                let n = body.len().min(8);
                raw[..n].copy_from_slice(&body[..n]);
                self.data = u64::from_be_bytes(raw).to_string().into_bytes();
            }
        }
    }
}

/// How the driver must interpret a pending response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Copy the bytes through (error messages, opaque payloads).
    Raw,
    /// Text retrieval body followed by the 7-byte `\r\nEND\r\n` footer.
    TextValue,
    /// Binary retrieval body: flags extras, then key, then value.
    BinValue { extras_len: u8, key_len: u16 },
    /// Binary incr/decr body: one big-endian u64.
    BinCounter,
}

/// Result of parsing a response header.
#[derive(Debug, Clone)]
pub enum Parsed {
    /// The response is complete; nothing further to read.
    Done(Response),
    /// `expected` body bytes follow on the wire.
    Body {
        response: Response,
        expected: usize,
        kind: BodyKind,
    },
}

impl Parsed {
    /// Consumes the parse result, asserting no body was expected. Test aid.
    #[cfg(test)]
    pub(crate) fn unwrap_done(self) -> Response {
        match self {
            Parsed::Done(response) => response,
            Parsed::Body { response, .. } => {
                panic!("expected complete response, got body-bearing {response:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_value_strips_footer() {
        let mut response = Response::new(Code::Ok, "");
        response.absorb_body(BodyKind::TextValue, b"payload\r\nEND\r\n".to_vec());
        assert_eq!(response.data, b"payload");
    }

    #[test]
    fn bin_value_splits_extras_and_key() {
        let mut response = Response::new(Code::Ok, "");
        let mut body = 7u32.to_be_bytes().to_vec();
        body.extend_from_slice(b"key");
        body.extend_from_slice(b"value");
        response.absorb_body(
            BodyKind::BinValue {
                extras_len: 4,
                key_len: 3,
            },
            body,
        );
        assert_eq!(response.flags, 7);
        assert_eq!(response.data, b"value");
    }

    #[test]
    fn bin_counter_renders_decimal() {
        let mut response = Response::new(Code::Ok, "");
        response.absorb_body(BodyKind::BinCounter, 1138u64.to_be_bytes().to_vec());
        assert_eq!(response.data, b"1138");
    }
}
