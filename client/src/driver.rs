//! Command driver: the one place protocol framing meets I/O.
//!
//! The exchange is always write → read header → optionally read one body.
//! The driver knows nothing about protocol semantics beyond that shape.

use scatter_io::{IoError, Transport};
use scatter_protocol::{Command, Flavor, HeaderFrame, Parsed, Response};

/// Runs one serialized command over a connection and decodes the response.
pub(crate) fn exchange<T: Transport>(
    conn: &mut T,
    flavor: Flavor,
    command: &Command,
    frame: &[u8],
) -> Result<Response, IoError> {
    conn.write(frame)?;

    let header = match flavor.header_frame() {
        HeaderFrame::Line => conn.read_until(b"\r\n")?,
        HeaderFrame::Fixed(len) => conn.read_exact(len)?,
    };

    match flavor.parse_header(command, &header) {
        Parsed::Done(response) => Ok(response),
        Parsed::Body {
            mut response,
            expected,
            kind,
        } => {
            if expected > 0 {
                let body = conn.read_exact(expected)?;
                response.absorb_body(kind, body);
            }
            Ok(response)
        }
    }
}
