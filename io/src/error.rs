/// Transport failures.
///
/// `Timeout` is deliberately distinct from `Io`: a deadline expiry and a
/// network fault surface differently to operators, but they share the
/// property that the connection is no longer reusable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IoError {
    /// Network fault (reset, refused, short read, bad datagram, ...).
    #[error("i/o error: {0}")]
    Io(String),
    /// A per-operation deadline expired.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The configured address did not parse or resolve.
    #[error("invalid destination address: {0}")]
    BadAddress(String),
}

impl IoError {
    /// Maps a std I/O error, classifying deadline expiries.
    pub(crate) fn from_std(err: std::io::Error, context: &str, addr: &str) -> IoError {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                IoError::Timeout(format!("can't {context} due to timeout: dst={addr}"))
            }
            _ => IoError::Io(format!("{context} failed: {err}: dst={addr}")),
        }
    }
}
