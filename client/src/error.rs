use scatter_protocol::{Code, Response};

/// Failures surfaced to callers of [`Client`](crate::Client).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The request was malformed before it reached the wire (bad key,
    /// missing CAS token, option the wire flavor cannot express).
    #[error("bad argument: {0}")]
    BadArgument(String),
    /// Every candidate server was tried and none answered.
    #[error("out of servers")]
    OutOfServers,
    /// The atomic-update loop exhausted its iteration cap.
    #[error("unable to cas: max iterations reached")]
    UnableCas,
    /// The server answered with a code the operation cannot absorb.
    #[error("{code}: {message}")]
    Response { code: Code, message: String },
}

impl ClientError {
    pub(crate) fn from_response(response: &Response) -> ClientError {
        ClientError::Response {
            code: response.code,
            message: response.message(),
        }
    }

    /// The protocol code behind a [`ClientError::Response`], if any.
    pub fn code(&self) -> Option<Code> {
        match self {
            ClientError::Response { code, .. } => Some(*code),
            _ => None,
        }
    }
}
