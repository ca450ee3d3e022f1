/// Server response codes, shared by both wire flavors.
///
/// The numeric bands matter: 2xx are successes, 4xx are protocol-complete
/// non-successes (the connection stays reusable), 5xx and above are errors
/// that taint the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Code {
    Ok = 200,
    Stored = 201,
    Deleted = 202,
    Touched = 203,

    NotStored = 400,
    Exists = 401,
    NotFound = 404,

    Error = 500,
    ClientError = 501,
    ServerError = 502,
    Empty = 503,
    IoError = 504,
    Syntax = 505,
    Invalid = 506,

    Unrecognized = 1000,
}

impl Code {
    /// True for the 2xx success band.
    pub fn is_success(self) -> bool {
        (self as u16) / 100 == 2
    }

    /// True when the exchange completed at the protocol level, meaning the
    /// connection can be returned to its pool.
    pub fn is_reusable(self) -> bool {
        (self as u16) < Code::Error as u16
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::Ok => "ok",
            Code::Stored => "stored",
            Code::Deleted => "deleted",
            Code::Touched => "touched",
            Code::NotStored => "not-stored",
            Code::Exists => "exists",
            Code::NotFound => "not-found",
            Code::Error => "error",
            Code::ClientError => "client-error",
            Code::ServerError => "server-error",
            Code::Empty => "empty",
            Code::IoError => "io-error",
            Code::Syntax => "syntax",
            Code::Invalid => "invalid",
            Code::Unrecognized => "unrecognized",
        };
        write!(f, "{name}")
    }
}
