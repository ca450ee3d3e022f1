use crate::Opts;

/// Storage command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StoreVerb {
    /// Wire name in the text protocol.
    pub fn name(self) -> &'static str {
        match self {
            StoreVerb::Set => "set",
            StoreVerb::Add => "add",
            StoreVerb::Replace => "replace",
            StoreVerb::Append => "append",
            StoreVerb::Prepend => "prepend",
            StoreVerb::Cas => "cas",
        }
    }
}

/// Retrieval command verbs. `gets` additionally returns the CAS token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveVerb {
    Get,
    Gets,
}

impl RetrieveVerb {
    pub fn name(self) -> &'static str {
        match self {
            RetrieveVerb::Get => "get",
            RetrieveVerb::Gets => "gets",
        }
    }
}

/// Counter command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithVerb {
    Incr,
    Decr,
}

impl ArithVerb {
    pub fn name(self) -> &'static str {
        match self {
            ArithVerb::Incr => "incr",
            ArithVerb::Decr => "decr",
        }
    }
}

/// One request, independent of wire flavor.
///
/// The variants are the protocol's command families; response-header parsing
/// dispatches on the family, because each family accepts a different set of
/// reply lines.
#[derive(Debug, Clone)]
pub enum Command {
    /// `set`/`add`/`replace`/`append`/`prepend`/`cas`.
    Store {
        verb: StoreVerb,
        key: Vec<u8>,
        data: Vec<u8>,
        opts: Opts,
    },
    /// `get`/`gets`.
    Retrieve { verb: RetrieveVerb, key: Vec<u8> },
    /// `incr`/`decr` by `delta`.
    Arith {
        verb: ArithVerb,
        key: Vec<u8>,
        delta: u64,
        opts: Opts,
    },
    /// `touch`: reset a value's expiration.
    Touch { key: Vec<u8>, expiration: u32 },
    /// `delete`.
    Delete { key: Vec<u8> },
    /// `flush_all`, broadcast to every server.
    FlushAll { expiration: u32 },
}

impl Command {
    /// The key this command routes on; `flush_all` has none.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Command::Store { key, .. }
            | Command::Retrieve { key, .. }
            | Command::Arith { key, .. }
            | Command::Touch { key, .. }
            | Command::Delete { key } => Some(key),
            Command::FlushAll { .. } => None,
        }
    }

    /// True for `get`/`gets`, the commands the probing-window heuristic
    /// applies to.
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Command::Retrieve { .. })
    }
}
