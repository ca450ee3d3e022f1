use std::time::Duration;

use metriken::AtomicHistogram;

use scatter_protocol::Command;

// Bucket precision and range for the latency histograms: ~3% relative
// error, values up to 2^42 ns (about 73 minutes), far beyond any
// per-operation deadline.
const GROUPING_POWER: u8 = 5;
const MAX_VALUE_POWER: u8 = 42;

/// The command families latency is tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFamily {
    /// set/add/replace/append/prepend/cas.
    Store,
    /// get/gets.
    Retrieve,
    /// incr/decr.
    Arith,
    Touch,
    Delete,
    Flush,
}

impl OpFamily {
    const COUNT: usize = 6;

    fn of(command: &Command) -> OpFamily {
        match command {
            Command::Store { .. } => OpFamily::Store,
            Command::Retrieve { .. } => OpFamily::Retrieve,
            Command::Arith { .. } => OpFamily::Arith,
            Command::Touch { .. } => OpFamily::Touch,
            Command::Delete { .. } => OpFamily::Delete,
            Command::FlushAll { .. } => OpFamily::Flush,
        }
    }
}

/// Per-family wire latency, in nanoseconds.
///
/// Each command family gets one histogram, filled by the client loop around
/// every `send`. The histograms live on the client rather than in a global
/// registry, so an application running several clients can tell them apart.
pub struct ClientLatency {
    families: [AtomicHistogram; OpFamily::COUNT],
}

impl ClientLatency {
    pub(crate) fn new() -> Self {
        ClientLatency {
            families: std::array::from_fn(|_| {
                AtomicHistogram::new(GROUPING_POWER, MAX_VALUE_POWER)
            }),
        }
    }

    pub(crate) fn record(&self, command: &Command, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.families[OpFamily::of(command) as usize].increment(ns);
    }

    /// The latency histogram for one command family.
    pub fn family(&self, family: OpFamily) -> &AtomicHistogram {
        &self.families[family as usize]
    }
}
