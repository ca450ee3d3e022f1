use std::time::Duration;

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for establishing a connection.
    pub connect: Duration,
    /// Deadline for one read operation.
    pub read: Duration,
    /// Deadline for one write operation.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(1000),
            write: Duration::from_millis(1000),
        }
    }
}

/// Connection options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoOpts {
    pub timeouts: Timeouts,
    /// Upper bound for the caching pool variant.
    pub max_connections_in_pool: usize,
}

impl Default for IoOpts {
    fn default() -> Self {
        IoOpts {
            timeouts: Timeouts::default(),
            max_connections_in_pool: 30,
        }
    }
}
