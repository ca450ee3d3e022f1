//! Per-server connection pools.
//!
//! Three interchangeable strategies over a single server address:
//! `CreateNew` never caches, `Single` caches at most one connection (enough
//! for single-threaded callers), `Caching` keeps a bounded lock-free queue.
//! Returning a connection is only correct when the last exchange completed
//! at the protocol level; the proxy enforces that.

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::{Connector, IoError};

/// Pool strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStrategy {
    /// Construct a fresh connection per pick, drop on return.
    CreateNew,
    /// Cache a single connection.
    Single,
    /// Cache up to `max_connections_in_pool` connections.
    #[default]
    Caching,
}

enum Cache<T> {
    CreateNew,
    Single(Mutex<Option<T>>),
    Caching(ArrayQueue<T>),
}

/// A pool of reusable connections to one server.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    cache: Cache<C::Conn>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Builds a pool; `capacity` bounds the caching variant.
    pub fn new(connector: C, strategy: PoolStrategy, capacity: usize) -> Self {
        let cache = match strategy {
            PoolStrategy::CreateNew => Cache::CreateNew,
            PoolStrategy::Single => Cache::Single(Mutex::new(None)),
            PoolStrategy::Caching => Cache::Caching(ArrayQueue::new(capacity.max(1))),
        };
        ConnectionPool { connector, cache }
    }

    /// Takes a cached connection or constructs a new one.
    ///
    /// The caller owns the connection until it either returns it with
    /// [`put_back`](Self::put_back) or drops it.
    pub fn pick(&self) -> Result<C::Conn, IoError> {
        match &self.cache {
            Cache::CreateNew => {}
            Cache::Single(slot) => {
                if let Some(conn) = slot.lock().take() {
                    return Ok(conn);
                }
            }
            Cache::Caching(queue) => {
                if let Some(conn) = queue.pop() {
                    return Ok(conn);
                }
            }
        }
        self.connector.connect()
    }

    /// Returns a connection to the pool; drops it if the pool is full or
    /// the strategy never caches.
    pub fn put_back(&self, conn: C::Conn) {
        match &self.cache {
            Cache::CreateNew => {}
            Cache::Single(slot) => {
                *slot.lock() = Some(conn);
            }
            Cache::Caching(queue) => {
                // A full queue drops the connection on the floor.
                let _ = queue.push(conn);
            }
        }
    }

    /// Count of currently cached connections.
    pub fn len(&self) -> usize {
        match &self.cache {
            Cache::CreateNew => 0,
            Cache::Single(slot) => usize::from(slot.lock().is_some()),
            Cache::Caching(queue) => queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached connection. Used on the death transition.
    pub fn clear(&self) {
        match &self.cache {
            Cache::CreateNew => {}
            Cache::Single(slot) => {
                *slot.lock() = None;
            }
            Cache::Caching(queue) => while queue.pop().is_some() {},
        }
    }

    /// The server address this pool serves.
    pub fn server_name(&self) -> &str {
        self.connector.server_name()
    }
}
