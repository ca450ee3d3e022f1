//! Key distribution pools: the consistent-hashing ring and the modulo pool.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use scatter_hash::{HashFn, HashKind};

/// Key-distribution configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Ring positions per server (default: 200).
    pub virtual_nodes: u32,
    /// Hash function for ring placement and key lookup.
    pub hash: HashKind,
    /// Which pool implementation routes keys.
    pub kind: RouterKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            virtual_nodes: 200,
            hash: HashKind::default(),
            kind: RouterKind::default(),
        }
    }
}

/// Pool implementation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterKind {
    /// Virtual-node ring; resharding migrates ~1/N of the keys.
    #[default]
    ConsistentHashing,
    /// `hash(key) mod N`; trivial, but resharding migrates most keys.
    Modulo,
}

/// Ketama-style consistent-hashing ring.
///
/// Each server contributes `virtual_nodes` positions obtained by chaining
/// the hash over its address (`seed = hash(addr, seed)`). Placement
/// collisions are resolved last-write-wins in address × virtual-node order.
pub struct ConsistentHashRing {
    ring: BTreeMap<u32, u32>,
    hash: HashFn,
}

impl ConsistentHashRing {
    /// Builds the ring. `addresses` must be non-empty.
    pub fn new<A: AsRef<str>>(addresses: &[A], virtual_nodes: u32, hash: HashFn) -> Self {
        let mut ring = BTreeMap::new();
        for (index, addr) in addresses.iter().enumerate() {
            let addr = addr.as_ref().as_bytes();
            let mut seed = 0u32;
            for _ in 0..virtual_nodes {
                seed = hash(addr, seed);
                ring.insert(seed, index as u32);
            }
        }
        ConsistentHashRing { ring, hash }
    }

    /// Number of distinct ring positions.
    pub fn positions(&self) -> usize {
        self.ring.len()
    }

    /// Iterator over candidate server indices for `key`: starts at the
    /// first position at or after `hash(key, 0)`, walks forward, wraps once,
    /// and ends after a full traversal.
    pub fn choose(&self, key: &[u8]) -> RingIter<'_> {
        let point = (self.hash)(key, 0);
        RingIter {
            inner: self.ring.range(point..).chain(self.ring.range(..point)),
        }
    }

    /// Renders `[hash] -> index state` lines for diagnostics.
    pub fn dump(&self, states: &[String]) -> String {
        let mut out = String::new();
        for (point, index) in &self.ring {
            let _ = write!(out, "[{point}] -> {index}");
            if let Some(state) = states.get(*index as usize) {
                let _ = write!(out, " {state}");
            }
            out.push('\n');
        }
        out
    }
}

/// Forward ring walk with a single wrap.
pub struct RingIter<'a> {
    inner: std::iter::Chain<btree_map::Range<'a, u32, u32>, btree_map::Range<'a, u32, u32>>,
}

impl Iterator for RingIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.inner.next().map(|(_, index)| *index)
    }
}

/// The trivial alternative: `hash(key) mod N`, one candidate per key.
pub struct ModPool {
    servers: u32,
    hash: HashFn,
}

impl ModPool {
    pub fn new(servers: usize, hash: HashFn) -> Self {
        ModPool {
            servers: servers as u32,
            hash,
        }
    }

    pub fn choose(&self, key: &[u8]) -> ModIter {
        ModIter {
            index: Some((self.hash)(key, 0) % self.servers),
        }
    }

    pub fn dump(&self, states: &[String]) -> String {
        let mut out = String::new();
        for index in 0..self.servers {
            let _ = write!(out, "[{index}] -> {index}");
            if let Some(state) = states.get(index as usize) {
                let _ = write!(out, " {state}");
            }
            out.push('\n');
        }
        out
    }
}

/// Single-shot iterator of the modulo pool.
pub struct ModIter {
    index: Option<u32>,
}

impl Iterator for ModIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.index.take()
    }
}

/// The pool actually wired into a client.
pub(crate) enum Router {
    Ring(ConsistentHashRing),
    Modulo(ModPool),
}

impl Router {
    pub(crate) fn new<A: AsRef<str>>(addresses: &[A], config: &PoolConfig) -> Router {
        match config.kind {
            RouterKind::ConsistentHashing => Router::Ring(ConsistentHashRing::new(
                addresses,
                config.virtual_nodes,
                config.hash.hasher(),
            )),
            RouterKind::Modulo => {
                Router::Modulo(ModPool::new(addresses.len(), config.hash.hasher()))
            }
        }
    }

    pub(crate) fn choose(&self, key: &[u8]) -> RouteIter<'_> {
        match self {
            Router::Ring(ring) => RouteIter::Ring(ring.choose(key)),
            Router::Modulo(pool) => RouteIter::Modulo(pool.choose(key)),
        }
    }

    pub(crate) fn dump(&self, states: &[String]) -> String {
        match self {
            Router::Ring(ring) => ring.dump(states),
            Router::Modulo(pool) => pool.dump(states),
        }
    }
}

pub(crate) enum RouteIter<'a> {
    Ring(RingIter<'a>),
    Modulo(ModIter),
}

impl Iterator for RouteIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            RouteIter::Ring(iter) => iter.next(),
            RouteIter::Modulo(iter) => iter.next(),
        }
    }
}
