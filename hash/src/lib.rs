//! Keyed 32-bit hash functions used for key distribution.
//!
//! All four functions share the signature `fn(&[u8], u32) -> u32` so the
//! ring can chain seeds when placing virtual nodes (`seed = hash(addr, seed)`)
//! and hash lookup keys with seed zero. They are interchangeable at client
//! construction time; [`HashKind::Murmur3`] is the default.

mod city;
mod jenkins;
mod murmur3;
mod spooky;

pub use city::city;
pub use jenkins::jenkins;
pub use murmur3::murmur3;
pub use spooky::spooky;

/// A keyed 32-bit hash over a byte slice.
pub type HashFn = fn(&[u8], u32) -> u32;

/// Selects which hash function a pool uses.
///
/// The choice only matters for ring placement; all servers of one deployment
/// must agree on it or keys migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashKind {
    /// Bob Jenkins lookup3 (`hashlittle`).
    Jenkins,
    /// Austin Appleby MurmurHash3, x86 32-bit variant.
    #[default]
    Murmur3,
    /// CityHash, seeded 64-bit variant truncated to 32 bits.
    City,
    /// Bob Jenkins SpookyHash V2, 32-bit result.
    Spooky,
}

impl HashKind {
    /// Returns the hash function for this kind.
    pub fn hasher(self) -> HashFn {
        match self {
            HashKind::Jenkins => jenkins,
            HashKind::Murmur3 => murmur3,
            HashKind::City => city,
            HashKind::Spooky => spooky,
        }
    }
}
