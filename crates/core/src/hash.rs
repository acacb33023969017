//! Block hashing using murmur3 (x64, 128-bit)
//!
//! Every peer must produce bit-identical digests for the same bytes, so the
//! algorithm, seed and byte order here are fixed: murmur3 x64_128 with seed 0,
//! serialized as `h1` big-endian followed by `h2` big-endian.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Digest length in bytes
pub const HASH_LEN: usize = 16;

/// Hash of the single zero-length block that represents an empty file.
pub const EMPTY_BLOCK_HASH: BlockHash = BlockHash([0; HASH_LEN]);

/// A 128-bit block content hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; HASH_LEN]);

impl BlockHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        let full = fastmurmur3::hash(data);
        // low half is h1, high half is h2
        let h1 = full as u64;
        let h2 = (full >> 64) as u64;

        let mut out = [0u8; HASH_LEN];
        out[..8].copy_from_slice(&h1.to_be_bytes());
        out[8..].copy_from_slice(&h2.to_be_bytes());
        Self(out)
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_raw(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
