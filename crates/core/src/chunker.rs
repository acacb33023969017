//! Fixed-size block chunking
//!
//! A file is split into blocks of `block_size` bytes (the last one may be
//! shorter), each identified by its [`BlockHash`]. Identical bytes and block
//! size always give the identical block list, which both the differ and
//! cross-device deduplication rely on.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::{BlockHash, EMPTY_BLOCK_HASH};

/// Block size used when the configuration does not say otherwise (128 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 128 << 10;

/// Upper bound on blocks reserved up front from a size hint
const MAX_RESERVED_BLOCKS: usize = 1 << 16;

/// One content-addressed block of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Byte offset in the file
    pub offset: u64,
    /// Length of this block in bytes
    pub size: u32,
    /// Hash of the block content
    pub hash: BlockHash,
}

impl Block {
    /// The lone block describing an empty file
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            offset: 0,
            size: 0,
            hash: EMPTY_BLOCK_HASH,
        }
    }

    /// Byte offset one past the end of this block
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// Chunk a stream into blocks.
///
/// `size_hint` is the expected stream length, used only to pre-size the
/// result and never trusted beyond that. When `counter` is given it is advanced by every byte hashed.
///
/// An empty stream yields exactly one zero-size block carrying
/// [`EMPTY_BLOCK_HASH`], never an empty list.
///
/// # Errors
/// Returns an error if reading fails, or if `block_size` is zero or does not
/// fit a block's u32 size.
pub fn blocks<R: Read>(
    mut reader: R,
    block_size: usize,
    size_hint: u64,
    counter: Option<&AtomicU64>,
) -> Result<Vec<Block>> {
    if block_size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size must be non-zero").into());
    }
    if u32::try_from(block_size).is_err() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size exceeds u32").into());
    }

    let reserved = usize::try_from(size_hint / block_size as u64)
        .unwrap_or(usize::MAX)
        .min(MAX_RESERVED_BLOCKS);
    let mut blocks = Vec::with_capacity(reserved);
    let mut buffer = Vec::with_capacity(block_size.min(DEFAULT_BLOCK_SIZE));
    let mut offset = 0u64;

    loop {
        buffer.clear();
        let n = reader
            .by_ref()
            .take(block_size as u64)
            .read_to_end(&mut buffer)?;
        if n == 0 {
            break;
        }

        if let Some(counter) = counter {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }

        blocks.push(Block {
            offset,
            size: u32::try_from(n).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "block size exceeds u32")
            })?,
            hash: BlockHash::of(&buffer),
        });
        offset += n as u64;
    }

    if blocks.is_empty() {
        blocks.push(Block::empty());
    }

    Ok(blocks)
}

/// Chunk an in-memory buffer (convenience function)
///
/// # Errors
/// Returns an error if `block_size` is zero.
pub fn blocks_of(data: &[u8], block_size: usize) -> Result<Vec<Block>> {
    blocks(data, block_size, data.len() as u64, None)
}

/// Recompute the offset of each block from the sizes before it.
pub fn populate_offsets(blocks: &mut [Block]) {
    let mut offset = 0u64;
    for block in blocks {
        block.offset = offset;
        offset += u64::from(block.size);
    }
}
