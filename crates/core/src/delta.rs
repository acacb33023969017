//! Block-level delta computation and content verification

use std::io::Read;

use crate::chunker::Block;
use crate::error::{Mismatch, Result};
use crate::hash::BlockHash;

/// Split `target` into blocks already present in `source` (`have`) and
/// blocks that must be fetched (`need`).
///
/// Both lists must have been created with the same block size. Blocks are
/// compared index-wise: a target block is in `have` only when the source
/// block at the same index has the same hash.
///
/// An empty target against a non-empty source yields nothing at all; the
/// caller handles that case as a deletion. An empty source needs the whole
/// target.
#[must_use]
pub fn diff(source: &[Block], target: &[Block]) -> (Vec<Block>, Vec<Block>) {
    if target.is_empty() && !source.is_empty() {
        return (Vec::new(), Vec::new());
    }

    if source.is_empty() {
        return (Vec::new(), target.to_vec());
    }

    let mut have = Vec::new();
    let mut need = Vec::new();
    for (i, block) in target.iter().enumerate() {
        match source.get(i) {
            Some(src) if src.hash == block.hash => have.push(*block),
            _ => need.push(*block),
        }
    }

    (have, need)
}

/// Check that a stream matches a block list exactly.
///
/// The stream is re-chunked with `block_size` and every hash compared in
/// order. It must end exactly where the last block ends.
///
/// # Errors
/// Returns [`Error::IntegrityMismatch`](crate::Error::IntegrityMismatch) on the
/// first disagreement, or an I/O error if reading fails.
pub fn verify<R: Read>(mut reader: R, block_size: usize, blocks: &[Block]) -> Result<()> {
    let mut buffer = Vec::with_capacity(block_size);

    for (index, block) in blocks.iter().enumerate() {
        buffer.clear();
        reader
            .by_ref()
            .take(block_size as u64)
            .read_to_end(&mut buffer)?;

        let actual_len = buffer.len() as u64;
        let expected_len = u64::from(block.size);
        if actual_len < expected_len {
            return Err(Mismatch::EndsEarly {
                index,
                expected: expected_len,
                actual: actual_len,
            }
            .into());
        }
        if actual_len > expected_len {
            return Err(Mismatch::ContinuesPastEnd {
                declared: block.end(),
            }
            .into());
        }

        let actual = BlockHash::of(&buffer);
        if actual != block.hash {
            return Err(Mismatch::HashMismatch {
                index,
                expected: block.hash,
                actual,
            }
            .into());
        }
    }

    // We should have reached the end now
    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        let declared = blocks.last().map_or(0, Block::end);
        return Err(Mismatch::ContinuesPastEnd { declared }.into());
    }

    Ok(())
}

/// Check one fetched block, returning its hash on success.
///
/// # Errors
/// Returns [`Error::IntegrityMismatch`](crate::Error::IntegrityMismatch) when
/// the length or hash disagrees with `block`.
pub fn verify_buffer(buf: &[u8], block: &Block) -> Result<BlockHash> {
    let actual_len = buf.len() as u64;
    let expected_len = u64::from(block.size);
    if actual_len < expected_len {
        return Err(Mismatch::EndsEarly {
            index: 0,
            expected: expected_len,
            actual: actual_len,
        }
        .into());
    }
    if actual_len > expected_len {
        return Err(Mismatch::ContinuesPastEnd {
            declared: expected_len,
        }
        .into());
    }

    let actual = BlockHash::of(buf);
    if actual != block.hash {
        return Err(Mismatch::HashMismatch {
            index: 0,
            expected: block.hash,
            actual,
        }
        .into());
    }

    Ok(actual)
}

/// Whether two block lists carry the same hashes pairwise.
#[must_use]
pub fn blocks_equal(a: &[Block], b: &[Block]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.hash == y.hash)
}
