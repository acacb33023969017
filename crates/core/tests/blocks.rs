//! Property tests for chunking, diffing and verification

use fileset_core::chunker::blocks_of;
use fileset_core::delta::{diff, verify};
use fileset_core::{Block, EMPTY_BLOCK_HASH, Error, Mismatch};
use proptest::prelude::*;

fn data() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

fn block_size() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), Just(7), Just(64), 1usize..300]
}

/// Rebuild `target` from `have` blocks read out of `source` and `need` blocks
/// read out of `target` itself.
fn splice(source: &[u8], target: &[u8], target_blocks: &[Block], have: &[Block]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len());
    for block in target_blocks {
        let range = block.offset as usize..block.end() as usize;
        if have.contains(block) {
            out.extend_from_slice(&source[range]);
        } else {
            out.extend_from_slice(&target[range]);
        }
    }
    out
}

proptest! {
    #[test]
    fn offsets_are_contiguous(data in data(), bs in block_size()) {
        let blocks = blocks_of(&data, bs).unwrap();
        let mut offset = 0u64;
        for block in &blocks {
            prop_assert_eq!(block.offset, offset);
            prop_assert!(block.size as usize <= bs);
            offset += u64::from(block.size);
        }
        prop_assert_eq!(offset, data.len() as u64);
    }

    #[test]
    fn chunking_is_deterministic(data in data(), bs in block_size()) {
        prop_assert_eq!(blocks_of(&data, bs).unwrap(), blocks_of(&data, bs).unwrap());
    }

    #[test]
    fn diff_with_self_needs_nothing(data in data(), bs in block_size()) {
        let blocks = blocks_of(&data, bs).unwrap();
        let (have, need) = diff(&blocks, &blocks);
        prop_assert_eq!(have, blocks);
        prop_assert!(need.is_empty());
    }

    #[test]
    fn splicing_need_onto_have_rebuilds_target(
        source in data(),
        target in data(),
        bs in block_size(),
    ) {
        let source_blocks = blocks_of(&source, bs).unwrap();
        let target_blocks = blocks_of(&target, bs).unwrap();
        let (have, need) = diff(&source_blocks, &target_blocks);

        prop_assert_eq!(have.len() + need.len(), target_blocks.len());
        prop_assert_eq!(splice(&source, &target, &target_blocks, &have), target);
    }

    #[test]
    fn verify_accepts_exact_content(data in data(), bs in block_size()) {
        let blocks = blocks_of(&data, bs).unwrap();
        prop_assert!(verify(data.as_slice(), bs, &blocks).is_ok());
    }

    #[test]
    fn verify_reports_truncation(data in prop::collection::vec(any::<u8>(), 1..2048), bs in block_size(), cut in any::<prop::sample::Index>()) {
        let blocks = blocks_of(&data, bs).unwrap();
        let len = cut.index(data.len());
        let index = len / bs;

        match verify(&data[..len], bs, &blocks) {
            Err(Error::IntegrityMismatch(Mismatch::EndsEarly { index: i, expected, actual })) => {
                prop_assert_eq!(i, index);
                prop_assert_eq!(expected, u64::from(blocks[index].size));
                prop_assert_eq!(actual, (len - index * bs) as u64);
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }

    #[test]
    fn verify_reports_extension(data in data(), extra in prop::collection::vec(any::<u8>(), 1..64), bs in block_size()) {
        let blocks = blocks_of(&data, bs).unwrap();
        let mut longer = data.clone();
        longer.extend_from_slice(&extra);

        match verify(longer.as_slice(), bs, &blocks) {
            Err(Error::IntegrityMismatch(Mismatch::ContinuesPastEnd { declared })) => {
                prop_assert_eq!(declared, data.len() as u64);
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }
}

#[test]
fn empty_input_is_one_sentinel_block() {
    let blocks = blocks_of(b"", 128 << 10).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size, 0);
    assert_eq!(blocks[0].hash, EMPTY_BLOCK_HASH);
}

#[test]
fn verify_reports_flipped_byte() {
    let data = b"aaaabbbbcccc".to_vec();
    let blocks = blocks_of(&data, 4).unwrap();
    let mut corrupt = data;
    corrupt[5] ^= 0xff;

    let err = verify(corrupt.as_slice(), 4, &blocks).unwrap_err();
    assert!(
        matches!(err, Error::IntegrityMismatch(Mismatch::HashMismatch { index: 1, .. })),
        "{err}"
    );
}
