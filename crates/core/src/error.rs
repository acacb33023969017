//! Error taxonomy for the index, chunker and verifier

use crate::hash::BlockHash;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by [`FileSet`](crate::FileSet) and the index implementations.
///
/// Nothing in this crate retries; the caller decides whether a failed batch is
/// still worth resending.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be opened or read.
    #[error("storage unavailable: {context}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: Option<heed::Error>,
    },

    /// A `replace`/`update` batch failed to commit. No part of it was applied.
    #[error("transaction failed for folder {folder:?}")]
    TransactionFailure {
        folder: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Content does not match its block list.
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(#[from] Mismatch),

    /// A record required by the operation does not exist.
    #[error("no record for {name:?} in folder {folder:?}")]
    NotFound { folder: String, name: String },

    /// A stored or submitted record could not be decoded or is invalid.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A version counter reached `u64::MAX`, so no later version can follow it.
    #[error("version counter exhausted")]
    ClockExhausted,

    /// Reading the stream being chunked or verified failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unavailable(context: impl Into<String>, source: heed::Error) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
            source: Some(source),
        }
    }

    pub(crate) fn transaction(
        folder: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::TransactionFailure {
            folder: folder.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRecord(reason.into())
    }
}

/// The specific way content disagreed with its block list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
    /// Block `index` hashed to `actual` instead of `expected`.
    #[error("hash mismatch {actual} != {expected} for block {index}")]
    HashMismatch {
        index: usize,
        expected: BlockHash,
        actual: BlockHash,
    },

    /// The stream ran out inside block `index`.
    #[error("stream ends early in block {index}: got {actual} of {expected} bytes")]
    EndsEarly {
        index: usize,
        expected: u64,
        actual: u64,
    },

    /// Bytes remain after the `declared` length implied by the block list.
    #[error("stream continues past declared end at {declared} bytes")]
    ContinuesPastEnd { declared: u64 },
}
