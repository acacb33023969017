//! File records and their truncated projection

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunker::Block;
use crate::vector::VersionVector;

/// Flag bits and permission bits of a file record.
///
/// The low 12 bits hold POSIX permissions; the named constants above them
/// describe the record itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Flags(u32);

impl Flags {
    /// Mask of the permission bits
    pub const PERMISSIONS: u32 = 0o7777;
    /// The file was deleted; the record is a versioned tombstone
    pub const DELETED: u32 = 1 << 12;
    /// The device could not produce a usable copy
    pub const INVALID: u32 = 1 << 13;
    pub const DIRECTORY: u32 = 1 << 14;
    pub const SYMLINK: u32 = 1 << 15;
    /// The permission bits are meaningful
    pub const HAS_PERMISSIONS: u32 = 1 << 16;

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Set or clear `flag`
    #[must_use]
    pub const fn with(self, flag: u32, on: bool) -> Self {
        if on { Self(self.0 | flag) } else { Self(self.0 & !flag) }
    }

    #[must_use]
    pub const fn permissions(self) -> u32 {
        self.0 & Self::PERMISSIONS
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#o})", self.0)
    }
}

/// Full metadata for one file as held by one device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileRecord {
    /// Folder-relative name
    pub name: String,
    pub flags: Flags,
    /// Modification time, seconds since the UNIX epoch
    pub modified: i64,
    pub version: VersionVector,
    /// Blocks partitioning the content, in order
    pub blocks: Vec<Block>,
    /// Assigned by the index on insert; ignored on input
    pub sequence: u64,
}

impl FileRecord {
    /// Total content size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.size)).sum()
    }

    /// Drop the block list, keeping size and flags.
    #[must_use]
    pub fn truncate(&self) -> TruncatedFile {
        TruncatedFile {
            name: self.name.clone(),
            flags: self.flags,
            modified: self.modified,
            version: self.version.clone(),
            sequence: self.sequence,
            size: self.size(),
        }
    }

    /// Whether `other` carries the same content, sequence aside.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.flags == other.flags
            && self.modified == other.modified
            && self.version == other.version
            && self.blocks == other.blocks
    }
}

/// Size-and-flags projection of a [`FileRecord`], without blocks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TruncatedFile {
    pub name: String,
    pub flags: Flags,
    pub modified: i64,
    pub version: VersionVector,
    pub sequence: u64,
    pub size: u64,
}

/// Which shape a scan should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Records with their block lists
    #[default]
    Full,
    /// Records without block lists
    Truncated,
}

/// A record as yielded by scans, in one of the two shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileView {
    Full(FileRecord),
    Truncated(TruncatedFile),
}

impl FileView {
    /// Project `file` into the requested shape
    #[must_use]
    pub fn project(file: FileRecord, projection: Projection) -> Self {
        match projection {
            Projection::Full => Self::Full(file),
            Projection::Truncated => Self::Truncated(file.truncate()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Full(f) => &f.name,
            Self::Truncated(f) => &f.name,
        }
    }

    pub(crate) fn name_mut(&mut self) -> &mut String {
        match self {
            Self::Full(f) => &mut f.name,
            Self::Truncated(f) => &mut f.name,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Full(f) => f.size(),
            Self::Truncated(f) => f.size,
        }
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        match self {
            Self::Full(f) => f.flags,
            Self::Truncated(f) => f.flags,
        }
    }

    #[must_use]
    pub fn version(&self) -> &VersionVector {
        match self {
            Self::Full(f) => &f.version,
            Self::Truncated(f) => &f.version,
        }
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Full(f) => f.sequence,
            Self::Truncated(f) => f.sequence,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags().contains(Flags::DELETED)
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.flags().contains(Flags::INVALID)
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.flags().contains(Flags::DIRECTORY)
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.flags().contains(Flags::SYMLINK)
    }

    #[must_use]
    pub fn has_permission_bits(&self) -> bool {
        self.flags().contains(Flags::HAS_PERMISSIONS)
    }

    /// The record without blocks, whichever shape this view has
    #[must_use]
    pub fn into_truncated(self) -> TruncatedFile {
        match self {
            Self::Full(f) => f.truncate(),
            Self::Truncated(f) => f,
        }
    }

    /// The full record, if this view carries one
    #[must_use]
    pub fn into_full(self) -> Option<FileRecord> {
        match self {
            Self::Full(f) => Some(f),
            Self::Truncated(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::blocks_of;

    #[test]
    fn test_flags() {
        let flags = Flags::from_bits(0o644 | Flags::HAS_PERMISSIONS);
        assert_eq!(flags.permissions(), 0o644);
        assert!(flags.contains(Flags::HAS_PERMISSIONS));
        assert!(!flags.contains(Flags::DELETED));

        let deleted = flags.with(Flags::DELETED, true);
        assert!(deleted.contains(Flags::DELETED));
        assert!(!deleted.with(Flags::DELETED, false).contains(Flags::DELETED));
    }

    #[test]
    fn test_truncate_keeps_size() {
        let file = FileRecord {
            name: "a.txt".into(),
            blocks: blocks_of(b"hello world", 4).unwrap(),
            ..Default::default()
        };
        let truncated = file.truncate();
        assert_eq!(truncated.size, 11);
        assert_eq!(truncated.name, "a.txt");

        let view = FileView::project(file.clone(), Projection::Truncated);
        assert_eq!(view.size(), 11);
        assert!(view.into_full().is_none());
        assert_eq!(FileView::project(file.clone(), Projection::Full).into_full(), Some(file));
    }

    #[test]
    fn test_view_flags() {
        let file = FileRecord {
            name: "gone".into(),
            flags: Flags::from_bits(Flags::DELETED | Flags::DIRECTORY),
            ..Default::default()
        };
        let view = FileView::Full(file);
        assert!(view.is_deleted());
        assert!(view.is_directory());
        assert!(!view.is_invalid());
        assert!(!view.is_symlink());
        assert!(!view.has_permission_bits());
    }
}
