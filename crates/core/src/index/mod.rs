//! The file index: durable per-device file lists and the queries over them
//!
//! [`FileIndex`] is the contract [`FileSet`](crate::FileSet) needs from a
//! storage engine. Two implementations ship with the crate:
//!
//! - [`MemoryIndex`]: in-memory reference implementation
//! - [`LmdbIndex`]: durable implementation on LMDB
//!
//! Both pick global winners and need sets through the helpers in this module
//! ([`select_global`], [`needs`], [`available`]) so they answer identically.

use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::file::{FileRecord, FileView, Flags, Projection, TruncatedFile};
use crate::vector::VersionVector;

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbIndex;
pub use memory::MemoryIndex;

/// Longest folder id an index accepts, in bytes
pub const MAX_FOLDER_LEN: usize = 128;

/// Callback invoked once per record in a scan. `Break` ends the scan.
pub type Visitor<'a> = dyn FnMut(FileView) -> ControlFlow<()> + 'a;

/// One device's stored copy of a name, without blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCopy {
    pub device: DeviceId,
    pub file: TruncatedFile,
}

impl DeviceCopy {
    fn version(&self) -> &VersionVector {
        &self.file.version
    }

    fn has(&self, flag: u32) -> bool {
        self.file.flags.contains(flag)
    }
}

/// Storage contract for per-folder, per-device file lists.
///
/// Names passed in and handed out are in wire form. Each `update` and
/// `replace` is one atomic transaction: on error, nothing was applied.
/// Scans are ordered by name and visit records from a single consistent
/// state. Visitors must not call back into the index.
pub trait FileIndex: Send + Sync {
    /// Insert or replace `files` by name for `device`, leaving other names
    /// alone. Returns the highest sequence assigned, 0 if nothing changed.
    ///
    /// # Errors
    /// [`Error::MalformedRecord`] for an invalid batch,
    /// [`Error::TransactionFailure`] if the batch could not commit.
    fn update(&self, folder: &str, device: &DeviceId, files: &[FileRecord]) -> Result<u64>;

    /// Make `files` the complete list for `device`, deleting every stored name
    /// not present. Returns the highest sequence among `device`'s records once
    /// the batch is applied, 0 if it has none left.
    ///
    /// # Errors
    /// As for [`FileIndex::update`].
    fn replace(&self, folder: &str, device: &DeviceId, files: &[FileRecord]) -> Result<u64>;

    /// Visit `device`'s records.
    ///
    /// # Errors
    /// Fails if the store cannot be read or holds an undecodable record.
    fn have(
        &self,
        folder: &str,
        device: &DeviceId,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()>;

    /// Visit the global winner of every name starting with `prefix`.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn global(
        &self,
        folder: &str,
        prefix: &str,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()>;

    /// Visit the global winner of every name `device` needs.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn need(
        &self,
        folder: &str,
        device: &DeviceId,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()>;

    /// Look up `device`'s record for `name`.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn get(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<FileRecord>>;

    /// Look up the global winner for `name`.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn get_global(
        &self,
        folder: &str,
        name: &str,
        projection: Projection,
    ) -> Result<Option<FileView>>;

    /// Devices holding the global version of `name`, excluding deleted or
    /// invalid copies.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn availability(&self, folder: &str, name: &str) -> Result<Vec<DeviceId>>;

    /// Highest sequence among `device`'s records, 0 if it has none.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn max_sequence(&self, folder: &str, device: &DeviceId) -> Result<u64>;

    /// Visit every stored copy in the folder, in no particular order.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn versions(&self, folder: &str, visit: &mut dyn FnMut(DeviceCopy)) -> Result<()>;

    /// Folders holding at least one record.
    ///
    /// # Errors
    /// As for [`FileIndex::have`].
    fn folders(&self) -> Result<Vec<String>>;

    /// Remove every record of `folder`.
    ///
    /// # Errors
    /// [`Error::TransactionFailure`] if the removal could not commit.
    fn drop_folder(&self, folder: &str) -> Result<()>;
}

/// Pick the global winner among the copies of one name.
///
/// Invalid copies never win. Among the rest, only copies not strictly
/// dominated by another are candidates; conflicting candidates are ordered by
/// [`VersionVector::total_cmp`], and equal versions go to the lowest device.
#[must_use]
pub fn select_global(copies: &[DeviceCopy]) -> Option<&DeviceCopy> {
    let valid: Vec<&DeviceCopy> = copies.iter().filter(|c| !c.has(Flags::INVALID)).collect();

    let mut best: Option<&DeviceCopy> = None;
    for &candidate in &valid {
        if valid.iter().any(|other| other.version().dominates(candidate.version())) {
            continue;
        }
        best = match best {
            None => Some(candidate),
            Some(current) => match candidate.version().total_cmp(current.version()) {
                std::cmp::Ordering::Greater => Some(candidate),
                std::cmp::Ordering::Equal if candidate.device < current.device => Some(candidate),
                _ => Some(current),
            },
        };
    }
    best
}

/// The copy `device` should fetch for this name, if any.
///
/// Needed when the device has no copy, or the global winner strictly
/// dominates the device's own copy. Names with no valid copy are never needed.
#[must_use]
pub fn needs<'a>(device: &DeviceId, copies: &'a [DeviceCopy]) -> Option<&'a DeviceCopy> {
    let winner = select_global(copies)?;
    match copies.iter().find(|c| c.device == *device) {
        None => Some(winner),
        Some(own) if winner.version().dominates(own.version()) => Some(winner),
        Some(_) => None,
    }
}

/// Devices holding the global winner's version with usable content.
#[must_use]
pub fn available(copies: &[DeviceCopy]) -> Vec<DeviceId> {
    let Some(winner) = select_global(copies) else {
        return Vec::new();
    };
    copies
        .iter()
        .filter(|c| c.version() == winner.version())
        .filter(|c| !c.has(Flags::DELETED) && !c.has(Flags::INVALID))
        .map(|c| c.device)
        .collect()
}

/// Reject batches the index cannot store faithfully.
pub(crate) fn check_batch(folder: &str, files: &[FileRecord]) -> Result<()> {
    if folder.len() > MAX_FOLDER_LEN {
        return Err(Error::malformed(format!(
            "folder id of {} bytes exceeds {MAX_FOLDER_LEN}",
            folder.len()
        )));
    }
    let mut seen = HashSet::with_capacity(files.len());
    for file in files {
        if file.name.is_empty() {
            return Err(Error::malformed("empty file name"));
        }
        if file.name.contains('\0') {
            return Err(Error::malformed(format!("file name {:?} contains NUL", file.name)));
        }
        if !seen.insert(file.name.as_str()) {
            return Err(Error::malformed(format!("duplicate file name {:?} in batch", file.name)));
        }
        if file.version.is_exhausted() {
            return Err(Error::malformed(format!("exhausted version counter on {:?}", file.name)));
        }
    }
    Ok(())
}
