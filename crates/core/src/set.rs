//! Per-folder file set over a [`FileIndex`]
//!
//! A [`FileSet`] is the one place names cross between native and wire form,
//! keeps each device's LocalSequence cached, and keeps the Lamport clock ahead
//! of every version it has seen.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::chunker::Block;
use crate::delta;
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::file::{FileRecord, FileView, Flags, Projection, TruncatedFile};
use crate::index::{DeviceCopy, FileIndex};
use crate::names;
use crate::vector::LamportClock;

/// Convert a batch to wire-form names before it reaches the index.
fn to_wire(mut files: Vec<FileRecord>) -> Vec<FileRecord> {
    for file in &mut files {
        file.name = names::to_wire(&file.name);
    }
    files
}

/// Rewrite a wire-form name into native form as it leaves the set.
fn to_native(name: &mut String) {
    *name = names::to_native(name);
}

/// Wrap `visit` so every view leaves with a native-form name.
fn native_visitor<F>(visit: &mut F) -> impl FnMut(FileView) -> ControlFlow<()> + '_
where
    F: FnMut(FileView) -> ControlFlow<()>,
{
    move |mut view| {
        to_native(view.name_mut());
        visit(view)
    }
}

/// File metadata of one folder across all devices.
pub struct FileSet {
    folder: String,
    index: Arc<dyn FileIndex>,
    clock: Arc<LamportClock>,
    /// LocalSequence per device. Writers hold the write lock for the whole
    /// batch so the cache moves in commit order.
    local_sequence: RwLock<HashMap<DeviceId, u64>>,
}

impl FileSet {
    /// Open the set for `folder`, loading every device's LocalSequence and
    /// advancing `clock` past every stored version.
    ///
    /// # Errors
    /// Fails if the index cannot be read.
    pub fn new(
        folder: impl Into<String>,
        index: Arc<dyn FileIndex>,
        clock: Arc<LamportClock>,
    ) -> Result<Self> {
        let folder = folder.into();
        let mut sequences: HashMap<DeviceId, u64> = HashMap::new();
        index.versions(&folder, &mut |copy: DeviceCopy| {
            clock.observe(&copy.file.version);
            let sequence = sequences.entry(copy.device).or_default();
            *sequence = (*sequence).max(copy.file.sequence);
        })?;

        debug!(folder = %folder, devices = sequences.len(), clock = clock.value(), "opened file set");
        Ok(Self {
            folder,
            index,
            clock,
            local_sequence: RwLock::new(sequences),
        })
    }

    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// The clock new local versions should be ticked from
    #[must_use]
    pub fn clock(&self) -> &Arc<LamportClock> {
        &self.clock
    }

    /// Make `files` the complete list of what `device` has.
    ///
    /// Records identical to the stored ones keep their sequence; names not in
    /// `files` are removed. An empty batch resets the device's LocalSequence to 0.
    ///
    /// # Errors
    /// [`Error::MalformedRecord`] for an invalid batch,
    /// [`Error::TransactionFailure`] if it could not commit. Nothing is applied
    /// on error.
    pub fn replace(&self, device: &DeviceId, files: Vec<FileRecord>) -> Result<()> {
        debug!(folder = %self.folder, %device, files = files.len(), "replace");
        let files = to_wire(files);

        let mut sequences = self.local_sequence.write();
        let sequence = self.index.replace(&self.folder, device, &files)?;
        sequences.insert(*device, sequence);
        self.observe(&files);
        Ok(())
    }

    /// Like [`FileSet::replace`], but names `device` has and `files` lacks are
    /// kept as deleted records instead of being removed.
    ///
    /// Each newly deleted record loses its blocks and gets a version edited by
    /// `device`, so the deletion dominates the copy it replaces.
    /// Records already deleted are left as they are. LocalSequence only rises.
    ///
    /// # Errors
    /// As for [`FileSet::replace`], plus [`Error::ClockExhausted`].
    pub fn replace_with_delete(&self, device: &DeviceId, files: Vec<FileRecord>) -> Result<()> {
        debug!(folder = %self.folder, %device, files = files.len(), "replace_with_delete");
        let mut files = to_wire(files);

        let mut sequences = self.local_sequence.write();
        let present: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        let mut vanished = Vec::new();
        self.index
            .have(&self.folder, device, Projection::Truncated, &mut |view: FileView| {
                if !view.is_deleted() && !present.contains(view.name()) {
                    vanished.push(view.into_truncated());
                }
                ControlFlow::Continue(())
            })?;

        for file in vanished {
            let mut version = file.version;
            version.update(*device, &self.clock)?;
            trace!(name = %file.name, "marking deleted");
            files.push(FileRecord {
                name: file.name,
                flags: file.flags.with(Flags::DELETED, true),
                modified: file.modified,
                version,
                blocks: Vec::new(),
                sequence: 0,
            });
        }

        let highest = self.index.update(&self.folder, device, &files)?;
        let sequence = sequences.entry(*device).or_default();
        *sequence = (*sequence).max(highest);
        self.observe(&files);
        Ok(())
    }

    /// Insert or replace `files` by name, leaving other names of `device` alone.
    ///
    /// # Errors
    /// As for [`FileSet::replace`].
    pub fn update(&self, device: &DeviceId, files: Vec<FileRecord>) -> Result<()> {
        debug!(folder = %self.folder, %device, files = files.len(), "update");
        let files = to_wire(files);

        let mut sequences = self.local_sequence.write();
        let highest = self.index.update(&self.folder, device, &files)?;
        let sequence = sequences.entry(*device).or_default();
        *sequence = (*sequence).max(highest);
        self.observe(&files);
        Ok(())
    }

    /// Keep the clock ahead of a committed batch.
    fn observe(&self, files: &[FileRecord]) {
        for file in files {
            self.clock.observe(&file.version);
        }
    }

    /// Visit `device`'s records in name order until `visit` breaks.
    ///
    /// `visit` must not call back into this set.
    ///
    /// # Errors
    /// Fails if the index cannot be read or holds an undecodable record.
    pub fn with_have(
        &self,
        device: &DeviceId,
        projection: Projection,
        mut visit: impl FnMut(FileView) -> ControlFlow<()>,
    ) -> Result<()> {
        debug!(folder = %self.folder, %device, ?projection, "with_have");
        let _sequences = self.local_sequence.read_recursive();
        self.index
            .have(&self.folder, device, projection, &mut native_visitor(&mut visit))
    }

    /// Visit the global winner of every name, in name order.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn with_global(
        &self,
        projection: Projection,
        visit: impl FnMut(FileView) -> ControlFlow<()>,
    ) -> Result<()> {
        self.with_global_prefixed("", projection, visit)
    }

    /// Visit the global winner of every name starting with `prefix`.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn with_global_prefixed(
        &self,
        prefix: &str,
        projection: Projection,
        mut visit: impl FnMut(FileView) -> ControlFlow<()>,
    ) -> Result<()> {
        debug!(folder = %self.folder, prefix, ?projection, "with_global");
        let prefix = names::to_wire(prefix);
        let _sequences = self.local_sequence.read_recursive();
        self.index
            .global(&self.folder, &prefix, projection, &mut native_visitor(&mut visit))
    }

    /// Visit the global winner of every name `device` needs, in name order.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn with_need(
        &self,
        device: &DeviceId,
        projection: Projection,
        mut visit: impl FnMut(FileView) -> ControlFlow<()>,
    ) -> Result<()> {
        debug!(folder = %self.folder, %device, ?projection, "with_need");
        let _sequences = self.local_sequence.read_recursive();
        self.index
            .need(&self.folder, device, projection, &mut native_visitor(&mut visit))
    }

    /// `device`'s record for `name`.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn get(&self, device: &DeviceId, name: &str) -> Result<Option<FileRecord>> {
        debug!(folder = %self.folder, %device, name, "get");
        let _sequences = self.local_sequence.read_recursive();
        let file = self.index.get(&self.folder, device, &names::to_wire(name))?;
        Ok(file.map(|mut file| {
            to_native(&mut file.name);
            file
        }))
    }

    /// The global winner for `name`, with blocks.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn get_global(&self, name: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .global_view(name, Projection::Full)?
            .and_then(FileView::into_full))
    }

    /// The global winner for `name`, without blocks.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn get_global_truncated(&self, name: &str) -> Result<Option<TruncatedFile>> {
        Ok(self
            .global_view(name, Projection::Truncated)?
            .map(FileView::into_truncated))
    }

    fn global_view(&self, name: &str, projection: Projection) -> Result<Option<FileView>> {
        debug!(folder = %self.folder, name, ?projection, "get_global");
        let _sequences = self.local_sequence.read_recursive();
        let view = self
            .index
            .get_global(&self.folder, &names::to_wire(name), projection)?;
        Ok(view.map(|mut view| {
            to_native(view.name_mut());
            view
        }))
    }

    /// Devices holding the global version of `name` with usable content.
    ///
    /// # Errors
    /// As for [`FileSet::with_have`].
    pub fn availability(&self, name: &str) -> Result<Vec<DeviceId>> {
        debug!(folder = %self.folder, name, "availability");
        let _sequences = self.local_sequence.read_recursive();
        self.index.availability(&self.folder, &names::to_wire(name))
    }

    /// Highest sequence assigned to `device`'s records, 0 after an empty
    /// `replace` or if the device is unknown.
    #[must_use]
    pub fn local_version(&self, device: &DeviceId) -> u64 {
        self.local_sequence
            .read_recursive()
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    /// Blocks of the global version of `name` that `device` already has, and
    /// those it must fetch.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `name` has no global record, or a read error.
    pub fn needed_blocks(&self, device: &DeviceId, name: &str) -> Result<(Vec<Block>, Vec<Block>)> {
        debug!(folder = %self.folder, %device, name, "needed_blocks");
        let wire = names::to_wire(name);
        let _sequences = self.local_sequence.read_recursive();

        let global = self
            .index
            .get_global(&self.folder, &wire, Projection::Full)?
            .and_then(FileView::into_full)
            .ok_or_else(|| Error::NotFound {
                folder: self.folder.clone(),
                name: name.to_string(),
            })?;
        let own = self
            .index
            .get(&self.folder, device, &wire)?
            .map(|file| file.blocks)
            .unwrap_or_default();

        Ok(delta::diff(&own, &global.blocks))
    }

    /// Folders holding at least one record in `index`.
    ///
    /// # Errors
    /// Fails if the index cannot be read.
    pub fn list_folders(index: &dyn FileIndex) -> Result<Vec<String>> {
        index.folders()
    }

    /// Remove every record of `folder` from `index`.
    ///
    /// Any open [`FileSet`] for the folder keeps stale LocalSequence values.
    ///
    /// # Errors
    /// [`Error::TransactionFailure`] if the removal could not commit.
    pub fn drop_folder(index: &dyn FileIndex, folder: &str) -> Result<()> {
        debug!(folder, "drop_folder");
        index.drop_folder(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::blocks_of;
    use crate::index::MemoryIndex;
    use crate::vector::VersionVector;

    fn set() -> FileSet {
        FileSet::new("default", Arc::new(MemoryIndex::new()), Arc::new(LamportClock::new())).unwrap()
    }

    fn local_file(set: &FileSet, name: &str, data: &[u8]) -> FileRecord {
        let mut version = VersionVector::new();
        version.update(DeviceId::LOCAL, set.clock()).unwrap();
        FileRecord {
            name: name.into(),
            version,
            blocks: blocks_of(data, 4).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_local_version_tracks_updates() {
        let set = set();
        assert_eq!(set.local_version(&DeviceId::LOCAL), 0);

        let a = local_file(&set, "a", b"aaaa");
        let b = local_file(&set, "b", b"bbbb");
        set.update(&DeviceId::LOCAL, vec![a.clone(), b]).unwrap();
        assert_eq!(set.local_version(&DeviceId::LOCAL), 2);

        // resending identical content assigns nothing new
        set.update(&DeviceId::LOCAL, vec![a]).unwrap();
        assert_eq!(set.local_version(&DeviceId::LOCAL), 2);

        set.replace(&DeviceId::LOCAL, Vec::new()).unwrap();
        assert_eq!(set.local_version(&DeviceId::LOCAL), 0);
    }

    #[test]
    fn test_construction_restores_state() {
        let index: Arc<dyn FileIndex> = Arc::new(MemoryIndex::new());
        let remote = DeviceId::from_raw([1; 32]);
        let file = FileRecord {
            name: "x".into(),
            version: VersionVector::from_counters([(remote, 40)]),
            ..Default::default()
        };
        index.update("default", &remote, &[file]).unwrap();

        let clock = Arc::new(LamportClock::new());
        let set = FileSet::new("default", index, Arc::clone(&clock)).unwrap();
        assert_eq!(set.local_version(&remote), 1);
        assert_eq!(clock.value(), 40);
    }

    #[test]
    fn test_needed_blocks() {
        let set = set();
        let remote = DeviceId::from_raw([1; 32]);

        let old = local_file(&set, "f", b"aaaabbbbcccc");
        set.update(&DeviceId::LOCAL, vec![old.clone()]).unwrap();

        let mut new = old;
        new.blocks = blocks_of(b"aaaaXXXXcccc", 4).unwrap();
        new.version.update(remote, set.clock()).unwrap();
        set.update(&remote, vec![new.clone()]).unwrap();

        let (have, need) = set.needed_blocks(&DeviceId::LOCAL, "f").unwrap();
        assert_eq!(have, [new.blocks[0], new.blocks[2]]);
        assert_eq!(need, [new.blocks[1]]);

        let err = set.needed_blocks(&DeviceId::LOCAL, "missing").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }), "{err}");
    }
}
