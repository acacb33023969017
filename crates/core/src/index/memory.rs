//! In-memory file index
//!
//! Each folder is an immutable table behind an `Arc`. Writers clone the
//! table, apply their batch, and swap the new table in, so a batch is visible
//! all at once or not at all. Readers grab the current `Arc` and scan without
//! holding the lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{DeviceCopy, FileIndex, Visitor, available, check_batch, needs, select_global};
use crate::device::DeviceId;
use crate::error::Result;
use crate::file::{FileRecord, FileView, Projection};

/// Every device's copy of one name
type Holders = BTreeMap<DeviceId, FileRecord>;

#[derive(Debug, Clone, Default)]
struct FolderTable {
    names: BTreeMap<String, Holders>,
    /// Last sequence handed out in this folder
    sequence: u64,
}

impl FolderTable {
    /// Returns the highest sequence assigned, or for a replace the device's
    /// highest sequence afterwards.
    fn apply(&mut self, device: &DeviceId, files: &[FileRecord], replace: bool) -> u64 {
        let mut highest = 0;
        for file in files {
            let holders = self.names.entry(file.name.clone()).or_default();
            if holders.get(device).is_some_and(|existing| existing.same_content(file)) {
                trace!(name = %file.name, "unchanged");
                continue;
            }
            self.sequence += 1;
            trace!(name = %file.name, sequence = self.sequence, "storing");
            holders.insert(
                *device,
                FileRecord {
                    sequence: self.sequence,
                    ..file.clone()
                },
            );
            highest = self.sequence;
        }

        if replace {
            let keep: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
            self.names.retain(|name, holders| {
                if !keep.contains(name.as_str()) {
                    holders.remove(device);
                }
                !holders.is_empty()
            });
            return self.max_sequence(device);
        }
        highest
    }

    fn max_sequence(&self, device: &DeviceId) -> u64 {
        self.names
            .values()
            .filter_map(|holders| holders.get(device))
            .map(|file| file.sequence)
            .max()
            .unwrap_or(0)
    }

    /// Names starting with `prefix`, in order
    fn prefixed<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a String, &'a Holders)> {
        self.names
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(prefix))
    }
}

fn copies_of(holders: &Holders) -> Vec<DeviceCopy> {
    holders
        .iter()
        .map(|(device, file)| DeviceCopy {
            device: *device,
            file: file.truncate(),
        })
        .collect()
}

/// In-memory [`FileIndex`], the reference for the durable implementations.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    folders: RwLock<BTreeMap<String, Arc<FolderTable>>>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, folder: &str) -> Option<Arc<FolderTable>> {
        self.folders.read().get(folder).cloned()
    }

    fn write(
        &self,
        folder: &str,
        device: &DeviceId,
        files: &[FileRecord],
        replace: bool,
    ) -> Result<u64> {
        check_batch(folder, files)?;

        let mut folders = self.folders.write();
        let mut table = folders
            .get(folder)
            .map(|t| (**t).clone())
            .unwrap_or_default();
        let highest = table.apply(device, files, replace);
        folders.insert(folder.to_string(), Arc::new(table));
        Ok(highest)
    }
}

impl FileIndex for MemoryIndex {
    fn update(&self, folder: &str, device: &DeviceId, files: &[FileRecord]) -> Result<u64> {
        self.write(folder, device, files, false)
    }

    fn replace(&self, folder: &str, device: &DeviceId, files: &[FileRecord]) -> Result<u64> {
        self.write(folder, device, files, true)
    }

    fn have(
        &self,
        folder: &str,
        device: &DeviceId,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let Some(table) = self.snapshot(folder) else {
            return Ok(());
        };
        for holders in table.names.values() {
            if let Some(file) = holders.get(device) {
                if visit(FileView::project(file.clone(), projection)).is_break() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn global(
        &self,
        folder: &str,
        prefix: &str,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let Some(table) = self.snapshot(folder) else {
            return Ok(());
        };
        for (_, holders) in table.prefixed(prefix) {
            let copies = copies_of(holders);
            let Some(winner) = select_global(&copies) else {
                continue;
            };
            let file = holders[&winner.device].clone();
            if visit(FileView::project(file, projection)).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn need(
        &self,
        folder: &str,
        device: &DeviceId,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let Some(table) = self.snapshot(folder) else {
            return Ok(());
        };
        for holders in table.names.values() {
            let copies = copies_of(holders);
            let Some(winner) = needs(device, &copies) else {
                continue;
            };
            let file = holders[&winner.device].clone();
            if visit(FileView::project(file, projection)).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn get(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .snapshot(folder)
            .and_then(|table| table.names.get(name)?.get(device).cloned()))
    }

    fn get_global(
        &self,
        folder: &str,
        name: &str,
        projection: Projection,
    ) -> Result<Option<FileView>> {
        let Some(table) = self.snapshot(folder) else {
            return Ok(None);
        };
        let Some(holders) = table.names.get(name) else {
            return Ok(None);
        };
        let copies = copies_of(holders);
        Ok(select_global(&copies)
            .map(|winner| FileView::project(holders[&winner.device].clone(), projection)))
    }

    fn availability(&self, folder: &str, name: &str) -> Result<Vec<DeviceId>> {
        Ok(self
            .snapshot(folder)
            .and_then(|table| table.names.get(name).map(|h| available(&copies_of(h))))
            .unwrap_or_default())
    }

    fn max_sequence(&self, folder: &str, device: &DeviceId) -> Result<u64> {
        Ok(self
            .snapshot(folder)
            .map_or(0, |table| table.max_sequence(device)))
    }

    fn versions(&self, folder: &str, visit: &mut dyn FnMut(DeviceCopy)) -> Result<()> {
        if let Some(table) = self.snapshot(folder) {
            for holders in table.names.values() {
                for copy in copies_of(holders) {
                    visit(copy);
                }
            }
        }
        Ok(())
    }

    fn folders(&self) -> Result<Vec<String>> {
        Ok(self
            .folders
            .read()
            .iter()
            .filter(|(_, table)| !table.names.is_empty())
            .map(|(folder, _)| folder.clone())
            .collect())
    }

    fn drop_folder(&self, folder: &str) -> Result<()> {
        self.folders.write().remove(folder);
        Ok(())
    }
}
