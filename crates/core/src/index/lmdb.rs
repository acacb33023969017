//! Durable file index using heed (LMDB) + rkyv
//!
//! One named database per concern:
//!
//! - `files`: folder ‖ device ‖ name key → record metadata, including the name
//! - `blocks`: folder ‖ device ‖ name key → block list
//! - `names`: folder ‖ name key ‖ device → empty, for scans by name
//! - `meta`: folder → last sequence handed out (u64 BE)
//!
//! The folder part is its byte length (u64 BE) followed by its bytes, so no
//! folder's keys are a prefix of another folder's.
//!
//! LMDB caps keys at 511 bytes, so a name key never holds more than
//! [`NAME_KEY_BUDGET`] name bytes. A name that fits is stored as its bytes
//! plus `0x00`; a longer one as its first [`NAME_KEY_BUDGET`] bytes, `0x01`
//! and a hash of the whole name. Names never contain NUL, so keys sort in
//! name order except among long names sharing their first
//! [`NAME_KEY_BUDGET`] bytes. Those sort by hash and are put back in name
//! order while scanning.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::{DeviceCopy, FileIndex, Visitor, available, check_batch, needs, select_global};
use crate::chunker::Block;
use crate::config::IndexConfig;
use crate::device::{DEVICE_ID_LEN, DeviceId};
use crate::error::{Error, Result};
use crate::file::{FileRecord, FileView, Flags, Projection, TruncatedFile};
use crate::hash::{BlockHash, HASH_LEN};
use crate::vector::VersionVector;

/// Name bytes kept verbatim in a key
const NAME_KEY_BUDGET: usize = 256;

const SHORT_NAME: u8 = 0x00;
const LONG_NAME: u8 = 0x01;

/// Length of the name key of a name longer than [`NAME_KEY_BUDGET`]
const LONG_NAME_KEY_LEN: usize = NAME_KEY_BUDGET + 1 + HASH_LEN;

#[derive(Archive, Serialize, Deserialize, Debug)]
struct StoredMeta {
    name: String,
    flags: u32,
    modified: i64,
    /// Canonical [`VersionVector`] encoding
    version: Vec<u8>,
    sequence: u64,
    size: u64,
}

impl StoredMeta {
    fn new(file: &FileRecord, sequence: u64) -> Self {
        Self {
            name: file.name.clone(),
            flags: file.flags.bits(),
            modified: file.modified,
            version: file.version.to_bytes(),
            sequence,
            size: file.size(),
        }
    }
}

#[derive(Archive, Serialize, Deserialize, Debug)]
struct StoredBlocks {
    blocks: Vec<StoredBlock>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
struct StoredBlock {
    offset: u64,
    size: u32,
    hash: [u8; HASH_LEN],
}

impl From<&Block> for StoredBlock {
    fn from(block: &Block) -> Self {
        Self {
            offset: block.offset,
            size: block.size,
            hash: *block.hash.as_bytes(),
        }
    }
}

impl From<&ArchivedStoredBlock> for Block {
    fn from(archived: &ArchivedStoredBlock) -> Self {
        Self {
            offset: archived.offset.into(),
            size: archived.size.into(),
            hash: BlockHash::from_raw(archived.hash),
        }
    }
}

/// LMDB values carry no alignment guarantee, archived access needs one.
fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buf = AlignedVec::with_capacity(bytes.len());
    buf.extend_from_slice(bytes);
    buf
}

fn decode_meta(bytes: &[u8]) -> Result<TruncatedFile> {
    let buf = aligned(bytes);
    let archived = rkyv::access::<ArchivedStoredMeta, RkyvError>(&buf)
        .map_err(|e| Error::malformed(format!("record metadata: {e}")))?;
    let name = archived.name.as_str();
    Ok(TruncatedFile {
        name: name.to_string(),
        flags: Flags::from_bits(archived.flags.into()),
        modified: archived.modified.into(),
        version: VersionVector::from_bytes(archived.version.as_slice())
            .map_err(|e| Error::malformed(format!("version of {name:?}: {e}")))?,
        sequence: archived.sequence.into(),
        size: archived.size.into(),
    })
}

fn decode_blocks(name: &str, bytes: &[u8]) -> Result<Vec<Block>> {
    let buf = aligned(bytes);
    let archived = rkyv::access::<ArchivedStoredBlocks, RkyvError>(&buf)
        .map_err(|e| Error::malformed(format!("blocks of {name:?}: {e}")))?;
    Ok(archived.blocks.iter().map(Block::from).collect())
}

fn folder_key(folder: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + folder.len());
    key.extend_from_slice(&(folder.len() as u64).to_be_bytes());
    key.extend_from_slice(folder.as_bytes());
    key
}

fn parse_folder_key(key: &[u8]) -> Result<String> {
    let (len, folder) = key
        .split_first_chunk::<8>()
        .ok_or_else(|| Error::malformed("short folder key"))?;
    if u64::from_be_bytes(*len) != folder.len() as u64 {
        return Err(Error::malformed("folder key length mismatch"));
    }
    String::from_utf8(folder.to_vec()).map_err(|e| Error::malformed(format!("folder key: {e}")))
}

/// Bounded-length key part standing for `name`.
fn name_part(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    if bytes.len() <= NAME_KEY_BUDGET {
        let mut part = Vec::with_capacity(bytes.len() + 1);
        part.extend_from_slice(bytes);
        part.push(SHORT_NAME);
        return part;
    }
    let mut part = Vec::with_capacity(LONG_NAME_KEY_LEN);
    part.extend_from_slice(&bytes[..NAME_KEY_BUDGET]);
    part.push(LONG_NAME);
    part.extend_from_slice(BlockHash::of(bytes).as_bytes());
    part
}

/// The shared leading bytes of a long name's key part, `None` for short names.
fn long_name_stem(part: &[u8]) -> Option<&[u8]> {
    (part.len() == LONG_NAME_KEY_LEN && part[NAME_KEY_BUDGET] == LONG_NAME)
        .then(|| &part[..NAME_KEY_BUDGET])
}

fn device_key(folder: &str, device: &DeviceId) -> Vec<u8> {
    let mut key = folder_key(folder);
    key.extend_from_slice(device.as_bytes());
    key
}

fn file_key(folder: &str, device: &DeviceId, part: &[u8]) -> Vec<u8> {
    let mut key = device_key(folder, device);
    key.extend_from_slice(part);
    key
}

fn name_key(folder: &str, part: &[u8], device: &DeviceId) -> Vec<u8> {
    let mut key = folder_key(folder);
    key.extend_from_slice(part);
    key.extend_from_slice(device.as_bytes());
    key
}

/// Split the part of a `names` key after the folder into name part and device.
fn split_name_key(rest: &[u8]) -> Result<(&[u8], DeviceId)> {
    let split = rest
        .len()
        .checked_sub(DEVICE_ID_LEN)
        .ok_or_else(|| Error::malformed("short name key"))?;
    let (part, device) = rest.split_at(split);
    let device = DeviceId::from_slice(device).ok_or_else(|| Error::malformed("short name key"))?;
    Ok((part, device))
}

/// Split the part of a `files` key after the folder into device and name part.
fn split_file_key(rest: &[u8]) -> Result<(DeviceId, &[u8])> {
    if rest.len() < DEVICE_ID_LEN {
        return Err(Error::malformed("short file key"));
    }
    let (device, part) = rest.split_at(DEVICE_ID_LEN);
    let device = DeviceId::from_slice(device).ok_or_else(|| Error::malformed("short file key"))?;
    Ok((device, part))
}

fn read_failed(source: heed::Error) -> Error {
    Error::unavailable("index read failed", source)
}

/// Passes copies on in name order, holding back runs of long names whose
/// keys share a stem until the run ends.
#[derive(Default)]
struct NameOrder {
    stem: Vec<u8>,
    held: Vec<DeviceCopy>,
}

impl NameOrder {
    /// Feed the next copy in key order.
    fn push(
        &mut self,
        part: &[u8],
        copy: DeviceCopy,
        emit: &mut impl FnMut(DeviceCopy) -> Result<ControlFlow<()>>,
    ) -> Result<ControlFlow<()>> {
        let stem = long_name_stem(part);
        if stem.is_some_and(|stem| !self.held.is_empty() && stem == self.stem.as_slice()) {
            self.held.push(copy);
            return Ok(ControlFlow::Continue(()));
        }
        if self.flush(emit)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        match stem {
            Some(stem) => {
                self.stem = stem.to_vec();
                self.held.push(copy);
                Ok(ControlFlow::Continue(()))
            }
            None => emit(copy),
        }
    }

    /// Release the held run, sorted by name. Copies of one name keep their
    /// device order.
    fn flush(
        &mut self,
        emit: &mut impl FnMut(DeviceCopy) -> Result<ControlFlow<()>>,
    ) -> Result<ControlFlow<()>> {
        let mut held = std::mem::take(&mut self.held);
        held.sort_by(|a, b| a.file.name.cmp(&b.file.name));
        for copy in held {
            if emit(copy)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// [`FileIndex`] persisted in an LMDB environment.
///
/// Every `update`/`replace` is a single write transaction; every scan runs
/// inside a single read transaction, so it sees one committed state.
pub struct LmdbIndex {
    env: Env,
    files: Database<Bytes, Bytes>,
    blocks: Database<Bytes, Bytes>,
    names: Database<Bytes, Bytes>,
    meta: Database<Bytes, Bytes>,
}

impl LmdbIndex {
    /// Open or create an index in the directory `path`.
    ///
    /// # Errors
    /// Returns [`Error::StorageUnavailable`] if the environment cannot be
    /// opened or its databases created.
    #[allow(unsafe_code)]
    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        let context = || format!("opening index at {}", path.display());
        std::fs::create_dir_all(path).map_err(|e| Error::unavailable(context(), heed::Error::Io(e)))?;

        // SAFETY: heed needs unsafe for the memory map. The only requirement
        // is that the database file is not modified externally while the Env
        // is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_readers(config.max_readers)
                .max_dbs(4)
                .open(path)
        }
        .map_err(|e| Error::unavailable(context(), e))?;

        let mut wtxn = env.write_txn().map_err(|e| Error::unavailable(context(), e))?;
        let mut create = |name: &str| {
            env.database_options()
                .types::<Bytes, Bytes>()
                .name(name)
                .create(&mut wtxn)
                .map_err(|e| Error::unavailable(context(), e))
        };
        let files = create("files")?;
        let blocks = create("blocks")?;
        let names = create("names")?;
        let meta = create("meta")?;
        wtxn.commit().map_err(|e| Error::unavailable(context(), e))?;

        info!(path = %path.display(), "opened file index");
        Ok(Self {
            env,
            files,
            blocks,
            names,
            meta,
        })
    }

    fn last_sequence(&self, txn: &RoTxn<'_>, folder: &str) -> Result<u64> {
        let Some(bytes) = self.meta.get(txn, &folder_key(folder)).map_err(read_failed)? else {
            return Ok(0);
        };
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::malformed(format!("sequence of folder {folder:?}")))?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Metadata stored under a `files` key, which a `names` entry promises exists.
    fn copy_at(
        &self,
        txn: &RoTxn<'_>,
        folder: &str,
        device: DeviceId,
        part: &[u8],
    ) -> Result<DeviceCopy> {
        let meta = self
            .files
            .get(txn, &file_key(folder, &device, part))
            .map_err(read_failed)?
            .ok_or_else(|| Error::malformed("name entry without record"))?;
        Ok(DeviceCopy {
            device,
            file: decode_meta(meta)?,
        })
    }

    fn load_full(
        &self,
        txn: &RoTxn<'_>,
        folder: &str,
        device: &DeviceId,
        name: &str,
    ) -> Result<Option<FileRecord>> {
        let key = file_key(folder, device, &name_part(name));
        let Some(meta) = self.files.get(txn, &key).map_err(read_failed)? else {
            return Ok(None);
        };
        let meta = decode_meta(meta)?;
        if meta.name != name {
            return Ok(None);
        }
        let blocks = match self.blocks.get(txn, &key).map_err(read_failed)? {
            Some(bytes) => decode_blocks(name, bytes)?,
            None => return Err(Error::malformed(format!("no blocks stored for {name:?}"))),
        };
        Ok(Some(FileRecord {
            name: meta.name,
            flags: meta.flags,
            modified: meta.modified,
            version: meta.version,
            blocks,
            sequence: meta.sequence,
        }))
    }

    fn view(
        &self,
        txn: &RoTxn<'_>,
        folder: &str,
        copy: DeviceCopy,
        projection: Projection,
    ) -> Result<FileView> {
        match projection {
            Projection::Truncated => Ok(FileView::Truncated(copy.file)),
            Projection::Full => self
                .load_full(txn, folder, &copy.device, &copy.file.name)?
                .map(FileView::Full)
                .ok_or_else(|| Error::malformed(format!("record {:?} vanished", copy.file.name))),
        }
    }

    /// Visit the copies of every name starting with `prefix`, one name at a time.
    fn scan_names(
        &self,
        txn: &RoTxn<'_>,
        folder: &str,
        prefix: &str,
        mut each: impl FnMut(Vec<DeviceCopy>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let skip = folder_key(folder).len();
        let mut start = folder_key(folder);
        start.extend_from_slice(&prefix.as_bytes()[..prefix.len().min(NAME_KEY_BUDGET)]);

        let mut group: Vec<DeviceCopy> = Vec::new();
        let mut emit = |copy: DeviceCopy| -> Result<ControlFlow<()>> {
            if !copy.file.name.starts_with(prefix) {
                return Ok(ControlFlow::Continue(()));
            }
            if group.first().is_some_and(|first| first.file.name != copy.file.name)
                && each(std::mem::take(&mut group))?.is_break()
            {
                return Ok(ControlFlow::Break(()));
            }
            group.push(copy);
            Ok(ControlFlow::Continue(()))
        };

        let mut order = NameOrder::default();
        for entry in self.names.prefix_iter(txn, &start).map_err(read_failed)? {
            let (key, _) = entry.map_err(read_failed)?;
            let (part, device) = split_name_key(&key[skip..])?;
            let copy = self.copy_at(txn, folder, device, part)?;
            if order.push(part, copy, &mut emit)?.is_break() {
                return Ok(());
            }
        }
        if order.flush(&mut emit)?.is_break() {
            return Ok(());
        }
        if !group.is_empty() {
            let _ = each(group)?;
        }
        Ok(())
    }

    fn copies_of(&self, txn: &RoTxn<'_>, folder: &str, name: &str) -> Result<Vec<DeviceCopy>> {
        let skip = folder_key(folder).len();
        let mut start = folder_key(folder);
        start.extend_from_slice(&name_part(name));

        let mut copies = Vec::new();
        for entry in self.names.prefix_iter(txn, &start).map_err(read_failed)? {
            let (key, _) = entry.map_err(read_failed)?;
            let (part, device) = split_name_key(&key[skip..])?;
            let copy = self.copy_at(txn, folder, device, part)?;
            if copy.file.name == name {
                copies.push(copy);
            }
        }
        Ok(copies)
    }

    /// Highest sequence among `device`'s records as `txn` sees them.
    fn device_sequence(&self, txn: &RoTxn<'_>, folder: &str, device: &DeviceId) -> Result<u64> {
        let mut highest = 0;
        for entry in self
            .files
            .prefix_iter(txn, &device_key(folder, device))
            .map_err(read_failed)?
        {
            let (_, meta) = entry.map_err(read_failed)?;
            highest = highest.max(decode_meta(meta)?.sequence);
        }
        Ok(highest)
    }

    fn write(
        &self,
        folder: &str,
        device: &DeviceId,
        files: &[FileRecord],
        replace: bool,
    ) -> Result<u64> {
        check_batch(folder, files)?;
        let failed = |e: heed::Error| Error::transaction(folder, e);
        let encode_failed = |e: RkyvError| Error::transaction(folder, e);

        let mut wtxn = self.env.write_txn().map_err(failed)?;
        let mut sequence = self.last_sequence(&wtxn, folder)?;
        let mut highest = 0;

        for file in files {
            if self
                .load_full(&wtxn, folder, device, &file.name)?
                .is_some_and(|existing| existing.same_content(file))
            {
                trace!(name = %file.name, "unchanged");
                continue;
            }
            sequence += 1;
            trace!(name = %file.name, sequence, "storing");

            let part = name_part(&file.name);
            let key = file_key(folder, device, &part);
            let meta = rkyv::to_bytes::<RkyvError>(&StoredMeta::new(file, sequence))
                .map_err(encode_failed)?;
            let blocks = rkyv::to_bytes::<RkyvError>(&StoredBlocks {
                blocks: file.blocks.iter().map(StoredBlock::from).collect(),
            })
            .map_err(encode_failed)?;

            self.files.put(&mut wtxn, &key, &meta).map_err(failed)?;
            self.blocks.put(&mut wtxn, &key, &blocks).map_err(failed)?;
            self.names
                .put(&mut wtxn, &name_key(folder, &part, device), &[])
                .map_err(failed)?;
            highest = sequence;
        }

        let mut removed = 0;
        if replace {
            let keep: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
            let prefix = device_key(folder, device);
            let mut stale = Vec::new();
            for entry in self.files.prefix_iter(&wtxn, &prefix).map_err(failed)? {
                let (key, meta) = entry.map_err(failed)?;
                let file = decode_meta(meta)?;
                if !keep.contains(file.name.as_str()) {
                    stale.push((key[prefix.len()..].to_vec(), file.name));
                }
            }

            for (part, name) in &stale {
                trace!(%name, "removing");
                let key = file_key(folder, device, part);
                self.files.delete(&mut wtxn, &key).map_err(failed)?;
                self.blocks.delete(&mut wtxn, &key).map_err(failed)?;
                self.names
                    .delete(&mut wtxn, &name_key(folder, part, device))
                    .map_err(failed)?;
            }
            removed = stale.len();
            highest = self.device_sequence(&wtxn, folder, device)?;
        }

        self.meta
            .put(&mut wtxn, &folder_key(folder), &sequence.to_be_bytes())
            .map_err(failed)?;
        wtxn.commit().map_err(failed)?;

        debug!(folder, %device, files = files.len(), removed, highest, "committed batch");
        Ok(highest)
    }
}

impl FileIndex for LmdbIndex {
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
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let prefix = device_key(folder, device);
        let mut emit = |copy: DeviceCopy| -> Result<ControlFlow<()>> {
            Ok(visit(self.view(&rtxn, folder, copy, projection)?))
        };

        let mut order = NameOrder::default();
        for entry in self.files.prefix_iter(&rtxn, &prefix).map_err(read_failed)? {
            let (key, meta) = entry.map_err(read_failed)?;
            let copy = DeviceCopy {
                device: *device,
                file: decode_meta(meta)?,
            };
            if order.push(&key[prefix.len()..], copy, &mut emit)?.is_break() {
                return Ok(());
            }
        }
        let _ = order.flush(&mut emit)?;
        Ok(())
    }

    fn global(
        &self,
        folder: &str,
        prefix: &str,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        self.scan_names(&rtxn, folder, prefix, |copies| {
            let Some(winner) = select_global(&copies) else {
                return Ok(ControlFlow::Continue(()));
            };
            Ok(visit(self.view(&rtxn, folder, winner.clone(), projection)?))
        })
    }

    fn need(
        &self,
        folder: &str,
        device: &DeviceId,
        projection: Projection,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        self.scan_names(&rtxn, folder, "", |copies| {
            let Some(winner) = needs(device, &copies) else {
                return Ok(ControlFlow::Continue(()));
            };
            Ok(visit(self.view(&rtxn, folder, winner.clone(), projection)?))
        })
    }

    fn get(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<FileRecord>> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        self.load_full(&rtxn, folder, device, name)
    }

    fn get_global(
        &self,
        folder: &str,
        name: &str,
        projection: Projection,
    ) -> Result<Option<FileView>> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let copies = self.copies_of(&rtxn, folder, name)?;
        select_global(&copies)
            .map(|winner| self.view(&rtxn, folder, winner.clone(), projection))
            .transpose()
    }

    fn availability(&self, folder: &str, name: &str) -> Result<Vec<DeviceId>> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        Ok(available(&self.copies_of(&rtxn, folder, name)?))
    }

    fn max_sequence(&self, folder: &str, device: &DeviceId) -> Result<u64> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        self.device_sequence(&rtxn, folder, device)
    }

    fn versions(&self, folder: &str, visit: &mut dyn FnMut(DeviceCopy)) -> Result<()> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let prefix = folder_key(folder);
        for entry in self.files.prefix_iter(&rtxn, &prefix).map_err(read_failed)? {
            let (key, meta) = entry.map_err(read_failed)?;
            let (device, _) = split_file_key(&key[prefix.len()..])?;
            visit(DeviceCopy {
                device,
                file: decode_meta(meta)?,
            });
        }
        Ok(())
    }

    fn folders(&self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let mut folders = Vec::new();
        for entry in self.meta.iter(&rtxn).map_err(read_failed)? {
            let (key, _) = entry.map_err(read_failed)?;
            let mut records = self.names.prefix_iter(&rtxn, key).map_err(read_failed)?;
            if records.next().transpose().map_err(read_failed)?.is_some() {
                folders.push(parse_folder_key(key)?);
            }
        }
        Ok(folders)
    }

    fn drop_folder(&self, folder: &str) -> Result<()> {
        let failed = |e: heed::Error| Error::transaction(folder, e);
        let prefix = folder_key(folder);
        let mut wtxn = self.env.write_txn().map_err(failed)?;

        for db in [&self.files, &self.blocks, &self.names] {
            let keys = db
                .prefix_iter(&wtxn, &prefix)
                .map_err(failed)?
                .map(|entry| entry.map(|(key, _)| key.to_vec()))
                .collect::<heed::Result<Vec<_>>>()
                .map_err(failed)?;
            for key in &keys {
                db.delete(&mut wtxn, key).map_err(failed)?;
            }
        }
        self.meta.delete(&mut wtxn, &prefix).map_err(failed)?;
        wtxn.commit().map_err(failed)?;

        info!(folder, "dropped folder from index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::blocks_of;
    use crate::index::MAX_FOLDER_LEN;

    fn open(dir: &Path) -> LmdbIndex {
        let config = IndexConfig {
            map_size: 16 << 20,
            ..IndexConfig::default()
        };
        LmdbIndex::open(dir, &config).unwrap()
    }

    fn file(name: &str, data: &[u8], counter: u64) -> FileRecord {
        FileRecord {
            name: name.into(),
            flags: Flags::from_bits(0o644 | Flags::HAS_PERMISSIONS),
            modified: 1_700_000_000,
            version: VersionVector::from_counters([(DeviceId::LOCAL, counter)]),
            blocks: blocks_of(data, 4).unwrap(),
            sequence: 0,
        }
    }

    fn have_names(index: &LmdbIndex, device: &DeviceId) -> Vec<String> {
        let mut names = Vec::new();
        index
            .have("f", device, Projection::Truncated, &mut |view: FileView| {
                names.push(view.name().to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        names
    }

    fn global_names(index: &LmdbIndex, prefix: &str) -> Vec<String> {
        let mut names = Vec::new();
        index
            .global("f", prefix, Projection::Truncated, &mut |view: FileView| {
                names.push(view.name().to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        names
    }

    #[test]
    fn test_name_key_roundtrip() {
        let device = DeviceId::from_raw([7; 32]);
        let part = name_part("dir/a.txt");
        assert_eq!(part, b"dir/a.txt\0");

        let key = name_key("folder", &part, &device);
        let skip = folder_key("folder").len();
        let (parsed_part, parsed) = split_name_key(&key[skip..]).unwrap();
        assert_eq!(parsed_part, part.as_slice());
        assert_eq!(parsed, device);

        assert_eq!(parse_folder_key(&folder_key("folder")).unwrap(), "folder");
        assert!(parse_folder_key(b"\0\0").is_err());
    }

    #[test]
    fn test_keys_stay_within_lmdb_limit() {
        let folder = "f".repeat(MAX_FOLDER_LEN);
        let name = "deep/".repeat(1000);
        let part = name_part(&name);
        assert_eq!(part.len(), LONG_NAME_KEY_LEN);
        assert!(long_name_stem(&part).is_some());
        assert!(long_name_stem(&name_part("short")).is_none());

        assert!(name_key(&folder, &part, &DeviceId::LOCAL).len() <= 511);
        assert!(file_key(&folder, &DeviceId::LOCAL, &part).len() <= 511);
    }

    #[test]
    fn test_folder_keys_do_not_overlap() {
        assert!(!folder_key("ab").starts_with(&folder_key("a")));
    }

    #[test]
    fn test_long_names_scan_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let stem = "d/".repeat(NAME_KEY_BUDGET);
        let mut names: Vec<String> = (0..8).map(|i| format!("{stem}{}", 7 - i)).collect();
        names.push(stem[..NAME_KEY_BUDGET].to_string());
        names.push("a".into());
        names.push("z".into());

        let files: Vec<_> = names.iter().map(|n| file(n, b"x", 1)).collect();
        index.replace("f", &DeviceId::LOCAL, &files).unwrap();
        let remote = DeviceId::from_raw([1; 32]);
        index.replace("f", &remote, &files[..4]).unwrap();

        names.sort();
        assert_eq!(have_names(&index, &DeviceId::LOCAL), names);
        assert_eq!(global_names(&index, ""), names);
        assert_eq!(global_names(&index, &format!("{stem}3")), [format!("{stem}3")]);

        let long = &names[3];
        assert!(index.get("f", &DeviceId::LOCAL, long).unwrap().is_some());
        let mut holders = index.availability("f", &files[0].name).unwrap();
        holders.sort();
        assert_eq!(holders, [remote, DeviceId::LOCAL]);
    }

    #[test]
    fn test_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stored = file("a.txt", b"hello world", 1);
        {
            let index = open(dir.path());
            assert_eq!(index.update("f", &DeviceId::LOCAL, &[stored.clone()]).unwrap(), 1);
        }

        let index = open(dir.path());
        let loaded = index.get("f", &DeviceId::LOCAL, "a.txt").unwrap().unwrap();
        assert!(loaded.same_content(&stored));
        assert_eq!(loaded.sequence, 1);
        assert_eq!(index.folders().unwrap(), ["f"]);

        // sequences continue where the previous session stopped
        assert_eq!(index.update("f", &DeviceId::LOCAL, &[file("b", b"x", 1)]).unwrap(), 2);
    }

    #[test]
    fn test_replace_reports_device_max_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let a = file("a", b"a", 1);
        index.update("f", &DeviceId::LOCAL, &[a.clone(), file("b", b"b", 1)]).unwrap();

        assert_eq!(index.replace("f", &DeviceId::LOCAL, &[a]).unwrap(), 1);
        assert_eq!(index.replace("f", &DeviceId::LOCAL, &[]).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        index.update("f", &DeviceId::LOCAL, &[file("a", b"abc", 1)]).unwrap();

        let mut wtxn = index.env.write_txn().unwrap();
        index
            .files
            .put(&mut wtxn, &file_key("f", &DeviceId::LOCAL, &name_part("a")), b"garbage")
            .unwrap();
        wtxn.commit().unwrap();

        let err = index.get("f", &DeviceId::LOCAL, "a").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)), "{err}");
    }

    #[test]
    fn test_open_unusable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = LmdbIndex::open(&blocker.join("index"), &IndexConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::StorageUnavailable { .. }), "{err}");
    }
}
