//! Version vectors and the local Lamport clock
//!
//! A [`VersionVector`] records, per device, the last edit counter that
//! contributed to a file version. Two vectors are either ordered (one
//! causally follows the other), equal, or concurrent (a conflict).

use std::cmp;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::device::{DEVICE_ID_LEN, DeviceId};
use crate::error::{Error, Result};

/// Encoded size of one `(device, counter)` entry
const ENTRY_LEN: usize = DEVICE_ID_LEN + 8;

/// Outcome of comparing two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// `self` is causally before `other`
    Less,
    /// `self` causally follows `other`
    Greater,
    /// Same history
    Equal,
    /// Neither follows the other
    Concurrent,
}

/// Per-device edit counters for one file version.
///
/// Counters never decrease. A missing device counts as zero and zero
/// counters are never stored, so equal histories have equal encodings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionVector {
    counters: BTreeMap<DeviceId, u64>,
}

impl VersionVector {
    /// Create an empty vector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vector from explicit counters (zero counters are dropped)
    #[must_use]
    pub fn from_counters(counters: impl IntoIterator<Item = (DeviceId, u64)>) -> Self {
        let mut vector = Self::new();
        for (device, counter) in counters {
            vector.insert(device, counter);
        }
        vector
    }

    /// Counter for `device`, zero if absent
    #[must_use]
    pub fn counter(&self, device: &DeviceId) -> u64 {
        self.counters.get(device).copied().unwrap_or(0)
    }

    /// Whether no device has edited this version
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterate `(device, counter)` pairs in device order
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &u64)> {
        self.counters.iter()
    }

    /// Raise the counter for `device` to at least `counter`.
    pub fn insert(&mut self, device: DeviceId, counter: u64) {
        if counter == 0 {
            return;
        }
        self.counters
            .entry(device)
            .and_modify(|c| *c = (*c).max(counter))
            .or_insert(counter);
    }

    /// Record a new edit made by `device`.
    ///
    /// The new counter comes from `clock`, so it is larger than anything the
    /// clock has seen.
    ///
    /// # Errors
    /// [`Error::ClockExhausted`] if no larger counter exists.
    pub fn update(&mut self, device: DeviceId, clock: &LamportClock) -> Result<()> {
        let next = clock.tick(self.counter(&device))?;
        self.counters.insert(device, next);
        Ok(())
    }

    /// Whether some counter has reached `u64::MAX` and can never be followed
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.counters.values().any(|&c| c == u64::MAX)
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &Self) {
        for (device, counter) in &other.counters {
            self.insert(*device, *counter);
        }
    }

    /// Causal comparison.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let mut greater = false;
        let mut less = false;

        for (device, &ours) in &self.counters {
            let theirs = other.counter(device);
            if ours > theirs {
                greater = true;
            } else if ours < theirs {
                less = true;
            }
        }
        for (device, &theirs) in &other.counters {
            if !self.counters.contains_key(device) && theirs > 0 {
                less = true;
            }
        }

        match (greater, less) {
            (false, false) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (true, true) => Ordering::Concurrent,
        }
    }

    /// Whether `self` strictly follows `other`
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Greater
    }

    /// Total order used to pick a single winner among versions.
    ///
    /// Causal order where it exists. Concurrent vectors fall back to comparing
    /// their canonical encodings byte by byte, which every peer computes the
    /// same way.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> cmp::Ordering {
        match self.compare(other) {
            Ordering::Less => cmp::Ordering::Less,
            Ordering::Greater => cmp::Ordering::Greater,
            Ordering::Equal => cmp::Ordering::Equal,
            Ordering::Concurrent => self.to_bytes().cmp(&other.to_bytes()),
        }
    }

    /// Canonical encoding: for each device in order, the 32 id bytes followed
    /// by the counter as big-endian u64.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.counters.len() * ENTRY_LEN);
        for (device, counter) in &self.counters {
            out.extend_from_slice(device.as_bytes());
            out.extend_from_slice(&counter.to_be_bytes());
        }
        out
    }

    /// Decode the canonical encoding.
    ///
    /// # Errors
    /// Returns [`Error::MalformedRecord`] for truncated input, devices out of
    /// order or repeated, or zero counters.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % ENTRY_LEN != 0 {
            return Err(Error::malformed(format!(
                "version vector length {} is not a multiple of {ENTRY_LEN}",
                bytes.len()
            )));
        }

        let mut counters = BTreeMap::new();
        let mut previous: Option<DeviceId> = None;
        for entry in bytes.chunks_exact(ENTRY_LEN) {
            let (id, counter) = entry.split_at(DEVICE_ID_LEN);
            let device = DeviceId::from_slice(id)
                .ok_or_else(|| Error::malformed("short device id in version vector"))?;
            let counter = u64::from_be_bytes(
                counter
                    .try_into()
                    .map_err(|_| Error::malformed("short counter in version vector"))?,
            );

            if previous.is_some_and(|p| p >= device) {
                return Err(Error::malformed("version vector devices out of order"));
            }
            if counter == 0 {
                return Err(Error::malformed("zero counter in version vector"));
            }

            previous = Some(device);
            counters.insert(device, counter);
        }

        Ok(Self { counters })
    }
}

/// Logical clock for new local edits.
///
/// Kept ahead of every counter observed from any device, so a new local
/// version causally follows everything this device has already seen.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    /// Create a clock starting at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a value greater than `seen` and than every value returned before.
    ///
    /// # Errors
    /// [`Error::ClockExhausted`] once the clock or `seen` is at `u64::MAX`.
    /// The clock is left unchanged.
    pub fn tick(&self, seen: u64) -> Result<u64> {
        let mut current = self.value.load(AtomicOrdering::Relaxed);
        loop {
            let next = current.max(seen).checked_add(1).ok_or(Error::ClockExhausted)?;
            match self.value.compare_exchange_weak(
                current,
                next,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Advance past every counter in `vector`.
    pub fn observe(&self, vector: &VersionVector) {
        for (_, &counter) in vector.iter() {
            self.value.fetch_max(counter, AtomicOrdering::AcqRel);
        }
    }

    /// The last value handed out or observed
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(AtomicOrdering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(n: u8) -> DeviceId {
        DeviceId::from_raw([n; 32])
    }

    fn vv(entries: &[(u8, u64)]) -> VersionVector {
        VersionVector::from_counters(entries.iter().map(|&(d, c)| (dev(d), c)))
    }

    #[test]
    fn test_compare() {
        assert_eq!(vv(&[(1, 1)]).compare(&vv(&[(1, 1)])), Ordering::Equal);
        assert_eq!(vv(&[]).compare(&vv(&[])), Ordering::Equal);
        assert_eq!(vv(&[(1, 2)]).compare(&vv(&[(1, 1)])), Ordering::Greater);
        assert_eq!(vv(&[(1, 1)]).compare(&vv(&[(1, 1), (2, 1)])), Ordering::Less);
        assert_eq!(vv(&[]).compare(&vv(&[(2, 1)])), Ordering::Less);
        assert_eq!(
            vv(&[(1, 2)]).compare(&vv(&[(1, 1), (2, 1)])),
            Ordering::Concurrent
        );
    }

    #[test]
    fn test_zero_counters_are_absent() {
        assert_eq!(vv(&[(1, 1), (2, 0)]), vv(&[(1, 1)]));
        assert_eq!(vv(&[(1, 1), (2, 0)]).compare(&vv(&[(1, 1)])), Ordering::Equal);
    }

    #[test]
    fn test_total_cmp_is_antisymmetric_for_conflicts() {
        let a = vv(&[(1, 2)]);
        let b = vv(&[(1, 1), (2, 1)]);
        assert_eq!(a.total_cmp(&b), b.total_cmp(&a).reverse());
        assert_ne!(a.total_cmp(&b), cmp::Ordering::Equal);
    }

    #[test]
    fn test_merge() {
        let mut a = vv(&[(1, 3), (2, 1)]);
        a.merge(&vv(&[(2, 5), (3, 1)]));
        assert_eq!(a, vv(&[(1, 3), (2, 5), (3, 1)]));
    }

    #[test]
    fn test_bytes_roundtrip_and_rejects_garbage() {
        let v = vv(&[(1, 7), (9, 1 << 40)]);
        assert_eq!(VersionVector::from_bytes(&v.to_bytes()).unwrap(), v);

        assert!(VersionVector::from_bytes(&[1, 2, 3]).is_err());

        // devices out of order
        let mut swapped = vv(&[(9, 1)]).to_bytes();
        swapped.extend(vv(&[(1, 1)]).to_bytes());
        assert!(VersionVector::from_bytes(&swapped).is_err());

        // zero counter
        let mut zero = dev(1).as_bytes().to_vec();
        zero.extend(0u64.to_be_bytes());
        assert!(VersionVector::from_bytes(&zero).is_err());
    }

    #[test]
    fn test_clock_ticks_past_seen() {
        let clock = LamportClock::new();
        assert_eq!(clock.tick(0).unwrap(), 1);
        assert_eq!(clock.tick(0).unwrap(), 2);
        assert_eq!(clock.tick(10).unwrap(), 11);
        assert_eq!(clock.tick(3).unwrap(), 12);
    }

    #[test]
    fn test_clock_exhaustion_is_an_error() {
        let clock = LamportClock::new();
        assert!(matches!(clock.tick(u64::MAX), Err(Error::ClockExhausted)));
        assert_eq!(clock.value(), 0);

        let remote = vv(&[(2, u64::MAX)]);
        assert!(remote.is_exhausted());
        clock.observe(&remote);

        let mut local = remote.clone();
        assert!(matches!(local.update(DeviceId::LOCAL, &clock), Err(Error::ClockExhausted)));
        assert_eq!(local, remote);
    }

    #[test]
    fn test_update_follows_observed() {
        let clock = LamportClock::new();
        let remote = vv(&[(2, 41)]);
        clock.observe(&remote);

        let mut local = remote.clone();
        local.update(DeviceId::LOCAL, &clock).unwrap();

        assert_eq!(local.counter(&DeviceId::LOCAL), 42);
        assert!(local.dominates(&remote));
    }
}
