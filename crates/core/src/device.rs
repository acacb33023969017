//! Opaque device identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of a device identifier in bytes
pub const DEVICE_ID_LEN: usize = 32;

/// Identifies one replica of a folder.
///
/// The engine only compares and hashes these; turning them into the
/// human-facing text form is someone else's job.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId([u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// The device this process runs on.
    pub const LOCAL: Self = Self([0xff; DEVICE_ID_LEN]);

    /// Wrap raw identifier bytes
    #[must_use]
    pub const fn from_raw(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, if it has the right length
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "DeviceId({})", hex.get(..12).unwrap_or(&hex))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_length() {
        assert!(DeviceId::from_slice(&[1u8; 32]).is_some());
        assert!(DeviceId::from_slice(&[1u8; 31]).is_none());
        assert!(DeviceId::from_slice(&[]).is_none());
    }

    #[test]
    fn test_local_sorts_last() {
        let other = DeviceId::from_raw([0x7f; 32]);
        assert!(other < DeviceId::LOCAL);
    }

    #[test]
    fn test_display_is_full_hex() {
        let id = DeviceId::from_raw([0xab; 32]);
        assert_eq!(id.to_string().len(), 64);
        assert!(id.to_string().starts_with("abab"));
    }
}
