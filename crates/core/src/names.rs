//! Conversion between native filenames and the wire form
//!
//! The wire form is NFC-normalized with `/` separators. Callers may hand us
//! either form; [`FileSet`](crate::FileSet) converts to wire form once on the
//! way into the index and back to native form once on the way out.

use unicode_normalization::UnicodeNormalization as _;

/// Convert a caller-supplied name to wire form.
#[must_use]
pub fn to_wire(name: &str) -> String {
    #[cfg(windows)]
    let name = name.replace('\\', "/");
    name.nfc().collect()
}

/// Convert a wire-form name to this platform's native form.
#[must_use]
pub fn to_native(name: &str) -> String {
    #[cfg(windows)]
    {
        name.replace('/', "\\")
    }
    #[cfg(target_os = "macos")]
    {
        name.nfd().collect()
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_is_nfc() {
        // "e" followed by a combining acute accent
        let decomposed = "cafe\u{301}.txt";
        assert_eq!(to_wire(decomposed), "caf\u{e9}.txt");
    }

    #[test]
    fn test_wire_is_idempotent() {
        let name = "dir/caf\u{e9}.txt";
        assert_eq!(to_wire(&to_wire(name)), to_wire(name));
    }

    #[test]
    fn test_native_roundtrip() {
        let wire = to_wire("dir/sub/caf\u{e9}.txt");
        assert_eq!(to_wire(&to_native(&wire)), wire);
    }
}
