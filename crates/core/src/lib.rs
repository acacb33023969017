//! fileset-core: per-folder file metadata and block delta engine
//!
//! Tracks, for every device sharing a folder, which file versions it holds,
//! works out the global winner per name and what each device still needs, and
//! splits content into fixed-size blocks for minimal transfer.

pub mod chunker;
pub mod config;
pub mod delta;
pub mod device;
pub mod error;
pub mod file;
pub mod hash;
pub mod index;
pub mod names;
pub mod set;
pub mod vector;

pub use chunker::{Block, blocks};
pub use config::IndexConfig;
pub use device::DeviceId;
pub use error::{Error, Mismatch, Result};
pub use file::{FileRecord, FileView, Flags, Projection, TruncatedFile};
pub use hash::{BlockHash, EMPTY_BLOCK_HASH};
pub use index::{FileIndex, LmdbIndex, MemoryIndex};
pub use set::FileSet;
pub use vector::{LamportClock, VersionVector};
