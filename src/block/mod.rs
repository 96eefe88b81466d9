//! Block Store Module
//!
//! Offset-addressed access to the five files that make up a table.
//!
//! ## Responsibilities
//! - Map each `FileKind` to its file under the data directory
//! - Read fixed-size blocks at caller-supplied offsets
//! - Allocate blocks, reusing reclaimed ranges from the free list first
//! - Rewrite blocks in place (chain relinking, release stamping)
//! - Release blocks back to the free list without erasing them
//!
//! ## References
//! Cross-structure pointers are logical byte offsets wrapped in typed
//! newtypes (`RecordRef`, `ReleaseRef`, `EntryRef`). `u64::MAX` is the NIL
//! sentinel. Only `BlockStore` turns a reference into bytes.
//!
//! ```text
//!  table.bin            ks1_nodes.bin               data.bin
//! ┌──────────┐        ┌──────────────────┐       ┌──────────┐
//! │ slot k=1 │──head─▶│ rel 0 │ rec │ nx │──rec─▶│ Record   │
//! │ slot k=7 │        └──────────────┬───┘       ├──────────┤
//! │   ...    │        ┌──────────────▼───┐       │ Record   │
//! │ bucket 0 │        │ rel 1 │ rec │NIL │──rec─▶│   ...    │
//! │ bucket 1 │──┐     └──────────────────┘       └──────────┘
//! └──────────┘  │          ks2.bin                    ▲
//!               │     ┌──────────────────┐            │
//!               └────▶│ key2 │ rec │ nx  │────rec─────┘
//!                     └──────────────────┘
//! ```

mod store;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DuoError, Result};

pub use store::BlockStore;

/// Sentinel offset meaning "no block"
pub const NIL_OFFSET: u64 = u64::MAX;

// =============================================================================
// File Kinds
// =============================================================================

/// The files cooperating to store one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Directory snapshot (KS1 slots, KS2 bucket heads, counters)
    Directory,
    /// Fixed-size record blocks
    Data,
    /// KS1 release chain nodes
    ReleaseNodes,
    /// KS2 hash chain entries
    HashEntries,
    /// Reclaimed block list
    FreeList,
}

impl FileKind {
    /// Every file kind, in creation order
    pub const ALL: [FileKind; 5] = [
        FileKind::Directory,
        FileKind::Data,
        FileKind::ReleaseNodes,
        FileKind::HashEntries,
        FileKind::FreeList,
    ];

    /// File name under the data directory
    pub fn file_name(self) -> &'static str {
        match self {
            FileKind::Directory => "table.bin",
            FileKind::Data => "data.bin",
            FileKind::ReleaseNodes => "ks1_nodes.bin",
            FileKind::HashEntries => "ks2.bin",
            FileKind::FreeList => "free_list.bin",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

// =============================================================================
// Typed References
// =============================================================================

/// A logical address inside one file kind
pub trait BlockRef: Copy + fmt::Debug {
    fn from_offset(offset: u64) -> Self;
    fn offset(self) -> u64;

    fn is_nil(self) -> bool {
        self.offset() == NIL_OFFSET
    }
}

macro_rules! block_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const NIL: Self = Self(NIL_OFFSET);

            pub fn is_nil(self) -> bool {
                self.0 == NIL_OFFSET
            }

            /// `None` for NIL
            pub fn get(self) -> Option<Self> {
                if self.is_nil() {
                    None
                } else {
                    Some(self)
                }
            }
        }

        impl BlockRef for $name {
            fn from_offset(offset: u64) -> Self {
                Self(offset)
            }

            fn offset(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_nil() {
                    f.write_str("NIL")
                } else {
                    write!(f, "@{}", self.0)
                }
            }
        }
    };
}

block_ref!(
    /// Offset of a `Record` in the data file
    RecordRef
);
block_ref!(
    /// Offset of a `ReleaseNode` in the KS1 nodes file
    ReleaseRef
);
block_ref!(
    /// Offset of a `HashEntry` in the KS2 file
    EntryRef
);

// =============================================================================
// Fixed-Size Blocks
// =============================================================================

/// A fixed-size structure stored in one of the block files
pub trait Block: Sized {
    /// File the block lives in
    const KIND: FileKind;

    /// Exact encoded size in bytes
    const SIZE: usize;

    /// Reference type addressing this block
    type Ref: BlockRef;

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Encode with bincode's fixed-int layout and check the size
pub(crate) fn encode_fixed<T: Serialize>(value: &T, size: usize) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(value)?;
    if bytes.len() != size {
        return Err(DuoError::Serialization(format!(
            "encoded block is {} bytes, expected {}",
            bytes.len(),
            size
        )));
    }
    Ok(bytes)
}

/// Decode a bincode block of exactly `size` bytes
pub(crate) fn decode_fixed<T: DeserializeOwned>(bytes: &[u8], size: usize) -> Result<T> {
    if bytes.len() != size {
        return Err(DuoError::Corruption(format!(
            "block is {} bytes, expected {}",
            bytes.len(),
            size
        )));
    }
    Ok(bincode::deserialize(bytes)?)
}
