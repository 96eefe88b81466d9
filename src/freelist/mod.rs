//! Free-List Allocator
//!
//! Tracks reclaimed byte ranges of the block files so later writes can
//! reuse them instead of growing the files.
//!
//! ## Responsibilities
//! - Hold free blocks in list order (head = most recently freed)
//! - Hand out a block of the right file kind and size via an `AllocationPolicy`
//! - Load/save the whole list as one snapshot (`free_list.bin`)
//!
//! Adjacent blocks are never coalesced. A block larger than the request is
//! handed out whole; its tail stays unused until the block is freed again.

mod policy;

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::FileKind;
use crate::codec::{self, SnapshotRead};
use crate::error::Result;

pub use policy::{AllocationPolicy, FirstFit};

/// Magic bytes identifying a free-list snapshot
const MAGIC: &[u8; 4] = b"DKFL";

/// A reclaimed byte range in one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBlock {
    /// Start of the range
    pub offset: u64,

    /// Length of the range in bytes
    pub size: u64,

    /// File the range belongs to
    pub kind: FileKind,
}

/// Reclaimed blocks of every file kind
#[derive(Debug)]
pub struct FreeList {
    blocks: VecDeque<FreeBlock>,
    policy: Box<dyn AllocationPolicy>,
}

impl FreeList {
    /// Empty list with first-fit allocation
    pub fn new() -> Self {
        Self::with_policy(Box::new(FirstFit))
    }

    /// Empty list with a custom allocation policy
    pub fn with_policy(policy: Box<dyn AllocationPolicy>) -> Self {
        Self {
            blocks: VecDeque::new(),
            policy,
        }
    }

    /// Load a saved list
    ///
    /// A missing or empty file is an empty list. A damaged file only loses
    /// reclaimable space, so it is logged and replaced by an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        let mut list = Self::new();

        let body = match codec::read_snapshot(path, MAGIC, 0) {
            Ok(SnapshotRead::Body(body)) => body,
            Ok(SnapshotRead::Missing) | Ok(SnapshotRead::Undersized(0)) => return Ok(list),
            Ok(SnapshotRead::Undersized(len)) => {
                warn!(path = %path.display(), len, "Free list file truncated, starting empty");
                return Ok(list);
            }
            Err(e) if e.is_corruption() => {
                warn!(path = %path.display(), error = %e, "Free list unreadable, starting empty");
                return Ok(list);
            }
            Err(e) => return Err(e),
        };

        match bincode::deserialize::<Vec<FreeBlock>>(&body) {
            Ok(blocks) => list.blocks = blocks.into(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Free list undecodable, starting empty");
            }
        }

        debug!(path = %path.display(), blocks = list.len(), "Loaded free list");
        Ok(list)
    }

    /// Rewrite the saved list wholesale
    pub fn save(&self, path: &Path) -> Result<()> {
        let blocks: Vec<FreeBlock> = self.blocks.iter().copied().collect();
        let body = bincode::serialize(&blocks)?;
        codec::write_snapshot(path, MAGIC, &body, false)?;
        debug!(path = %path.display(), blocks = blocks.len(), "Saved free list");
        Ok(())
    }

    /// Take a block of `kind` holding at least `size` bytes
    ///
    /// The chosen block is unlinked; its offset is returned.
    pub fn find_free_block(&mut self, size: u64, kind: FileKind) -> Option<u64> {
        self.take(size, kind).map(|block| block.offset)
    }

    /// Like `find_free_block`, but hands back the whole block
    pub fn take(&mut self, size: u64, kind: FileKind) -> Option<FreeBlock> {
        let idx = self.policy.select(&self.blocks, size, kind)?;
        self.blocks.remove(idx)
    }

    /// Push a freed block onto the head of the list
    ///
    /// A range that is already free is ignored: handing it out twice would
    /// let two live blocks share one offset.
    pub fn append(&mut self, offset: u64, size: u64, kind: FileKind) {
        if self.contains(offset, kind) {
            warn!(file = %kind, offset, "Block is already free, ignoring");
            return;
        }
        self.blocks.push_front(FreeBlock { offset, size, kind });
    }

    /// Put back a block taken by `take` whose write did not happen
    pub fn restore(&mut self, block: FreeBlock) {
        self.append(block.offset, block.size, block.kind);
    }

    /// Number of free blocks across all kinds
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in list order, head first
    pub fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.blocks.iter()
    }

    /// Number of free blocks belonging to `kind`
    pub fn count_of(&self, kind: FileKind) -> usize {
        self.blocks.iter().filter(|b| b.kind == kind).count()
    }

    /// Whether `offset` of `kind` is currently free
    pub fn contains(&self, offset: u64, kind: FileKind) -> bool {
        self.blocks
            .iter()
            .any(|b| b.offset == offset && b.kind == kind)
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}
