//! Allocation policies
//!
//! Decide which free block satisfies a request. Callers only see
//! `FreeList::find_free_block`, so a best-fit or coalescing policy can be
//! swapped in here.

use std::collections::VecDeque;
use std::fmt;

use crate::block::FileKind;

use super::FreeBlock;

/// Chooses a free block for a request
pub trait AllocationPolicy: fmt::Debug + Send + Sync {
    /// Index into `blocks` of the block to hand out, if any
    fn select(&self, blocks: &VecDeque<FreeBlock>, size: u64, kind: FileKind) -> Option<usize>;
}

/// The first block of the matching kind that is large enough
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFit;

impl AllocationPolicy for FirstFit {
    fn select(&self, blocks: &VecDeque<FreeBlock>, size: u64, kind: FileKind) -> Option<usize> {
        blocks
            .iter()
            .position(|block| block.kind == kind && block.size >= size)
    }
}
