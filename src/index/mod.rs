//! Index Module
//!
//! The two key spaces over the data file.
//!
//! ## Responsibilities
//! - KS1 (`PrimaryIndex`): sorted slot array, numeric key → release chain
//! - KS2 (`SecondaryIndex`): bucket array, string key → hash chain → record
//! - Walk singly linked chains stored in the node files
//!
//! The slot and bucket arrays live in memory and are persisted by the table
//! directory; chain nodes live in their own block files and are only reached
//! through offsets.

mod primary;
mod secondary;

use std::marker::PhantomData;

use crate::block::{Block, BlockRef, BlockStore};
use crate::error::{DuoError, Result};

pub use primary::{Ks1Slot, PrimaryIndex, ReleaseNode, RELEASE_NODE_SIZE};
pub use secondary::{HashEntry, SecondaryIndex, HASH_ENTRY_SIZE};

/// A block that links to the next block of the same kind
pub trait ChainNode: Block {
    fn next(&self) -> Self::Ref;
}

/// Iterator over a chain starting at `head`
///
/// Yields `(reference, node)` pairs. Stops with a `Corruption` error if the
/// chain is longer than the file can hold, which only happens on a cycle.
pub struct Chain<'a, T: ChainNode> {
    store: &'a BlockStore,
    next: T::Ref,
    remaining: u64,
    _node: PhantomData<T>,
}

impl<'a, T: ChainNode> Chain<'a, T> {
    pub fn new(store: &'a BlockStore, head: T::Ref) -> Result<Self> {
        let remaining = store.file_len(T::KIND)? / T::SIZE as u64 + 1;
        Ok(Self {
            store,
            next: head,
            remaining,
            _node: PhantomData,
        })
    }
}

impl<'a, T: ChainNode> Iterator for Chain<'a, T> {
    type Item = Result<(T::Ref, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        if current.is_nil() {
            return None;
        }

        if self.remaining == 0 {
            self.next = T::Ref::from_offset(crate::block::NIL_OFFSET);
            return Some(Err(DuoError::Corruption(format!(
                "cycle detected in {} chain",
                T::KIND
            ))));
        }
        self.remaining -= 1;

        match self.store.read_block::<T>(current) {
            Ok(node) => {
                self.next = node.next();
                Some(Ok((current, node)))
            }
            Err(e) => {
                self.next = T::Ref::from_offset(crate::block::NIL_OFFSET);
                Some(Err(e))
            }
        }
    }
}

/// Read a whole chain into memory
pub fn collect_chain<T: ChainNode>(store: &BlockStore, head: T::Ref) -> Result<Vec<(T::Ref, T)>> {
    Chain::new(store, head)?.collect()
}
