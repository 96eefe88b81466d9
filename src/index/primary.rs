//! Primary Index (KS1)
//!
//! Sorted array of numeric keys, each heading a chain of release nodes.
//!
//! ```text
//! slots (sorted)         ks1_nodes.bin
//! ┌─────┬──────┐       ┌───────┬────────┬──────┐    ┌───────┬────────┬─────┐
//! │ k=3 │ head │──────▶│ rel 0 │ record │ next │───▶│ rel 1 │ record │ NIL │
//! ├─────┼──────┤       └───────┴────────┴──────┘    └───────┴────────┴─────┘
//! │ k=9 │ head │──▶ ...
//! └─────┴──────┘
//! ```
//!
//! Releases are assigned tail.release + 1 and never renumbered.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{self, Block, BlockStore, FileKind, RecordRef, ReleaseRef};
use crate::config::{CapacityPolicy, MIN_GROWABLE_CAPACITY};
use crate::error::{DuoError, Result};
use crate::freelist::FreeList;
use crate::record::Record;

use super::{collect_chain, Chain, ChainNode};

/// Encoded size of a release node: release (8) + record (8) + next (8)
pub const RELEASE_NODE_SIZE: usize = 24;

/// One release in a KS1 chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseNode {
    pub release: u64,
    pub record: RecordRef,
    pub next: ReleaseRef,
}

impl Block for ReleaseNode {
    const KIND: FileKind = FileKind::ReleaseNodes;
    const SIZE: usize = RELEASE_NODE_SIZE;
    type Ref = ReleaseRef;

    fn encode(&self) -> Result<Vec<u8>> {
        block::encode_fixed(self, Self::SIZE)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        block::decode_fixed(bytes, Self::SIZE)
    }
}

impl ChainNode for ReleaseNode {
    fn next(&self) -> ReleaseRef {
        self.next
    }
}

/// A KS1 slot: numeric key and the head of its release chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ks1Slot {
    pub key: u64,
    pub head: ReleaseRef,
}

impl Ks1Slot {
    /// Filler for unused positions in the directory snapshot
    pub const EMPTY: Ks1Slot = Ks1Slot {
        key: u64::MAX,
        head: ReleaseRef::NIL,
    };

    pub fn is_empty(&self) -> bool {
        self.head.is_nil()
    }
}

/// KS1: numeric key → release chain
///
/// `slots` holds only live slots (`csize1` = `slots.len()`), strictly
/// ascending by key. `capacity` is `msize1`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryIndex {
    slots: Vec<Ks1Slot>,
    capacity: usize,
    policy: CapacityPolicy,
}

impl PrimaryIndex {
    /// Empty index
    pub fn new(capacity: usize, policy: CapacityPolicy) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Rebuild from a snapshot, checking the ordering invariant
    pub(crate) fn from_parts(
        slots: Vec<Ks1Slot>,
        capacity: usize,
        policy: CapacityPolicy,
    ) -> Result<Self> {
        if slots.len() > capacity {
            return Err(DuoError::Corruption(format!(
                "KS1 holds {} slots but capacity is {}",
                slots.len(),
                capacity
            )));
        }
        if slots.windows(2).any(|pair| pair[0].key >= pair[1].key) {
            return Err(DuoError::Corruption("KS1 slots are not strictly sorted".to_string()));
        }
        if slots.iter().any(Ks1Slot::is_empty) {
            return Err(DuoError::Corruption("KS1 slot without a release chain".to_string()));
        }
        Ok(Self {
            slots,
            capacity,
            policy,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of live keys (`csize1`)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot capacity (`msize1`)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Live slots in key order
    pub fn slots(&self) -> &[Ks1Slot] {
        &self.slots
    }

    /// Binary search for `key`
    pub fn find_key_idx(&self, key: u64) -> Option<usize> {
        self.slots.binary_search_by_key(&key, |slot| slot.key).ok()
    }

    /// Head of the release chain for `key`
    pub fn head(&self, key: u64) -> Option<ReleaseRef> {
        self.find_key_idx(key).map(|idx| self.slots[idx].head)
    }

    /// Every release node under `key`, oldest first; empty if absent
    pub fn releases(&self, store: &BlockStore, key: u64) -> Result<Vec<(ReleaseRef, ReleaseNode)>> {
        match self.head(key) {
            Some(head) => collect_chain(store, head),
            None => Ok(Vec::new()),
        }
    }

    /// The node for one release of `key`, if that release is still live
    pub fn find_release(
        &self,
        store: &BlockStore,
        key: u64,
        release: u64,
    ) -> Result<Option<(ReleaseRef, ReleaseNode)>> {
        let Some(head) = self.head(key) else {
            return Ok(None);
        };
        for item in Chain::<ReleaseNode>::new(store, head)? {
            let (node_ref, node) = item?;
            // chains are ascending
            if node.release > release {
                break;
            }
            if node.release == release {
                return Ok(Some((node_ref, node)));
            }
        }
        Ok(None)
    }

    /// Longest release chain over all keys
    pub fn max_releases(&self, store: &BlockStore) -> Result<usize> {
        let mut max = 0;
        for slot in &self.slots {
            max = max.max(collect_chain::<ReleaseNode>(store, slot.head)?.len());
        }
        Ok(max)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `record` as the newest release of `key`
    ///
    /// The record block is rewritten in place with the assigned release,
    /// which is also returned. The record is stamped before the new node is
    /// linked, so a failure leaves the chain untouched.
    pub fn insert(
        &mut self,
        store: &BlockStore,
        free_list: &mut FreeList,
        key: u64,
        record: RecordRef,
    ) -> Result<u64> {
        let release = match self.slots.binary_search_by_key(&key, |slot| slot.key) {
            Ok(idx) => {
                let chain = collect_chain::<ReleaseNode>(store, self.slots[idx].head)?;
                let (tail_ref, mut tail) = chain.last().copied().ok_or_else(|| {
                    DuoError::Corruption(format!("key1 {} has an empty release chain", key))
                })?;

                let release = tail.release.checked_add(1).ok_or_else(|| {
                    DuoError::Corruption(format!("key1 {} release counter overflow", key))
                })?;
                stamp_release(store, record, release)?;

                let node = ReleaseNode {
                    release,
                    record,
                    next: ReleaseRef::NIL,
                };
                let node_ref = store.alloc(&node, free_list)?;

                tail.next = node_ref;
                if let Err(e) = store.rewrite_block(tail_ref, &tail) {
                    store.release::<ReleaseNode>(node_ref, free_list);
                    return Err(e);
                }
                release
            }
            Err(pos) => {
                self.reserve_slot()?;
                stamp_release(store, record, 0)?;

                let node = ReleaseNode {
                    release: 0,
                    record,
                    next: ReleaseRef::NIL,
                };
                let node_ref = store.alloc(&node, free_list)?;
                self.slots.insert(pos, Ks1Slot { key, head: node_ref });
                0
            }
        };

        debug!(key1 = key, release, %record, "KS1 insert");
        Ok(release)
    }

    /// Remove `key`'s releases
    ///
    /// With `all_releases` every node is freed and the slot removed. Without
    /// it only the newest release is dropped (insert rollback); a key with a
    /// single release is removed entirely.
    pub fn delete_key(
        &mut self,
        store: &BlockStore,
        free_list: &mut FreeList,
        key: u64,
        all_releases: bool,
    ) -> Result<()> {
        let idx = self
            .find_key_idx(key)
            .ok_or_else(|| DuoError::KeyNotFound(format!("key1 {} not in KS1", key)))?;
        let chain = collect_chain::<ReleaseNode>(store, self.slots[idx].head)?;

        if all_releases || chain.len() <= 1 {
            self.slots.remove(idx);
            for (node_ref, _) in &chain {
                store.release::<ReleaseNode>(*node_ref, free_list);
            }
            self.maybe_shrink();
            debug!(key1 = key, releases = chain.len(), "KS1 key removed");
            return Ok(());
        }

        let (tail_ref, tail) = chain[chain.len() - 1];
        let (prev_ref, mut prev) = chain[chain.len() - 2];
        prev.next = ReleaseRef::NIL;
        store.rewrite_block(prev_ref, &prev)?;
        store.release::<ReleaseNode>(tail_ref, free_list);

        debug!(key1 = key, release = tail.release, "KS1 newest release removed");
        Ok(())
    }

    /// Unlink the release of `key` that owns `record`
    ///
    /// Neighbours are relinked; the slot disappears with its last release.
    /// Returns the removed release number, or `None` if no node under `key`
    /// points at `record`.
    pub fn unlink_record(
        &mut self,
        store: &BlockStore,
        free_list: &mut FreeList,
        key: u64,
        record: RecordRef,
    ) -> Result<Option<u64>> {
        let Some(idx) = self.find_key_idx(key) else {
            return Ok(None);
        };
        let chain = collect_chain::<ReleaseNode>(store, self.slots[idx].head)?;
        let Some(pos) = chain.iter().position(|(_, node)| node.record == record) else {
            return Ok(None);
        };
        let (node_ref, node) = chain[pos];

        if pos == 0 {
            match node.next.get() {
                Some(next) => self.slots[idx].head = next,
                None => {
                    self.slots.remove(idx);
                    self.maybe_shrink();
                }
            }
        } else {
            let (prev_ref, mut prev) = chain[pos - 1];
            prev.next = node.next;
            store.rewrite_block(prev_ref, &prev)?;
        }
        store.release::<ReleaseNode>(node_ref, free_list);

        debug!(key1 = key, release = node.release, %record, "KS1 release unlinked");
        Ok(Some(node.release))
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Make room for one more slot or fail under a fixed capacity
    fn reserve_slot(&mut self) -> Result<()> {
        match self.policy {
            CapacityPolicy::Fixed => {
                if self.slots.len() >= self.capacity {
                    return Err(DuoError::CapacityExhausted {
                        index: "KS1",
                        capacity: self.capacity,
                    });
                }
            }
            CapacityPolicy::Threshold => {
                if self.slots.len() + 1 >= self.capacity {
                    let grown = self.capacity.max(1) * 2;
                    debug!(from = self.capacity, to = grown, "KS1 grow");
                    self.capacity = grown;
                    self.slots.reserve(grown - self.slots.len());
                }
            }
        }
        Ok(())
    }

    fn maybe_shrink(&mut self) {
        if self.policy != CapacityPolicy::Threshold {
            return;
        }
        let halved = self.capacity / 2;
        if self.slots.len() < halved && halved >= MIN_GROWABLE_CAPACITY {
            debug!(from = self.capacity, to = halved, "KS1 shrink");
            self.capacity = halved;
            self.slots.shrink_to(halved);
        }
    }
}

/// Write the assigned release into the record block
fn stamp_release(store: &BlockStore, record: RecordRef, release: u64) -> Result<()> {
    let mut stored: Record = store.read_block(record)?;
    stored.release = release;
    store.rewrite_block(record, &stored)
}
