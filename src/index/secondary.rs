//! Secondary Index (KS2)
//!
//! Separate-chaining hash table from string key to record. The bucket-head
//! array lives in the directory; chain entries live in `ks2.bin`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::{self, Block, BlockStore, EntryRef, FileKind, RecordRef};
use crate::config::{CapacityPolicy, HashStrategy, MIN_GROWABLE_CAPACITY};
use crate::error::{DuoError, Result};
use crate::freelist::FreeList;
use crate::record::Key2;

use super::{collect_chain, Chain, ChainNode};

/// Encoded size of a hash entry: key (1 + 8) + record (8) + next (8)
pub const HASH_ENTRY_SIZE: usize = 25;

/// Load factor at or above which a growable table doubles
const GROW_LOAD: f64 = 0.75;

/// Load factor at or below which a growable table halves
const SHRINK_LOAD: f64 = 0.25;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl HashStrategy {
    /// Hash a key's bytes
    pub fn hash(self, key: &[u8]) -> u64 {
        match self {
            HashStrategy::ByteSum => key.iter().map(|&b| b as u64).sum(),
            HashStrategy::Fnv1a => key.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
                (hash ^ b as u64).wrapping_mul(FNV_PRIME)
            }),
        }
    }

    /// Bucket index for `key` among `buckets`
    pub fn bucket(self, key: &Key2, buckets: usize) -> usize {
        (self.hash(key.as_bytes()) % buckets as u64) as usize
    }
}

/// One entry in a KS2 chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    pub key: Key2,
    pub record: RecordRef,
    pub next: EntryRef,
}

impl Block for HashEntry {
    const KIND: FileKind = FileKind::HashEntries;
    const SIZE: usize = HASH_ENTRY_SIZE;
    type Ref = EntryRef;

    fn encode(&self) -> Result<Vec<u8>> {
        block::encode_fixed(self, Self::SIZE)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        block::decode_fixed(bytes, Self::SIZE)
    }
}

impl ChainNode for HashEntry {
    fn next(&self) -> EntryRef {
        self.next
    }
}

/// KS2: string key → record
///
/// `buckets.len()` is `msize2`; `occupied` counts non-empty buckets
/// (`csize2`).
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryIndex {
    buckets: Vec<EntryRef>,
    occupied: usize,
    hash: HashStrategy,
    policy: CapacityPolicy,
}

impl SecondaryIndex {
    /// Empty index with `buckets` buckets
    pub fn new(buckets: usize, hash: HashStrategy, policy: CapacityPolicy) -> Self {
        Self {
            buckets: vec![EntryRef::NIL; buckets],
            occupied: 0,
            hash,
            policy,
        }
    }

    /// Rebuild from a snapshot, checking the occupancy counter
    pub(crate) fn from_parts(
        buckets: Vec<EntryRef>,
        occupied: usize,
        hash: HashStrategy,
        policy: CapacityPolicy,
    ) -> Result<Self> {
        if buckets.is_empty() {
            return Err(DuoError::Corruption("KS2 has no buckets".to_string()));
        }
        let actual = buckets.iter().filter(|head| !head.is_nil()).count();
        if actual != occupied {
            return Err(DuoError::Corruption(format!(
                "KS2 counter says {} occupied buckets, found {}",
                occupied, actual
            )));
        }
        Ok(Self {
            buckets,
            occupied,
            hash,
            policy,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Bucket count (`msize2`)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Non-empty buckets (`csize2`)
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn hash_strategy(&self) -> HashStrategy {
        self.hash
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Bucket heads
    pub fn buckets(&self) -> &[EntryRef] {
        &self.buckets
    }

    /// Bucket `key` hashes to
    pub fn find_key_idx(&self, key: &Key2) -> usize {
        self.hash.bucket(key, self.buckets.len())
    }

    /// Look up the entry for `key`
    pub fn find(&self, store: &BlockStore, key: &Key2) -> Result<Option<(EntryRef, HashEntry)>> {
        let head = self.buckets[self.find_key_idx(key)];
        for item in Chain::<HashEntry>::new(store, head)? {
            let (entry_ref, entry) = item?;
            if entry.key == *key {
                return Ok(Some((entry_ref, entry)));
            }
        }
        Ok(None)
    }

    /// Every entry in bucket order
    pub fn entries(&self, store: &BlockStore) -> Result<Vec<(EntryRef, HashEntry)>> {
        let mut all = Vec::new();
        for head in &self.buckets {
            all.extend(collect_chain::<HashEntry>(store, *head)?);
        }
        Ok(all)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Map `key` to `record`
    ///
    /// An existing entry for `key` is repointed in place and its previous
    /// record returned; otherwise a new entry is appended to the bucket chain.
    pub fn insert(
        &mut self,
        store: &BlockStore,
        free_list: &mut FreeList,
        key: &Key2,
        record: RecordRef,
    ) -> Result<Option<RecordRef>> {
        if self.policy == CapacityPolicy::Threshold
            && self.occupied as f64 / self.buckets.len() as f64 >= GROW_LOAD
        {
            self.resize(store, self.buckets.len() * 2)?;
        }

        let idx = self.find_key_idx(key);
        let head = self.buckets[idx];
        let entry = HashEntry {
            key: *key,
            record,
            next: EntryRef::NIL,
        };

        if head.is_nil() {
            self.buckets[idx] = store.alloc(&entry, free_list)?;
            self.occupied += 1;
            debug!(key2 = %key, bucket = idx, %record, "KS2 insert (new bucket)");
            return Ok(None);
        }

        let mut tail = None;
        for item in Chain::<HashEntry>::new(store, head)? {
            let (entry_ref, mut existing) = item?;
            if existing.key == *key {
                let previous = existing.record;
                existing.record = record;
                store.rewrite_block(entry_ref, &existing)?;
                debug!(key2 = %key, %previous, %record, "KS2 entry repointed");
                return Ok(Some(previous));
            }
            tail = Some((entry_ref, existing));
        }

        let (tail_ref, mut tail) = tail.ok_or_else(|| {
            DuoError::Corruption(format!("KS2 bucket {} has an empty chain", idx))
        })?;
        let entry_ref = store.alloc(&entry, free_list)?;
        tail.next = entry_ref;
        store.rewrite_block(tail_ref, &tail)?;

        debug!(key2 = %key, bucket = idx, %record, "KS2 insert (chained)");
        Ok(None)
    }

    /// Remove the entry for `key`, returning it
    pub fn delete_key(
        &mut self,
        store: &BlockStore,
        free_list: &mut FreeList,
        key: &Key2,
    ) -> Result<HashEntry> {
        let idx = self.find_key_idx(key);
        let head = self.buckets[idx];

        let mut prev: Option<(EntryRef, HashEntry)> = None;
        for item in Chain::<HashEntry>::new(store, head)? {
            let (entry_ref, entry) = item?;
            if entry.key != *key {
                prev = Some((entry_ref, entry));
                continue;
            }

            match prev {
                None => {
                    self.buckets[idx] = entry.next;
                    if entry.next.is_nil() {
                        self.occupied -= 1;
                    }
                }
                Some((prev_ref, mut prev_entry)) => {
                    prev_entry.next = entry.next;
                    store.rewrite_block(prev_ref, &prev_entry)?;
                }
            }
            store.release::<HashEntry>(entry_ref, free_list);
            debug!(key2 = %key, bucket = idx, "KS2 entry removed");

            self.maybe_shrink(store)?;
            return Ok(entry);
        }

        Err(DuoError::KeyNotFound(format!("key2 {:?} not in KS2", key.as_str())))
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    fn maybe_shrink(&mut self, store: &BlockStore) -> Result<()> {
        if self.policy != CapacityPolicy::Threshold {
            return Ok(());
        }
        let halved = self.buckets.len() / 2;
        if halved >= MIN_GROWABLE_CAPACITY
            && self.occupied as f64 / self.buckets.len() as f64 <= SHRINK_LOAD
        {
            self.resize(store, halved)?;
        }
        Ok(())
    }

    /// Rehash every entry into `bucket_count` buckets
    ///
    /// Entries keep their offsets; only their `next` links are rewritten.
    /// Does not go through `insert`, so it cannot trigger itself.
    fn resize(&mut self, store: &BlockStore, bucket_count: usize) -> Result<()> {
        let entries = self.entries(store)?;

        let mut buckets = vec![EntryRef::NIL; bucket_count];
        for (entry_ref, mut entry) in entries {
            let idx = self.hash.bucket(&entry.key, bucket_count);
            entry.next = buckets[idx];
            buckets[idx] = entry_ref;
            store.rewrite_block(entry_ref, &entry)?;
        }

        let from = self.buckets.len();
        self.occupied = buckets.iter().filter(|head| !head.is_nil()).count();
        self.buckets = buckets;

        info!(from, to = bucket_count, occupied = self.occupied, "KS2 rehashed");
        Ok(())
    }
}
