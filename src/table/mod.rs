//! Table Directory Module
//!
//! The root structure: KS1 slots, KS2 bucket heads and their counters,
//! saved and loaded as one snapshot (`table.bin`).
//!
//! ## Responsibilities
//! - Create an empty table (and empty data files) on first run
//! - Load the snapshot on startup, recreating it if missing or undersized
//! - Overwrite the snapshot wholesale on save
//!
//! ## Snapshot Body (bincode, after the common header)
//! ```text
//! hash strategy | capacity policy
//! msize1 | csize1 | slots[msize1]   (unused positions hold Ks1Slot::EMPTY)
//! msize2 | csize2 | buckets[msize2]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::block::{BlockStore, EntryRef, FileKind};
use crate::codec::{self, SnapshotRead};
use crate::config::{CapacityPolicy, Config, HashStrategy};
use crate::error::{DuoError, Result};
use crate::index::{Ks1Slot, PrimaryIndex, SecondaryIndex};

/// Magic bytes identifying a directory snapshot
const MAGIC: &[u8; 4] = b"DKTB";

/// Body size of a snapshot with no slots and no buckets:
/// two enum tags (4 + 4), four counters (4 × 8), two vector lengths (2 × 8)
const MIN_BODY_SIZE: usize = 56;

/// Shape of a fresh table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub ks1_capacity: usize,
    pub ks2_buckets: usize,
    pub capacity_policy: CapacityPolicy,
    pub hash_strategy: HashStrategy,
}

impl From<&Config> for TableLayout {
    fn from(config: &Config) -> Self {
        Self {
            ks1_capacity: config.ks1_capacity,
            ks2_buckets: config.ks2_buckets,
            capacity_policy: config.capacity_policy,
            hash_strategy: config.hash_strategy,
        }
    }
}

/// Occupancy and capacity of both indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Live KS1 slots
    pub csize1: usize,
    /// KS1 slot capacity
    pub msize1: usize,
    /// Non-empty KS2 buckets
    pub csize2: usize,
    /// KS2 bucket count
    pub msize2: usize,
}

impl Counters {
    /// Fraction of KS2 buckets holding at least one entry
    pub fn ks2_load(&self) -> f64 {
        if self.msize2 == 0 {
            return 0.0;
        }
        self.csize2 as f64 / self.msize2 as f64
    }
}

#[derive(Serialize, Deserialize)]
struct DirectorySnapshot {
    hash: HashStrategy,
    policy: CapacityPolicy,
    msize1: u64,
    csize1: u64,
    slots: Vec<Ks1Slot>,
    msize2: u64,
    csize2: u64,
    buckets: Vec<EntryRef>,
}

/// The table directory
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    primary: PrimaryIndex,
    secondary: SecondaryIndex,
}

impl Table {
    /// Empty table in memory only
    pub fn new(layout: &TableLayout) -> Self {
        Self {
            primary: PrimaryIndex::new(layout.ks1_capacity, layout.capacity_policy),
            secondary: SecondaryIndex::new(
                layout.ks2_buckets,
                layout.hash_strategy,
                layout.capacity_policy,
            ),
        }
    }

    /// Load the table behind `store`, or create a fresh one
    ///
    /// A missing or undersized snapshot means the other files cannot be
    /// trusted either: they are truncated and an empty table is saved.
    /// An existing snapshot keeps its own layout; `layout` only shapes new
    /// tables.
    pub fn init(store: &BlockStore, layout: &TableLayout) -> Result<Self> {
        let path = store.path(FileKind::Directory);

        match codec::read_snapshot(&path, MAGIC, MIN_BODY_SIZE)? {
            SnapshotRead::Body(body) => {
                let table = Self::decode(&body)?;
                info!(
                    path = %path.display(),
                    keys = table.primary.len(),
                    buckets = table.secondary.bucket_count(),
                    "Loaded table directory"
                );
                Ok(table)
            }
            SnapshotRead::Missing => {
                info!(path = %path.display(), "No table directory, creating new table");
                Self::create(store, layout)
            }
            SnapshotRead::Undersized(len) => {
                warn!(path = %path.display(), len, "Table directory too small or corrupted, creating new table");
                Self::create(store, layout)
            }
        }
    }

    fn create(store: &BlockStore, layout: &TableLayout) -> Result<Self> {
        store.reset()?;
        let table = Self::new(layout);
        table.save(&store.path(FileKind::Directory))?;
        Ok(table)
    }

    /// Overwrite the snapshot at `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = self.encode()?;
        codec::write_snapshot(path, MAGIC, &body, false)?;
        debug!(path = %path.display(), bytes = body.len(), "Saved table directory");
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut slots = Vec::with_capacity(self.primary.capacity());
        slots.extend_from_slice(self.primary.slots());
        slots.resize(self.primary.capacity(), Ks1Slot::EMPTY);

        let snapshot = DirectorySnapshot {
            hash: self.secondary.hash_strategy(),
            policy: self.primary.policy(),
            msize1: self.primary.capacity() as u64,
            csize1: self.primary.len() as u64,
            slots,
            msize2: self.secondary.bucket_count() as u64,
            csize2: self.secondary.occupied() as u64,
            buckets: self.secondary.buckets().to_vec(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut snapshot: DirectorySnapshot = bincode::deserialize(body)?;

        let msize1 = snapshot.msize1 as usize;
        let csize1 = snapshot.csize1 as usize;
        if snapshot.slots.len() != msize1 || csize1 > msize1 {
            return Err(DuoError::Corruption(format!(
                "directory has {} slots for msize1 {} / csize1 {}",
                snapshot.slots.len(),
                msize1,
                csize1
            )));
        }
        if snapshot.buckets.len() as u64 != snapshot.msize2 {
            return Err(DuoError::Corruption(format!(
                "directory has {} buckets for msize2 {}",
                snapshot.buckets.len(),
                snapshot.msize2
            )));
        }

        snapshot.slots.truncate(csize1);
        let primary = PrimaryIndex::from_parts(snapshot.slots, msize1, snapshot.policy)?;
        let secondary = SecondaryIndex::from_parts(
            snapshot.buckets,
            snapshot.csize2 as usize,
            snapshot.hash,
            snapshot.policy,
        )?;

        Ok(Self { primary, secondary })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn primary(&self) -> &PrimaryIndex {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut PrimaryIndex {
        &mut self.primary
    }

    pub fn secondary(&self) -> &SecondaryIndex {
        &self.secondary
    }

    pub fn secondary_mut(&mut self) -> &mut SecondaryIndex {
        &mut self.secondary
    }

    /// `csize1`, `msize1`, `csize2`, `msize2`
    pub fn counters(&self) -> Counters {
        Counters {
            csize1: self.primary.len(),
            msize1: self.primary.capacity(),
            csize2: self.secondary.occupied(),
            msize2: self.secondary.bucket_count(),
        }
    }
}
