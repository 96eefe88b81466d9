//! Engine Module
//!
//! The item engine that coordinates the data file and both indexes.
//!
//! ## Responsibilities
//! - Insert records under (key1, key2), assigning releases
//! - Keep key2 unique across the whole table
//! - Find by key1 (all releases or one), key2, or the composite key
//! - Delete by key1 (all releases or one), key2, or the composite key
//! - Persist the directory and free list according to `SyncStrategy`
//!
//! ## Failure Model
//! Inserts compensate: if anything after the KS1 step fails, the release
//! just added is rolled back. Deletes locate their targets first and then
//! mutate without compensation; an I/O error part-way leaves the completed
//! steps applied. A counterpart structure that is already missing (e.g. no
//! KS2 entry for a release) is logged and the delete carries on.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::block::{BlockRef, BlockStore, FileKind, RecordRef};
use crate::config::{Config, SyncStrategy};
use crate::error::{DuoError, Result};
use crate::freelist::FreeList;
use crate::record::{Key2, Record};
use crate::table::{Counters, Table, TableLayout};

/// Which records an operation addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Every release under a numeric key
    Key1(u64),

    /// The single record holding a string key
    Key2(Key2),

    /// A string key that must belong to the given numeric key
    Composite(u64, Key2),

    /// One release of a numeric key
    Release(u64, u64),
}

impl Lookup {
    /// Build a lookup from optional keys; at least one is required
    pub fn from_parts(key1: Option<u64>, key2: Option<Key2>) -> Result<Self> {
        match (key1, key2) {
            (Some(k1), Some(k2)) => Ok(Lookup::Composite(k1, k2)),
            (None, Some(k2)) => Ok(Lookup::Key2(k2)),
            (Some(k1), None) => Ok(Lookup::Key1(k1)),
            (None, None) => Err(DuoError::InvalidKey("no key provided".to_string())),
        }
    }

    pub fn key1(&self) -> Option<u64> {
        match self {
            Lookup::Key1(k1) | Lookup::Composite(k1, _) | Lookup::Release(k1, _) => Some(*k1),
            Lookup::Key2(_) => None,
        }
    }

    pub fn key2(&self) -> Option<&Key2> {
        match self {
            Lookup::Key2(k2) | Lookup::Composite(_, k2) => Some(k2),
            Lookup::Key1(_) | Lookup::Release(..) => None,
        }
    }
}

/// The main item engine
///
/// ## Concurrency Model
/// The directory and free list sit behind one mutex, so every operation
/// runs alone from start to finish. Files are opened per call; nothing is
/// held open between operations. Only one process may use a data directory.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// File access for all block files
    store: BlockStore,

    /// Directory + free list (exclusive access per operation)
    state: Mutex<EngineState>,
}

/// Mutable state owned by the running engine
struct EngineState {
    table: Table,
    free_list: FreeList,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Load the table directory (or create a fresh table)
    /// 3. Load the free list
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store = BlockStore::open(&config.data_dir, config.sync_writes)?;
        let table = Table::init(&store, &TableLayout::from(&config))?;
        let free_list = FreeList::load(&store.path(FileKind::FreeList))?;

        let counters = table.counters();
        info!(
            data_dir = %config.data_dir.display(),
            keys = counters.csize1,
            free_blocks = free_list.len(),
            "Engine opened"
        );

        Ok(Self {
            config,
            store,
            state: Mutex::new(EngineState { table, free_list }),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Item Operations
    // =========================================================================

    /// Store a new record and index it
    ///
    /// Returns the record as stored, with its assigned release. If indexing
    /// fails the record block is released again.
    pub fn insert(&self, key1: u64, key2: &str, num1: f32, num2: f32, note: &str) -> Result<Record> {
        let key2 = Key2::new(key2)?;
        let record = Record::new(key1, key2, num1, num2, note)?;

        self.mutate(move |state, store| {
            let record_ref = store.alloc(&record, &mut state.free_list)?;
            match state.insert_item(store, key1, &key2, record_ref) {
                Ok(release) => Ok(Record { release, ..record }),
                Err(e) => {
                    store.release::<Record>(record_ref, &mut state.free_list);
                    Err(e)
                }
            }
        })
    }

    /// Write a record block without indexing it
    ///
    /// The caller owns the returned reference until it is passed to
    /// `insert_item`.
    pub fn write_record(&self, record: &Record) -> Result<RecordRef> {
        self.mutate(|state, store| store.alloc(record, &mut state.free_list))
    }

    /// Index an already written record under (key1, key2)
    ///
    /// Returns the assigned release. A record already holding `key2` is
    /// deleted entirely first. The record must not be indexed already nor
    /// sit on the free list.
    pub fn insert_item(&self, key1: u64, key2: &Key2, record: RecordRef) -> Result<u64> {
        self.mutate(|state, store| {
            if state.free_list.contains(record.offset(), FileKind::Data) {
                return Err(DuoError::InvalidRecord(format!("record {} is a free block", record)));
            }
            if let Some((_, entry)) = state.table.secondary().find(store, key2)? {
                if entry.record == record {
                    return Err(DuoError::InvalidRecord(format!(
                        "record {} is already indexed under {}",
                        record, key2
                    )));
                }
            }

            let stored: Record = store.read_block(record)?;
            if stored.key1 != key1 || stored.key2 != *key2 {
                return Err(DuoError::InvalidRecord(format!(
                    "record {} holds ({}, {}), not ({}, {})",
                    record, stored.key1, stored.key2, key1, key2
                )));
            }
            state.insert_item(store, key1, key2, record)
        })
    }

    /// Find records
    ///
    /// With a key2 the lookup goes through KS2 only. With only a key1 every
    /// release is returned, oldest first; with a key1 and a release just that
    /// one. Nothing found is an empty vector.
    pub fn find_item(&self, lookup: &Lookup) -> Result<Vec<Record>> {
        let state = self.state.lock();
        let store = &self.store;

        match lookup {
            Lookup::Key2(key2) | Lookup::Composite(_, key2) => {
                let Some((_, entry)) = state.table.secondary().find(store, key2)? else {
                    return Ok(Vec::new());
                };
                let record: Record = store.read_block(entry.record)?;
                if let Lookup::Composite(key1, _) = lookup {
                    if record.key1 != *key1 {
                        warn!(
                            key1,
                            key2 = %key2,
                            owner = record.key1,
                            "key2 belongs to a different key1"
                        );
                    }
                }
                Ok(vec![record])
            }
            Lookup::Release(key1, release) => {
                match state.table.primary().find_release(store, *key1, *release)? {
                    Some((_, node)) => Ok(vec![store.read_block::<Record>(node.record)?]),
                    None => Ok(Vec::new()),
                }
            }
            Lookup::Key1(key1) => state
                .table
                .primary()
                .releases(store, *key1)?
                .into_iter()
                .map(|(_, node)| store.read_block::<Record>(node.record))
                .collect(),
        }
    }

    /// Delete records, returning how many were removed
    ///
    /// A key1-only lookup removes every release with its KS2 entries.
    pub fn delete_item(&self, lookup: &Lookup) -> Result<usize> {
        self.mutate(|state, store| match lookup {
            Lookup::Key1(key1) => state.delete_by_key1(store, *key1),
            Lookup::Key2(key2) => state.delete_by_key2(store, None, key2),
            Lookup::Composite(key1, key2) => state.delete_by_key2(store, Some(*key1), key2),
            Lookup::Release(key1, release) => state.delete_release(store, *key1, *release),
        })
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save the table directory and the free list
    pub fn save(&self) -> Result<()> {
        let state = self.state.lock();
        self.persist(&state)
    }

    /// Close the engine, saving everything
    pub fn close(self) -> Result<()> {
        self.save()?;
        info!(data_dir = %self.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    fn persist(&self, state: &EngineState) -> Result<()> {
        state.table.save(&self.store.path(FileKind::Directory))?;
        state.free_list.save(&self.store.path(FileKind::FreeList))?;
        Ok(())
    }

    /// Run a mutating operation under the lock, then persist per strategy
    ///
    /// State is persisted even when the operation failed: the directory
    /// must describe whatever sub-steps already hit the files.
    fn mutate<R>(&self, op: impl FnOnce(&mut EngineState, &BlockStore) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        let result = op(&mut state, &self.store);

        if self.config.sync_strategy == SyncStrategy::EveryMutation {
            if let Err(persist_err) = self.persist(&state) {
                if result.is_ok() {
                    return Err(persist_err);
                }
                error!(error = %persist_err, "Failed to persist after a failed operation");
            }
        }
        result
    }

    // =========================================================================
    // Accessors (for inspection and testing)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `csize1`, `msize1`, `csize2`, `msize2`
    pub fn counters(&self) -> Counters {
        self.state.lock().table.counters()
    }

    /// Copy of the in-memory directory
    pub fn table(&self) -> Table {
        self.state.lock().table.clone()
    }

    /// Most releases held by any single key1
    pub fn max_releases(&self) -> Result<usize> {
        self.state.lock().table.primary().max_releases(&self.store)
    }

    /// Number of free blocks of `kind`
    pub fn free_blocks(&self, kind: FileKind) -> usize {
        self.state.lock().free_list.count_of(kind)
    }

    /// Total number of free blocks
    pub fn free_block_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Whether the block at `offset` of `kind` is on the free list
    pub fn is_free(&self, kind: FileKind, offset: u64) -> bool {
        self.state.lock().free_list.contains(offset, kind)
    }

    /// Current length of a table file
    pub fn file_len(&self, kind: FileKind) -> Result<u64> {
        self.store.file_len(kind)
    }

    /// Data-file location of the record holding `key2`
    pub fn record_ref(&self, key2: &Key2) -> Result<Option<RecordRef>> {
        let state = self.state.lock();
        Ok(state
            .table
            .secondary()
            .find(&self.store, key2)?
            .map(|(_, entry)| entry.record))
    }

    /// Every record, by key1 then release
    pub fn scan(&self) -> Result<Vec<Record>> {
        let state = self.state.lock();
        let primary = state.table.primary();

        let mut records = Vec::new();
        for slot in primary.slots() {
            for (_, node) in primary.releases(&self.store, slot.key)? {
                records.push(self.store.read_block::<Record>(node.record)?);
            }
        }
        Ok(records)
    }
}

impl EngineState {
    fn insert_item(
        &mut self,
        store: &BlockStore,
        key1: u64,
        key2: &Key2,
        record: RecordRef,
    ) -> Result<u64> {
        let release = self
            .table
            .primary_mut()
            .insert(store, &mut self.free_list, key1, record)?;

        if let Err(e) = self.displace_key2(store, key2, record) {
            self.rollback_release(store, key1);
            return Err(e);
        }

        if let Err(e) = self
            .table
            .secondary_mut()
            .insert(store, &mut self.free_list, key2, record)
        {
            self.rollback_release(store, key1);
            return Err(e);
        }

        debug!(key1, key2 = %key2, release, %record, "Item inserted");
        Ok(release)
    }

    /// Delete whatever record currently holds `key2`, unless it is `record`
    fn displace_key2(&mut self, store: &BlockStore, key2: &Key2, record: RecordRef) -> Result<()> {
        let Some((_, entry)) = self.table.secondary().find(store, key2)? else {
            return Ok(());
        };
        if entry.record == record {
            return Ok(());
        }

        let previous: Record = store.read_block(entry.record)?;
        self.delete_by_key2(store, Some(previous.key1), key2)?;
        warn!(
            key2 = %key2,
            previous_key1 = previous.key1,
            previous_release = previous.release,
            "Deleted previous record holding the same key2"
        );
        Ok(())
    }

    /// Drop the newest release of `key1` after a failed insert
    fn rollback_release(&mut self, store: &BlockStore, key1: u64) {
        match self
            .table
            .primary_mut()
            .delete_key(store, &mut self.free_list, key1, false)
        {
            Ok(()) => debug!(key1, "Rolled back newest release"),
            Err(e) => error!(key1, error = %e, "Rollback of newest release failed"),
        }
    }

    fn delete_by_key2(&mut self, store: &BlockStore, key1: Option<u64>, key2: &Key2) -> Result<usize> {
        let (_, entry) = self
            .table
            .secondary()
            .find(store, key2)?
            .ok_or_else(|| DuoError::KeyNotFound(format!("key2 {:?}", key2.as_str())))?;
        let record: Record = store.read_block(entry.record)?;

        if let Some(key1) = key1 {
            if key1 != record.key1 {
                return Err(DuoError::KeyNotFound(format!(
                    "({}, {:?}): key2 belongs to key1 {}",
                    key1,
                    key2.as_str(),
                    record.key1
                )));
            }
        }

        let unlinked = self.table.primary_mut().unlink_record(
            store,
            &mut self.free_list,
            record.key1,
            entry.record,
        )?;
        if unlinked.is_none() {
            warn!(
                key1 = record.key1,
                key2 = %key2,
                record = %entry.record,
                "No release node points at the record; removing KS2 entry and record only"
            );
        }

        self.table
            .secondary_mut()
            .delete_key(store, &mut self.free_list, key2)?;
        store.release::<Record>(entry.record, &mut self.free_list);

        debug!(key1 = record.key1, key2 = %key2, release = record.release, "Item deleted");
        Ok(1)
    }

    fn delete_release(&mut self, store: &BlockStore, key1: u64, release: u64) -> Result<usize> {
        let (_, node) = self
            .table
            .primary()
            .find_release(store, key1, release)?
            .ok_or_else(|| DuoError::KeyNotFound(format!("key1 {} release {}", key1, release)))?;
        let record: Record = store.read_block(node.record)?;
        self.delete_by_key2(store, Some(key1), &record.key2)
    }

    fn delete_by_key1(&mut self, store: &BlockStore, key1: u64) -> Result<usize> {
        let releases = self.table.primary().releases(store, key1)?;
        if releases.is_empty() {
            return Err(DuoError::KeyNotFound(format!("key1 {}", key1)));
        }

        let mut records = Vec::with_capacity(releases.len());
        for (_, node) in &releases {
            let record: Record = store.read_block(node.record)?;
            records.push((node.record, record));
        }

        for (record_ref, record) in &records {
            let owned = matches!(
                self.table.secondary().find(store, &record.key2)?,
                Some((_, entry)) if entry.record == *record_ref
            );
            if owned {
                self.table
                    .secondary_mut()
                    .delete_key(store, &mut self.free_list, &record.key2)?;
            } else {
                warn!(
                    key1,
                    key2 = %record.key2,
                    release = record.release,
                    "KS2 entry missing for release; removing release and record only"
                );
            }
            store.release::<Record>(*record_ref, &mut self.free_list);
        }

        self.table
            .primary_mut()
            .delete_key(store, &mut self.free_list, key1, true)?;

        debug!(key1, releases = records.len(), "All releases deleted");
        Ok(records.len())
    }
}
