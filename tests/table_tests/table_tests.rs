//! Tests for the table directory
//!
//! These tests verify:
//! - First-run creation of the table files
//! - Save/init round-trip of slots, buckets and counters
//! - Undersized snapshots trigger a fresh table
//! - Checksum and magic validation
//! - Stored layout wins over the requested layout
//! - KS2 load factor

use std::fs;

use duokv::block::{BlockStore, FileKind};
use duokv::config::{CapacityPolicy, HashStrategy};
use duokv::freelist::FreeList;
use duokv::record::{Key2, Record};
use duokv::table::{Counters, Table, TableLayout};
use duokv::DuoError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, BlockStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = BlockStore::open(temp_dir.path(), false).unwrap();
    (temp_dir, store)
}

fn layout(ks1_capacity: usize, ks2_buckets: usize) -> TableLayout {
    TableLayout {
        ks1_capacity,
        ks2_buckets,
        capacity_policy: CapacityPolicy::Fixed,
        hash_strategy: HashStrategy::ByteSum,
    }
}

/// Index one record under both keys
fn add(table: &mut Table, store: &BlockStore, free_list: &mut FreeList, key1: u64, key2: &str) {
    let key2 = Key2::new(key2).unwrap();
    let record = Record::new(key1, key2, 1.0, 2.0, "t").unwrap();
    let r = store.alloc(&record, free_list).unwrap();
    table.primary_mut().insert(store, free_list, key1, r).unwrap();
    table.secondary_mut().insert(store, free_list, &key2, r).unwrap();
}

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_init_creates_all_files() {
    let (_temp, store) = setup_temp_store();

    let table = Table::init(&store, &layout(16, 8)).unwrap();

    for kind in FileKind::ALL {
        assert!(store.path(kind).exists(), "{} missing", kind);
    }
    assert_eq!(
        table.counters(),
        Counters {
            csize1: 0,
            msize1: 16,
            csize2: 0,
            msize2: 8,
        }
    );
}

#[test]
fn test_init_undersized_directory_resets_files() {
    let (_temp, store) = setup_temp_store();
    store.reset().unwrap();
    store.write(FileKind::Data, &[7u8; 166], None).unwrap();
    fs::write(store.path(FileKind::Directory), b"tiny").unwrap();

    let table = Table::init(&store, &layout(16, 8)).unwrap();

    assert!(table.primary().is_empty());
    assert_eq!(store.file_len(FileKind::Data).unwrap(), 0);
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_save_then_init_reproduces_table() {
    let (_temp, store) = setup_temp_store();
    let mut free_list = FreeList::new();
    let mut table = Table::init(&store, &layout(16, 8)).unwrap();
    add(&mut table, &store, &mut free_list, 30, "x");
    add(&mut table, &store, &mut free_list, 10, "ab");
    add(&mut table, &store, &mut free_list, 10, "ba");
    add(&mut table, &store, &mut free_list, 20, "zzz");

    table.save(&store.path(FileKind::Directory)).unwrap();
    let loaded = Table::init(&store, &layout(16, 8)).unwrap();

    assert_eq!(loaded, table);
    assert_eq!(loaded.primary().slots(), table.primary().slots());
    assert_eq!(loaded.secondary().buckets(), table.secondary().buckets());
    assert_eq!(loaded.counters(), table.counters());
    assert_eq!(loaded.counters().csize1, 3);
}

#[test]
fn test_stored_layout_wins() {
    let (_temp, store) = setup_temp_store();
    Table::init(&store, &layout(16, 8)).unwrap();

    let requested = TableLayout {
        ks1_capacity: 64,
        ks2_buckets: 64,
        capacity_policy: CapacityPolicy::Threshold,
        hash_strategy: HashStrategy::Fnv1a,
    };
    let loaded = Table::init(&store, &requested).unwrap();

    assert_eq!(loaded.counters().msize1, 16);
    assert_eq!(loaded.counters().msize2, 8);
    assert_eq!(loaded.secondary().hash_strategy(), HashStrategy::ByteSum);
    assert_eq!(loaded.primary().policy(), CapacityPolicy::Fixed);
}

#[test]
fn test_snapshot_size_is_fixed_by_capacity() {
    let (_temp, store) = setup_temp_store();
    let mut free_list = FreeList::new();
    let mut table = Table::init(&store, &layout(16, 8)).unwrap();
    let path = store.path(FileKind::Directory);
    let empty_len = fs::metadata(&path).unwrap().len();

    add(&mut table, &store, &mut free_list, 1, "a");
    add(&mut table, &store, &mut free_list, 2, "b");
    table.save(&path).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), empty_len);
}

#[test]
fn test_ks2_load() {
    let counters = Counters {
        csize1: 0,
        msize1: 16,
        csize2: 6,
        msize2: 8,
    };
    assert_eq!(counters.ks2_load(), 0.75);

    let empty = Counters {
        msize2: 0,
        csize2: 0,
        ..counters
    };
    assert_eq!(empty.ks2_load(), 0.0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_checksum_mismatch_is_corruption() {
    let (_temp, store) = setup_temp_store();
    Table::init(&store, &layout(16, 8)).unwrap();
    let path = store.path(FileKind::Directory);

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    fs::write(&path, &bytes).unwrap();

    let result = Table::init(&store, &layout(16, 8));
    assert!(matches!(result, Err(DuoError::Corruption(_))));
}

#[test]
fn test_wrong_magic_is_corruption() {
    let (_temp, store) = setup_temp_store();
    Table::init(&store, &layout(16, 8)).unwrap();
    let path = store.path(FileKind::Directory);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    let result = Table::init(&store, &layout(16, 8));
    assert!(result.unwrap_err().is_corruption());
}
