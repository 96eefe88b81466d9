//! Tests for the secondary (KS2) index
//!
//! These tests verify:
//! - Insert/find through bucket chains
//! - In-place repointing of an existing key
//! - Collision chains under the byte-sum hash
//! - Occupancy counting on delete
//! - Threshold rehashing up and down

use duokv::block::{BlockStore, FileKind, RecordRef};
use duokv::config::{CapacityPolicy, HashStrategy};
use duokv::freelist::FreeList;
use duokv::index::{SecondaryIndex, HASH_ENTRY_SIZE};
use duokv::record::{Key2, Record};
use duokv::DuoError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, BlockStore, FreeList) {
    let temp_dir = TempDir::new().unwrap();
    let store = BlockStore::open(temp_dir.path(), false).unwrap();
    store.reset().unwrap();
    (temp_dir, store, FreeList::new())
}

fn key(s: &str) -> Key2 {
    Key2::new(s).unwrap()
}

fn write_record(store: &BlockStore, free_list: &mut FreeList, key2: &str) -> RecordRef {
    let record = Record::new(1, key(key2), 0.0, 0.0, "").unwrap();
    store.alloc(&record, free_list).unwrap()
}

fn insert(index: &mut SecondaryIndex, store: &BlockStore, free_list: &mut FreeList, key2: &str) -> RecordRef {
    let record = write_record(store, free_list, key2);
    index.insert(store, free_list, &key(key2), record).unwrap();
    record
}

fn found(index: &SecondaryIndex, store: &BlockStore, key2: &str) -> Option<RecordRef> {
    index.find(store, &key(key2)).unwrap().map(|(_, entry)| entry.record)
}

// =============================================================================
// Hash Tests
// =============================================================================

#[test]
fn test_byte_sum_is_order_insensitive() {
    let hash = HashStrategy::ByteSum;

    assert_eq!(hash.hash(b"ab"), 195);
    assert_eq!(hash.hash(b"ab"), hash.hash(b"ba"));
}

#[test]
fn test_fnv1a_known_value() {
    let hash = HashStrategy::Fnv1a;

    assert_eq!(hash.hash(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(hash.hash(b"a"), 0xaf63_dc4c_8601_ec8c);
    assert_ne!(hash.hash(b"ab"), hash.hash(b"ba"));
}

#[test]
fn test_bucket_within_range() {
    for s in ["a", "zz", "abcdefgh", "12345"] {
        assert!(HashStrategy::Fnv1a.bucket(&key(s), 7) < 7);
        assert!(HashStrategy::ByteSum.bucket(&key(s), 7) < 7);
    }
}

// =============================================================================
// Insert / Find Tests
// =============================================================================

#[test]
fn test_insert_and_find() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::Fnv1a, CapacityPolicy::Fixed);

    let record = insert(&mut index, &store, &mut free_list, "alpha");

    assert_eq!(found(&index, &store, "alpha"), Some(record));
    assert_eq!(index.occupied(), 1);
}

#[test]
fn test_find_missing() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::Fnv1a, CapacityPolicy::Fixed);
    insert(&mut index, &store, &mut free_list, "alpha");

    assert_eq!(found(&index, &store, "beta"), None);
}

#[test]
fn test_insert_existing_key_repoints_in_place() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::Fnv1a, CapacityPolicy::Fixed);
    let old = insert(&mut index, &store, &mut free_list, "alpha");
    let entries_len = store.file_len(FileKind::HashEntries).unwrap();

    let new = write_record(&store, &mut free_list, "alpha");
    let previous = index.insert(&store, &mut free_list, &key("alpha"), new).unwrap();

    assert_eq!(previous, Some(old));
    assert_eq!(found(&index, &store, "alpha"), Some(new));
    assert_eq!(store.file_len(FileKind::HashEntries).unwrap(), entries_len);
}

#[test]
fn test_anagrams_share_a_chain() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::ByteSum, CapacityPolicy::Fixed);

    let abc = insert(&mut index, &store, &mut free_list, "abc");
    let cab = insert(&mut index, &store, &mut free_list, "cab");
    let bca = insert(&mut index, &store, &mut free_list, "bca");

    assert_eq!(index.occupied(), 1);
    assert_eq!(index.find_key_idx(&key("abc")), index.find_key_idx(&key("bca")));
    assert_eq!(found(&index, &store, "abc"), Some(abc));
    assert_eq!(found(&index, &store, "cab"), Some(cab));
    assert_eq!(found(&index, &store, "bca"), Some(bca));
    assert_eq!(index.entries(&store).unwrap().len(), 3);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_returns_entry_and_frees_block() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::Fnv1a, CapacityPolicy::Fixed);
    let record = insert(&mut index, &store, &mut free_list, "alpha");

    let entry = index.delete_key(&store, &mut free_list, &key("alpha")).unwrap();

    assert_eq!(entry.record, record);
    assert_eq!(index.occupied(), 0);
    assert_eq!(found(&index, &store, "alpha"), None);
    assert_eq!(free_list.count_of(FileKind::HashEntries), 1);
}

#[test]
fn test_delete_chain_head_keeps_bucket_occupied() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::ByteSum, CapacityPolicy::Fixed);
    insert(&mut index, &store, &mut free_list, "ab");
    let ba = insert(&mut index, &store, &mut free_list, "ba");

    index.delete_key(&store, &mut free_list, &key("ab")).unwrap();

    assert_eq!(index.occupied(), 1);
    assert_eq!(found(&index, &store, "ba"), Some(ba));

    index.delete_key(&store, &mut free_list, &key("ba")).unwrap();
    assert_eq!(index.occupied(), 0);
}

#[test]
fn test_delete_middle_of_chain() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::ByteSum, CapacityPolicy::Fixed);
    let abc = insert(&mut index, &store, &mut free_list, "abc");
    insert(&mut index, &store, &mut free_list, "cab");
    let bca = insert(&mut index, &store, &mut free_list, "bca");

    index.delete_key(&store, &mut free_list, &key("cab")).unwrap();

    assert_eq!(found(&index, &store, "abc"), Some(abc));
    assert_eq!(found(&index, &store, "cab"), None);
    assert_eq!(found(&index, &store, "bca"), Some(bca));
    assert_eq!(index.entries(&store).unwrap().len(), 2);
}

#[test]
fn test_delete_missing_key() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(16, HashStrategy::ByteSum, CapacityPolicy::Fixed);
    insert(&mut index, &store, &mut free_list, "ab");

    let result = index.delete_key(&store, &mut free_list, &key("ba"));

    assert!(matches!(result, Err(DuoError::KeyNotFound(_))));
    assert_eq!(index.occupied(), 1);
}

#[test]
fn test_fixed_buckets_never_resize() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(4, HashStrategy::Fnv1a, CapacityPolicy::Fixed);

    for i in 0..32 {
        insert(&mut index, &store, &mut free_list, &format!("k{}", i));
    }

    assert_eq!(index.bucket_count(), 4);
    assert_eq!(index.entries(&store).unwrap().len(), 32);
}

// =============================================================================
// Threshold Capacity Tests
// =============================================================================

#[test]
fn test_threshold_grows_at_three_quarters() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(4, HashStrategy::ByteSum, CapacityPolicy::Threshold);
    let a = insert(&mut index, &store, &mut free_list, "a");
    insert(&mut index, &store, &mut free_list, "b");
    insert(&mut index, &store, &mut free_list, "c");
    assert_eq!(index.bucket_count(), 4);

    let d = insert(&mut index, &store, &mut free_list, "d");

    assert_eq!(index.bucket_count(), 8);
    assert_eq!(index.occupied(), 4);
    assert_eq!(found(&index, &store, "a"), Some(a));
    assert_eq!(found(&index, &store, "d"), Some(d));
}

#[test]
fn test_rehash_keeps_entry_offsets() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(4, HashStrategy::Fnv1a, CapacityPolicy::Threshold);

    for i in 0..12 {
        insert(&mut index, &store, &mut free_list, &format!("key{}", i));
    }

    assert!(index.bucket_count() > 4);
    assert_eq!(store.file_len(FileKind::HashEntries).unwrap(), 12 * HASH_ENTRY_SIZE as u64);
    for i in 0..12 {
        assert!(found(&index, &store, &format!("key{}", i)).is_some());
    }
}

#[test]
fn test_threshold_shrinks_at_one_quarter() {
    let (_temp, store, mut free_list) = setup_temp_store();
    let mut index = SecondaryIndex::new(64, HashStrategy::ByteSum, CapacityPolicy::Threshold);
    let keys: Vec<String> = (b'a'..=b't').map(|c| (c as char).to_string()).collect();
    for k in &keys {
        insert(&mut index, &store, &mut free_list, k);
    }
    assert_eq!(index.occupied(), 20);

    for k in &keys[..4] {
        index.delete_key(&store, &mut free_list, &key(k)).unwrap();
    }

    assert_eq!(index.bucket_count(), 32);
    assert_eq!(index.occupied(), 16);
    for k in &keys[4..] {
        assert!(found(&index, &store, k).is_some(), "{} lost in rehash", k);
    }

    for k in &keys[4..] {
        index.delete_key(&store, &mut free_list, &key(k)).unwrap();
    }
    assert_eq!(index.bucket_count(), 32);
    assert_eq!(index.occupied(), 0);
}
