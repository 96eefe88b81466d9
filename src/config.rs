//! Configuration for DuoKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DuoError, Result};

/// Smallest capacity a growable index will shrink to
pub const MIN_GROWABLE_CAPACITY: usize = 32;

/// Main configuration for a DuoKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── table.bin        (directory snapshot)
    ///     ├── data.bin         (records)
    ///     ├── ks1_nodes.bin    (release chain nodes)
    ///     ├── ks2.bin          (hash chain entries)
    ///     └── free_list.bin    (reclaimed blocks)
    pub data_dir: PathBuf,

    /// fsync every block write before returning
    pub sync_writes: bool,

    /// When the directory snapshot and free list are written back
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Slot capacity of the primary (numeric key) index
    pub ks1_capacity: usize,

    /// Bucket count of the secondary (string key) index
    pub ks2_buckets: usize,

    /// Whether index arrays are fixed or grow/shrink with load
    pub capacity_policy: CapacityPolicy,

    /// Bucket selection for string keys
    pub hash_strategy: HashStrategy,
}

/// Persistence strategy for the directory snapshot and free list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Save after every insert/delete (survives a crash between operations)
    EveryMutation,

    /// Save only on `Engine::close` or an explicit `Engine::save`
    OnClose,
}

/// Resize behavior for both index arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// Capacity never changes; inserting past it fails
    Fixed,

    /// KS1 doubles when full and halves below half load;
    /// KS2 doubles at 0.75 load and halves at 0.25 load.
    /// Neither shrinks below `MIN_GROWABLE_CAPACITY`.
    Threshold,
}

/// Hash used to pick a KS2 bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashStrategy {
    /// Sum of bytes modulo bucket count. Order-insensitive: anagrams collide.
    ByteSum,

    /// 64-bit FNV-1a modulo bucket count
    Fnv1a,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./duokv_data"),
            sync_writes: false,
            sync_strategy: SyncStrategy::EveryMutation,
            ks1_capacity: 512,
            ks2_buckets: 512,
            capacity_policy: CapacityPolicy::Fixed,
            hash_strategy: HashStrategy::Fnv1a,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the indexes cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ks1_capacity == 0 {
            return Err(DuoError::Config("ks1_capacity must be non-zero".to_string()));
        }
        if self.ks2_buckets == 0 {
            return Err(DuoError::Config("ks2_buckets must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// fsync each block write
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.config.sync_writes = enabled;
        self
    }

    /// Set the snapshot persistence strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the KS1 slot capacity (initial capacity under `Threshold`)
    pub fn ks1_capacity(mut self, capacity: usize) -> Self {
        self.config.ks1_capacity = capacity;
        self
    }

    /// Set the KS2 bucket count (initial count under `Threshold`)
    pub fn ks2_buckets(mut self, buckets: usize) -> Self {
        self.config.ks2_buckets = buckets;
        self
    }

    /// Set the resize policy for both indexes
    pub fn capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.config.capacity_policy = policy;
        self
    }

    /// Set the KS2 hash strategy
    pub fn hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.config.hash_strategy = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
