//! # DuoKV
//!
//! A dual-indexed record store on flat binary files:
//! - Fixed-size records addressed by (numeric key, string key)
//! - KS1: sorted numeric keys, each with a chain of releases
//! - KS2: hashed string keys, unique across the whole table
//! - A free list that recycles released blocks before files grow
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Item Engine                            │
//! │        insert / find / delete, key2 uniqueness               │
//! └──────────┬──────────────────┬──────────────────┬────────────┘
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//!   ┌─────────────────┐ ┌───────────────┐ ┌─────────────────┐
//!   │  KS1 (primary)  │ │ KS2 (second.) │ │  Record Store   │
//!   │ sorted slots →  │ │ buckets →     │ │  (data.bin)     │
//!   │ release chains  │ │ entry chains  │ │                 │
//!   └────────┬────────┘ └───────┬───────┘ └────────┬────────┘
//!            │   Table Directory (table.bin)       │
//!            └──────────────────┬──────────────────┘
//!                               ▼
//!   ┌─────────────────────────────────────────────────────────┐
//!   │          Block Store  ◀──────▶  Free-List Allocator      │
//!   │        (offset I/O)             (free_list.bin)          │
//!   └─────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod block;
pub mod freelist;
pub mod record;
pub mod index;
pub mod table;
pub mod engine;

pub(crate) mod codec;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DuoError, Result};
pub use config::{CapacityPolicy, Config, HashStrategy, SyncStrategy};
pub use engine::{Engine, Lookup};
pub use record::{Key2, Record};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DuoKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
