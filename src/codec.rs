//! Snapshot framing shared by the directory and free-list files
//!
//! ## File Format
//! ```text
//! ┌──────────┬─────────────┬───────────┬──────────────────────┐
//! │Magic (4) │ Version (2) │ CRC32 (4) │ Body (bincode)       │
//! └──────────┴─────────────┴───────────┴──────────────────────┘
//! ```
//! The CRC covers the body only. Snapshots are written to a sibling
//! `.tmp` file and renamed over the target, so a reader sees either the old
//! or the new snapshot.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::{DuoError, Result};

/// Current snapshot format version
pub(crate) const SNAPSHOT_VERSION: u16 = 1;

/// Magic (4) + Version (2) + CRC (4)
pub(crate) const SNAPSHOT_HEADER_SIZE: usize = 10;

/// Outcome of reading a snapshot file
#[derive(Debug)]
pub(crate) enum SnapshotRead {
    /// No file at the path
    Missing,

    /// File exists but cannot even hold a header
    Undersized(u64),

    /// Verified body bytes
    Body(Vec<u8>),
}

/// Write `body` framed with magic, version and CRC
pub(crate) fn write_snapshot(path: &Path, magic: &[u8; 4], body: &[u8], sync: bool) -> Result<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let crc = hasher.finalize();

    let mut bytes = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + body.len());
    bytes.extend_from_slice(magic);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(body);

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and verify a framed snapshot
pub(crate) fn read_snapshot(path: &Path, magic: &[u8; 4], min_body: usize) -> Result<SnapshotRead> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SnapshotRead::Missing),
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < SNAPSHOT_HEADER_SIZE + min_body {
        return Ok(SnapshotRead::Undersized(bytes.len() as u64));
    }

    if &bytes[0..4] != magic {
        return Err(DuoError::Corruption(format!(
            "{}: invalid magic {:?}",
            path.display(),
            &bytes[0..4]
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(DuoError::Corruption(format!(
            "{}: unsupported snapshot version {}",
            path.display(),
            version
        )));
    }

    let stored_crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let body = &bytes[SNAPSHOT_HEADER_SIZE..];

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let crc = hasher.finalize();
    if crc != stored_crc {
        return Err(DuoError::Corruption(format!(
            "{}: checksum mismatch (stored {:#010x}, computed {:#010x})",
            path.display(),
            stored_crc,
            crc
        )));
    }

    Ok(SnapshotRead::Body(body.to_vec()))
}
