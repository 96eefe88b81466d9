//! Records and the string key type
//!
//! ## Record Layout (166 bytes, little-endian)
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       8   key1
//!   8       8   release
//!  16       4   num1 (f32)
//!  20       4   num2 (f32)
//!  24       1   key2 length
//!  25       8   key2 bytes (zero-padded)
//!  33       1   note length
//!  34     128   note bytes (zero-padded)
//! 162       4   CRC32 of bytes 0..162
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::block::{Block, FileKind, RecordRef};
use crate::error::{DuoError, Result};

/// Maximum length of a string key in bytes
pub const MAX_KEY2_LEN: usize = 8;

/// Maximum length of a record note in bytes
pub const MAX_NOTE_LEN: usize = 128;

/// Encoded size of a record
pub const RECORD_SIZE: usize = 8 + 8 + 4 + 4 + 1 + MAX_KEY2_LEN + 1 + MAX_NOTE_LEN + 4;

// =============================================================================
// Key2
// =============================================================================

/// A bounded, inline string key (1..=8 bytes of UTF-8)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKey2", into = "RawKey2")]
pub struct Key2 {
    len: u8,
    bytes: [u8; MAX_KEY2_LEN],
}

/// On-disk shape of `Key2`, validated on the way in
#[derive(Clone, Copy, Serialize, Deserialize)]
struct RawKey2 {
    len: u8,
    bytes: [u8; MAX_KEY2_LEN],
}

impl Key2 {
    /// Build a key, rejecting empty or oversized input
    pub fn new(key: &str) -> Result<Self> {
        Self::from_bytes(key.as_bytes()).map_err(DuoError::InvalidKey)
    }

    fn from_bytes(raw: &[u8]) -> std::result::Result<Self, String> {
        if raw.is_empty() {
            return Err("key2 must not be empty".to_string());
        }
        if raw.len() > MAX_KEY2_LEN {
            return Err(format!(
                "key2 is {} bytes, at most {} allowed",
                raw.len(),
                MAX_KEY2_LEN
            ));
        }
        if std::str::from_utf8(raw).is_err() {
            return Err("key2 is not valid UTF-8".to_string());
        }

        let mut bytes = [0u8; MAX_KEY2_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            len: raw.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn as_str(&self) -> &str {
        // Construction guarantees UTF-8
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }
}

impl TryFrom<RawKey2> for Key2 {
    type Error = String;

    fn try_from(raw: RawKey2) -> std::result::Result<Self, Self::Error> {
        let len = raw.len as usize;
        if len > MAX_KEY2_LEN {
            return Err(format!("stored key2 length {} out of range", len));
        }
        Key2::from_bytes(&raw.bytes[..len])
    }
}

impl From<Key2> for RawKey2 {
    fn from(key: Key2) -> Self {
        RawKey2 {
            len: key.len,
            bytes: key.bytes,
        }
    }
}

impl FromStr for Key2 {
    type Err = DuoError;

    fn from_str(s: &str) -> Result<Self> {
        Key2::new(s)
    }
}

impl fmt::Display for Key2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Debug for Key2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key2({:?})", self.as_str())
    }
}

// =============================================================================
// Record
// =============================================================================

/// A stored item: both keys, its release and the payload
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Numeric key (may carry several releases)
    pub key1: u64,

    /// String key (unique across the table)
    pub key2: Key2,

    /// Release number under `key1`, assigned on insert
    pub release: u64,

    pub num1: f32,
    pub num2: f32,

    /// Free text, at most `MAX_NOTE_LEN` bytes
    pub note: String,
}

impl Record {
    /// Build a record with release 0 (the index assigns the real one)
    pub fn new(key1: u64, key2: Key2, num1: f32, num2: f32, note: impl Into<String>) -> Result<Self> {
        let note = note.into();
        check_note(&note)?;
        Ok(Self {
            key1,
            key2,
            release: 0,
            num1,
            num2,
            note,
        })
    }
}

fn check_note(note: &str) -> Result<()> {
    if note.len() > MAX_NOTE_LEN {
        return Err(DuoError::InvalidRecord(format!(
            "note is {} bytes, at most {} allowed",
            note.len(),
            MAX_NOTE_LEN
        )));
    }
    Ok(())
}

impl Block for Record {
    const KIND: FileKind = FileKind::Data;
    const SIZE: usize = RECORD_SIZE;
    type Ref = RecordRef;

    fn encode(&self) -> Result<Vec<u8>> {
        check_note(&self.note)?;

        let mut buf = BytesMut::with_capacity(RECORD_SIZE);
        buf.put_u64_le(self.key1);
        buf.put_u64_le(self.release);
        buf.put_f32_le(self.num1);
        buf.put_f32_le(self.num2);

        buf.put_u8(self.key2.len);
        buf.put_slice(&self.key2.bytes);

        let note = self.note.as_bytes();
        buf.put_u8(note.len() as u8);
        buf.put_slice(note);
        buf.put_bytes(0, MAX_NOTE_LEN - note.len());

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        Ok(buf.to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(DuoError::Corruption(format!(
                "record is {} bytes, expected {}",
                bytes.len(),
                RECORD_SIZE
            )));
        }

        let (body, mut tail) = bytes.split_at(RECORD_SIZE - 4);
        let stored_crc = tail.get_u32_le();
        if crc32fast::hash(body) != stored_crc {
            return Err(DuoError::Corruption("record checksum mismatch".to_string()));
        }

        let mut buf = body;
        let key1 = buf.get_u64_le();
        let release = buf.get_u64_le();
        let num1 = buf.get_f32_le();
        let num2 = buf.get_f32_le();

        let key2_len = buf.get_u8();
        let mut key2_bytes = [0u8; MAX_KEY2_LEN];
        buf.copy_to_slice(&mut key2_bytes);
        let key2 = Key2::try_from(RawKey2 {
            len: key2_len,
            bytes: key2_bytes,
        })
        .map_err(DuoError::Corruption)?;

        let note_len = buf.get_u8() as usize;
        if note_len > MAX_NOTE_LEN {
            return Err(DuoError::Corruption(format!(
                "stored note length {} out of range",
                note_len
            )));
        }
        let note = std::str::from_utf8(&buf[..note_len])
            .map_err(|_| DuoError::Corruption("note is not valid UTF-8".to_string()))?
            .to_string();

        Ok(Self {
            key1,
            key2,
            release,
            num1,
            num2,
            note,
        })
    }
}
