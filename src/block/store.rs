//! Block Store
//!
//! Open-operate-close file access at caller-supplied offsets.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DuoError, Result};
use crate::freelist::FreeList;

use super::{Block, BlockRef, FileKind, NIL_OFFSET};

/// Reads and writes blocks of the table files
///
/// Holds no file descriptors between calls: every operation opens the file,
/// does its work and closes it again.
#[derive(Debug, Clone)]
pub struct BlockStore {
    /// Directory holding all table files
    dir: PathBuf,

    /// fsync after every write
    sync_writes: bool,
}

impl BlockStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            sync_writes,
        })
    }

    /// Full path of a file kind
    pub fn path(&self, kind: FileKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current length of a file, 0 if it does not exist
    pub fn file_len(&self, kind: FileKind) -> Result<u64> {
        match fs::metadata(self.path(kind)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Truncate every table file to zero length (creating missing ones)
    pub fn reset(&self) -> Result<()> {
        for kind in FileKind::ALL {
            File::create(self.path(kind))?;
        }
        debug!(dir = %self.dir.display(), "Reset all table files");
        Ok(())
    }

    // =========================================================================
    // Raw Access
    // =========================================================================

    /// Read `size` bytes at `offset`; a short read is an error
    pub fn read(&self, kind: FileKind, offset: u64, size: usize) -> Result<Vec<u8>> {
        if offset == NIL_OFFSET {
            return Err(DuoError::Corruption(format!(
                "attempted to read NIL offset in {}",
                kind
            )));
        }

        let mut file = File::open(self.path(kind))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write a new block, reusing a free block of `kind` when one fits
    ///
    /// Returns the offset the bytes landed at. A reused block goes back on
    /// the free list if the write fails.
    pub fn write(
        &self,
        kind: FileKind,
        bytes: &[u8],
        mut free_list: Option<&mut FreeList>,
    ) -> Result<u64> {
        let reused = free_list
            .as_deref_mut()
            .and_then(|list| list.take(bytes.len() as u64, kind));

        let result = match reused {
            Some(block) => self.write_at(kind, block.offset, bytes),
            None => self.append_block(kind, bytes),
        };

        match (result, reused, free_list) {
            (Ok(offset), _, _) => {
                debug!(
                    file = %kind,
                    offset,
                    size = bytes.len(),
                    reused = reused.is_some(),
                    "Wrote block"
                );
                Ok(offset)
            }
            (Err(e), Some(block), Some(list)) => {
                list.restore(block);
                Err(e)
            }
            (Err(e), _, _) => Err(e),
        }
    }

    fn write_at(&self, kind: FileKind, offset: u64, bytes: &[u8]) -> Result<u64> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path(kind))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(offset)
    }

    fn append_block(&self, kind: FileKind, bytes: &[u8]) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(kind))?;
        let offset = file.metadata()?.len();
        file.write_all(bytes)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(offset)
    }

    /// Overwrite an existing block in place
    ///
    /// The range must already lie inside the file.
    pub fn rewrite(&self, kind: FileKind, offset: u64, bytes: &[u8]) -> Result<()> {
        let len = self.file_len(kind)?;
        if offset == NIL_OFFSET || offset.saturating_add(bytes.len() as u64) > len {
            return Err(DuoError::Corruption(format!(
                "rewrite of {} bytes at {} is outside {} (len {})",
                bytes.len(),
                offset,
                kind,
                len
            )));
        }

        let mut file = OpenOptions::new().write(true).open(self.path(kind))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Mark a range as reusable; the bytes are left untouched
    pub fn delete(&self, kind: FileKind, offset: u64, size: u64, free_list: &mut FreeList) {
        free_list.append(offset, size, kind);
        debug!(file = %kind, offset, size, "Released block");
    }

    // =========================================================================
    // Typed Access
    // =========================================================================

    /// Read and decode the block behind `r`
    pub fn read_block<T: Block>(&self, r: T::Ref) -> Result<T> {
        let bytes = self.read(T::KIND, r.offset(), T::SIZE)?;
        T::decode(&bytes)
    }

    /// Store a new block, preferring a reclaimed range
    pub fn alloc<T: Block>(&self, block: &T, free_list: &mut FreeList) -> Result<T::Ref> {
        let bytes = block.encode()?;
        let offset = self.write(T::KIND, &bytes, Some(free_list))?;
        Ok(T::Ref::from_offset(offset))
    }

    /// Replace the block behind `r` without moving it
    pub fn rewrite_block<T: Block>(&self, r: T::Ref, block: &T) -> Result<()> {
        let bytes = block.encode()?;
        self.rewrite(T::KIND, r.offset(), &bytes)
    }

    /// Hand the block behind `r` back to the free list
    pub fn release<T: Block>(&self, r: T::Ref, free_list: &mut FreeList) {
        self.delete(T::KIND, r.offset(), T::SIZE as u64, free_list);
    }
}
