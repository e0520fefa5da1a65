//! Fixed-capacity block storage.
//!
//! A block file holds `capacity` equally sized slots of a single record type,
//! an allocation bitmap, and one reserved "info" record the owner can use for
//! its own bookkeeping (the multimap keeps its root pointer there).
//!
//! File layout:
//! - header: magic, capacity, slot size, allocation cursor (4 x u64)
//! - bitmap: one byte per slot
//! - info record, padded to `I::MAX_SIZE`
//! - `capacity` slots of `slot_size` bytes

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{BlockPointer, DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use types::Storable;

const BLOCK_MAGIC: u64 = u64::from_le_bytes(*b"BLKSTOR1");
const HEADER_BYTES: u64 = 32;

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileHeader {
    magic: u64,
    capacity: u64,
    slot_size: u64,
    cursor: u64,
}

/// Slot-level access to a block store.
///
/// Pointers handed out by `allocate*` stay valid until they are passed to
/// `free`; any later use of the same pointer is reported as
/// [`DbError::Unallocated`].
pub trait BlockStore<T> {
    /// Claim a free slot and initialise it with `record`.
    fn allocate_with(&mut self, record: &T) -> DbResult<BlockPointer>;

    /// Claim a free slot holding the default record.
    fn allocate(&mut self) -> DbResult<BlockPointer>
    where
        T: Default,
    {
        self.allocate_with(&T::default())
    }

    /// Release a slot.
    fn free(&mut self, ptr: BlockPointer) -> DbResult<()>;

    /// Decode the record stored in a slot.
    fn read(&mut self, ptr: BlockPointer) -> DbResult<T>;

    /// Overwrite the record stored in a slot.
    fn write(&mut self, ptr: BlockPointer, record: &T) -> DbResult<()>;
}

/// File-backed block store for records of type `T` with an info record `I`.
///
/// The bitmap, allocation cursor and info record are cached in memory and
/// written back on [`BlockFile::flush`], [`BlockFile::close`] or drop.
/// Slot contents are written through immediately.
pub struct BlockFile<T, I: Storable> {
    name: String,
    file: File,
    capacity: u64,
    slot_size: usize,
    cursor: u64,
    bitmap: Vec<bool>,
    allocated: u64,
    info: I,
    dirty: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T, I: Storable> BlockFile<T, I> {
    /// Open the block file at `path`, creating it when missing.
    ///
    /// Returns the store together with whether the file already existed.
    /// Reopening an existing file with a different capacity or slot size is
    /// a [`DbError::Layout`] error.
    pub fn open(path: &Path, capacity: u64, slot_size: usize) -> DbResult<(Self, bool)> {
        if capacity == 0 || slot_size == 0 {
            return Err(DbError::Layout(format!(
                "{}: capacity and slot size must be non-zero",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let existed = file.metadata()?.len() > 0;

        let mut store = Self {
            name,
            file,
            capacity,
            slot_size,
            cursor: 0,
            bitmap: vec![false; capacity as usize],
            allocated: 0,
            info: I::default(),
            dirty: false,
            _record: PhantomData,
        };

        if existed {
            store.load()?;
            tracing::debug!(
                store = %store.name,
                allocated = store.allocated,
                capacity,
                "opened block file"
            );
        } else {
            store.format()?;
            tracing::debug!(store = %store.name, capacity, slot_size, "created block file");
        }

        Ok((store, existed))
    }

    /// Number of slots currently allocated.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn is_allocated(&self, ptr: BlockPointer) -> bool {
        ptr.0 < self.capacity && self.bitmap[ptr.0 as usize]
    }

    pub fn read_info(&self) -> I {
        self.info.clone()
    }

    pub fn write_info(&mut self, info: &I) {
        self.info = info.clone();
        self.dirty = true;
    }

    /// Persist the bitmap, cursor and info record, then sync the file.
    pub fn flush(&mut self) -> DbResult<()> {
        if self.dirty {
            self.write_metadata()?;
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Flush and release the file.
    pub fn close(mut self) -> DbResult<()> {
        self.flush()
    }

    fn data_offset(&self) -> u64 {
        HEADER_BYTES + self.capacity + I::MAX_SIZE as u64
    }

    fn slot_offset(&self, index: usize) -> u64 {
        self.data_offset() + index as u64 * self.slot_size as u64
    }

    fn format(&mut self) -> DbResult<()> {
        let len = self.data_offset() + self.capacity * self.slot_size as u64;
        self.file.set_len(len)?;
        self.write_metadata()
    }

    fn load(&mut self) -> DbResult<()> {
        let mut header_buf = [0u8; HEADER_BYTES as usize];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header_buf)?;
        let (header, _): (FileHeader, usize) = decode_from_slice(&header_buf, bincode_config())
            .map_err(|e| DbError::Codec(format!("{}: bad header: {e}", self.name)))?;

        if header.magic != BLOCK_MAGIC {
            return Err(DbError::Layout(format!("{}: not a block file", self.name)));
        }
        if header.capacity != self.capacity || header.slot_size != self.slot_size as u64 {
            return Err(DbError::Layout(format!(
                "{}: created with capacity {} and slot size {}, opened with {} and {}",
                self.name, header.capacity, header.slot_size, self.capacity, self.slot_size
            )));
        }

        let expected_len = self.data_offset() + self.capacity * self.slot_size as u64;
        if self.file.metadata()?.len() < expected_len {
            return Err(DbError::Layout(format!("{}: file is truncated", self.name)));
        }

        let mut bitmap_buf = vec![0u8; self.capacity as usize];
        self.file.read_exact(&mut bitmap_buf)?;
        self.bitmap = bitmap_buf.iter().map(|&b| b != 0).collect();
        self.allocated = self.bitmap.iter().filter(|&&used| used).count() as u64;

        let mut info_buf = vec![0u8; I::MAX_SIZE];
        self.file.read_exact(&mut info_buf)?;
        let (info, _): (I, usize) = decode_from_slice(&info_buf, bincode_config())
            .map_err(|e| DbError::Codec(format!("{}: bad info record: {e}", self.name)))?;
        self.info = info;
        self.cursor = header.cursor.min(self.capacity - 1);
        self.dirty = false;
        Ok(())
    }

    fn write_metadata(&mut self) -> DbResult<()> {
        let header = FileHeader {
            magic: BLOCK_MAGIC,
            capacity: self.capacity,
            slot_size: self.slot_size as u64,
            cursor: self.cursor,
        };
        let mut header_buf = [0u8; HEADER_BYTES as usize];
        encode_into_slice(&header, &mut header_buf, bincode_config())
            .map_err(|e| DbError::Codec(format!("{}: write header failed: {e}", self.name)))?;

        let bitmap_buf: Vec<u8> = self.bitmap.iter().map(|&used| u8::from(used)).collect();

        let mut info_buf = vec![0u8; I::MAX_SIZE];
        encode_into_slice(&self.info, &mut info_buf, bincode_config())
            .map_err(|e| DbError::Codec(format!("{}: write info failed: {e}", self.name)))?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header_buf)?;
        self.file.write_all(&bitmap_buf)?;
        self.file.write_all(&info_buf)?;
        self.dirty = false;
        Ok(())
    }

    /// Validate `ptr` and return its slot index.
    fn slot_index(&self, ptr: BlockPointer) -> DbResult<usize> {
        if ptr.0 >= self.capacity {
            return Err(DbError::OutOfRange {
                store: self.name.clone(),
                offset: ptr.0,
                capacity: self.capacity,
            });
        }
        let index = ptr.0 as usize;
        if !self.bitmap[index] {
            return Err(DbError::Unallocated {
                store: self.name.clone(),
                offset: ptr.0,
            });
        }
        Ok(index)
    }

    /// Next-fit search starting at the cursor, wrapping once.
    fn find_free(&self) -> Option<usize> {
        let cursor = self.cursor as usize;
        (cursor..self.bitmap.len())
            .chain(0..cursor)
            .find(|&i| !self.bitmap[i])
    }
}

impl<T, I> BlockStore<T> for BlockFile<T, I>
where
    T: Serialize + DeserializeOwned,
    I: Storable,
{
    fn allocate_with(&mut self, record: &T) -> DbResult<BlockPointer> {
        let index = self.find_free().ok_or_else(|| DbError::StoreFull {
            store: self.name.clone(),
        })?;

        self.bitmap[index] = true;
        let ptr = BlockPointer(index as u64);
        if let Err(err) = self.write(ptr, record) {
            self.bitmap[index] = false;
            return Err(err);
        }

        self.cursor = index as u64;
        self.allocated += 1;
        self.dirty = true;
        Ok(ptr)
    }

    fn free(&mut self, ptr: BlockPointer) -> DbResult<()> {
        let index = self.slot_index(ptr)?;
        self.bitmap[index] = false;
        self.allocated -= 1;
        self.dirty = true;
        Ok(())
    }

    fn read(&mut self, ptr: BlockPointer) -> DbResult<T> {
        let index = self.slot_index(ptr)?;
        let offset = self.slot_offset(index);

        let mut buffer = vec![0u8; self.slot_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buffer)?;

        let (record, _): (T, usize) = decode_from_slice(&buffer, bincode_config())
            .map_err(|e| DbError::Codec(format!("{}: decode slot {}: {e}", self.name, ptr.0)))?;
        Ok(record)
    }

    fn write(&mut self, ptr: BlockPointer, record: &T) -> DbResult<()> {
        let index = self.slot_index(ptr)?;
        let offset = self.slot_offset(index);

        let mut buffer = vec![0u8; self.slot_size];
        encode_into_slice(record, &mut buffer, bincode_config()).map_err(|e| {
            DbError::Codec(format!(
                "{}: record does not fit a {}-byte slot: {e}",
                self.name, self.slot_size
            ))
        })?;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buffer)?;
        Ok(())
    }
}

impl<T, I: Storable> Drop for BlockFile<T, I> {
    fn drop(&mut self) {
        if self.dirty
            && let Err(err) = self.write_metadata()
        {
            tracing::warn!(
                store = %self.name,
                %err,
                "failed to persist block file metadata on drop"
            );
        }
    }
}

impl<T, I: Storable> fmt::Debug for BlockFile<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockFile")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("allocated", &self.allocated)
            .finish()
    }
}
