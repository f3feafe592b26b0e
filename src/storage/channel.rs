//! Append-oriented file channels backing the on-disk tables.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::{Result, StoreError};

/// Positioned read/write access to one flat table file.
///
/// Offsets are absolute byte positions; offset `0` is reserved as the invalid
/// sentinel, so the append cursor of an empty channel starts at `1`. Region
/// reservation is the serialization point for concurrent writers: once
/// [`FileChannel::reserve`] returns, the region belongs to the caller and can
/// be written without further coordination.
pub(crate) struct FileChannel {
    file: Mutex<File>,
    cursor: AtomicU64,
}

impl FileChannel {
    /// Opens (creating if needed) the channel at `path`. With `clear` set the
    /// file is truncated and the cursor reset to 1.
    pub(crate) fn open(path: &Path, clear: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(clear)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(FileChannel {
            file: Mutex::new(file),
            cursor: AtomicU64::new(len.max(1)),
        })
    }

    /// Current append cursor (one past the last reserved byte).
    pub(crate) fn end(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Reserves `len` bytes at the end of the channel and returns the offset
    /// of the reserved region.
    pub(crate) fn reserve(&self, len: u64) -> u64 {
        self.cursor.fetch_add(len, Ordering::AcqRel)
    }

    /// Reserves a region, writes `bytes` into it and returns its offset.
    pub(crate) fn append(&self, bytes: &[u8]) -> Result<u64> {
        let off = self.reserve(bytes.len() as u64);
        self.write_at(off, bytes)?;
        Ok(off)
    }

    /// Writes `bytes` at an absolute offset inside a reserved region.
    pub(crate) fn write_at(&self, off: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(off))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Fills `buf` from an absolute offset. A short read is a corruption
    /// signal, reported as [`StoreError::Read`] rather than an I/O error.
    pub(crate) fn read_at(&self, off: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(off))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(StoreError::Read("record truncated"));
            }
            filled += n;
        }
        Ok(())
    }

    /// Flushes buffered writes to the OS.
    pub(crate) fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
