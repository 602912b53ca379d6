//! Block device interface.
//!
//! Define the read-write interface [BlockDevice] the filesystem persists through, and
//! [BlockFile], the device backed by a virtual disk file on the host.

use core::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use spin::Mutex;

use crate::config::BLOCK_SZ;

/// Byte offset of a block on the device
pub fn block_offset(block_id: usize) -> u64 {
    (block_id * BLOCK_SZ) as u64
}

/// Every transfer moves the whole buffer or fails.
pub trait BlockDevice: Send + Sync + Any {
    /// Read `buf.len()` bytes starting at byte `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    /// Write all of `buf` starting at byte `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    /// Durability barrier: returns once earlier writes reached the medium.
    fn sync(&self) -> io::Result<()>;

    /// Read a block from the block device.
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), BLOCK_SZ);
        self.read_at(block_offset(block_id), buf)
    }
    /// Write a block to the block device.
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), BLOCK_SZ);
        self.write_at(block_offset(block_id), buf)
    }
}

/// A virtual disk file
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    /// Create (or reuse) the file at `path` and size it to `len` bytes.
    pub fn create(path: &Path, len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(Self(Mutex::new(file)))
    }

    /// Open an existing virtual disk.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.0.lock().metadata()?.len())
    }
}

impl BlockDevice for BlockFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.0.lock().sync_all()
    }
}
