use core::fmt::{Debug, Formatter, Result};
use std::io;

use crate::bitmap::Bitmap;
use crate::block_dev::BlockDevice;
use crate::config::{
    BITMAP_CAPACITY, BLOCK_SZ, DIRECTORY_SZ, INODE_SZ, MAX_BLOCKS_PER_FILE, MAX_INODES,
    MAX_NAME_LEN, MIN_BLOCKS, SUPER_BLOCK_ID,
};
use crate::layout::{get_u32, put_u32};

/// Magic number identifying a flat-fs volume
const FS_MAGIC: u32 = 0x464c_4653;
/// Bytes the super block occupies in block 0
pub const SUPER_BLOCK_SZ: usize = 40;

/// Super block of a filesystem
#[derive(Clone, PartialEq, Eq)]
pub struct SuperBlock {
    magic: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub block_size: u32,
    pub max_name_len: u32,
    pub max_blocks_per_file: u32,
    pub super_block_size: u32,
    pub directory_size: u32,
    pub inode_size: u32,
    pub inode_count: u32,
}

impl Debug for SuperBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("SuperBlock")
            .field("total_blocks", &self.total_blocks)
            .field("free_blocks", &self.free_blocks)
            .field("block_size", &self.block_size)
            .field("inode_count", &self.inode_count)
            .finish()
    }
}

impl SuperBlock {
    /// Describe a freshly formatted disk of `total_disk_bytes` whose metadata region is
    /// already marked in `bitmap`.
    pub fn initialize(total_disk_bytes: u64, bitmap: &Bitmap) -> Self {
        let total_blocks = (total_disk_bytes / BLOCK_SZ as u64) as u32;
        Self {
            magic: FS_MAGIC,
            total_blocks,
            free_blocks: bitmap.count_free(total_blocks as usize) as u32,
            block_size: BLOCK_SZ as u32,
            max_name_len: MAX_NAME_LEN as u32,
            max_blocks_per_file: MAX_BLOCKS_PER_FILE as u32,
            super_block_size: SUPER_BLOCK_SZ as u32,
            directory_size: DIRECTORY_SZ as u32,
            inode_size: INODE_SZ as u32,
            inode_count: MAX_INODES as u32,
        }
    }

    /// Whether the super block was written by this format with the same geometry
    pub fn is_valid(&self) -> bool {
        let total = self.total_blocks as usize;
        self.magic == FS_MAGIC
            && self.block_size == BLOCK_SZ as u32
            && self.max_name_len == MAX_NAME_LEN as u32
            && self.max_blocks_per_file == MAX_BLOCKS_PER_FILE as u32
            && self.super_block_size == SUPER_BLOCK_SZ as u32
            && self.directory_size == DIRECTORY_SZ as u32
            && self.inode_size == INODE_SZ as u32
            && self.inode_count == MAX_INODES as u32
            && (MIN_BLOCKS..BITMAP_CAPACITY).contains(&total)
            && self.free_blocks <= self.total_blocks
    }

    /// Free bytes left on the volume
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks as u64 * BLOCK_SZ as u64
    }

    /// Account for `count` blocks taken from the pool
    pub fn allocated(&mut self, count: u32) {
        self.free_blocks -= count;
    }

    /// Account for `count` blocks given back to the pool
    pub fn released(&mut self, count: u32) {
        self.free_blocks += count;
    }

    /// Reset the cached free count from the bitmap; returns whether it was stale.
    pub fn recompute_free_blocks(&mut self, bitmap: &Bitmap) -> bool {
        let actual = bitmap.count_free(self.total_blocks as usize) as u32;
        let stale = actual != self.free_blocks;
        self.free_blocks = actual;
        stale
    }

    pub fn load(block_device: &dyn BlockDevice) -> io::Result<Self> {
        let mut block = [0u8; BLOCK_SZ];
        block_device.read_block(SUPER_BLOCK_ID, &mut block)?;
        Ok(Self {
            magic: get_u32(&block, 0),
            total_blocks: get_u32(&block, 4),
            free_blocks: get_u32(&block, 8),
            block_size: get_u32(&block, 12),
            max_name_len: get_u32(&block, 16),
            max_blocks_per_file: get_u32(&block, 20),
            super_block_size: get_u32(&block, 24),
            directory_size: get_u32(&block, 28),
            inode_size: get_u32(&block, 32),
            inode_count: get_u32(&block, 36),
        })
    }

    pub fn store(&self, block_device: &dyn BlockDevice) -> io::Result<()> {
        let mut block = [0u8; BLOCK_SZ];
        let fields = [
            self.magic,
            self.total_blocks,
            self.free_blocks,
            self.block_size,
            self.max_name_len,
            self.max_blocks_per_file,
            self.super_block_size,
            self.directory_size,
            self.inode_size,
            self.inode_count,
        ];
        for (i, field) in fields.iter().enumerate() {
            put_u32(&mut block, 4 * i, *field);
        }
        block_device.write_block(SUPER_BLOCK_ID, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::testing::MemDevice;
    use crate::config::DATA_START;

    fn formatted_bitmap() -> Bitmap {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..DATA_START);
        bitmap
    }

    #[test]
    fn initialize_counts_the_data_pool() {
        let bitmap = formatted_bitmap();
        let sb = SuperBlock::initialize(64 * BLOCK_SZ as u64 + 100, &bitmap);
        assert_eq!(sb.total_blocks, 64);
        assert_eq!(sb.free_blocks as usize, 64 - DATA_START);
        assert_eq!(sb.free_bytes(), (64 - DATA_START) as u64 * BLOCK_SZ as u64);
        assert!(sb.is_valid());
    }

    #[test]
    fn counter_follows_allocations() {
        let mut bitmap = formatted_bitmap();
        let mut sb = SuperBlock::initialize(32 * BLOCK_SZ as u64, &bitmap);
        let blocks = bitmap.find_free_blocks(5).expect("alloc");
        sb.allocated(5);
        assert!(!sb.recompute_free_blocks(&bitmap));
        bitmap.release(&blocks[..2]);
        sb.released(2);
        assert!(!sb.recompute_free_blocks(&bitmap));
        bitmap.release(&blocks[2..]);
        assert!(sb.recompute_free_blocks(&bitmap));
        assert_eq!(sb.free_blocks as usize, 32 - DATA_START);
    }

    #[test]
    fn survives_a_store_and_load() {
        let device = MemDevice::new(2 * BLOCK_SZ);
        let sb = SuperBlock::initialize(20 * BLOCK_SZ as u64, &formatted_bitmap());
        sb.store(&device).expect("store");
        assert_eq!(SuperBlock::load(&device).expect("load"), sb);
    }

    #[test]
    fn zeroed_block_is_not_a_volume() {
        let device = MemDevice::new(BLOCK_SZ);
        assert!(!SuperBlock::load(&device).expect("load").is_valid());
    }
}
