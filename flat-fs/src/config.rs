//! Format constants and runtime options
//!
//! Every offset of the on-disk layout is a constant of the format: nothing here is
//! computed from the size of the virtual disk.

/// Block size in bytes
pub const BLOCK_SZ: usize = 4096;
/// Number of blocks the single bitmap block can address
pub const BITMAP_CAPACITY: usize = BLOCK_SZ * 8;
/// Longest file name, in bytes
pub const MAX_NAME_LEN: usize = 27;
/// Number of direct block slots in an inode
pub const MAX_BLOCKS_PER_FILE: usize = 100;
/// Number of inode slots, which is also the number of directory entries
pub const MAX_INODES: usize = 50;

/// Block id of the super block
pub const SUPER_BLOCK_ID: usize = 0;
/// Block id of the bitmap
pub const BITMAP_BLOCK_ID: usize = 1;
/// Block id of the directory
pub const DIRECTORY_BLOCK_ID: usize = 2;
/// First block of the inode table
pub const INODE_TABLE_START: usize = 3;

/// size(4) + block_count(4) + modified(8) + free(1) + padding(3) + direct blocks
pub const INODE_SZ: usize = 20 + 4 * MAX_BLOCKS_PER_FILE;
pub const INODES_PER_BLOCK: usize = BLOCK_SZ / INODE_SZ;
pub const INODE_BLOCKS: usize = (MAX_INODES + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK;
/// First block of the data pool
pub const DATA_START: usize = INODE_TABLE_START + INODE_BLOCKS;
/// A volume needs its metadata region plus at least one data block
pub const MIN_BLOCKS: usize = DATA_START + 1;

/// name field (NUL padded) + free(1) + padding(3) + inode(4)
pub const DIRENT_SZ: usize = MAX_NAME_LEN + 1 + 8;
/// entry count(4) followed by the entries
pub const DIRECTORY_SZ: usize = 4 + MAX_INODES * DIRENT_SZ;

const _: () = assert!(INODES_PER_BLOCK > 0);
const _: () = assert!(DIRECTORY_SZ <= BLOCK_SZ);
const _: () = assert!(MIN_BLOCKS < BITMAP_CAPACITY);

/// How a failed inode write is handled while a file is imported or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    /// Every failed write aborts the operation with
    /// [`FsError::PartiallyPersisted`](crate::FsError::PartiallyPersisted).
    #[default]
    Strict,
    /// A failed inode write is logged and the operation goes on, leaving the
    /// inode table on disk behind the in-memory mirror.
    Lenient,
}

/// Options a volume is formatted or opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsOptions {
    pub persistence: Persistence,
}

impl FsOptions {
    pub fn lenient() -> Self {
        Self {
            persistence: Persistence::Lenient,
        }
    }
}
