//! Disk layout & data structure layer
//!
//! The on-disk records of an inode slot and a directory entry, together with the
//! little-endian field codec every persisted structure shares. In memory the records
//! are plain structs; they are copied in and out of block buffers field by field, so
//! the persisted layout never depends on how the compiler lays a struct out.

use crate::config::{BLOCK_SZ, DIRENT_SZ, INODE_SZ, MAX_BLOCKS_PER_FILE, MAX_NAME_LEN};

/// Logical block address
pub type Lba = u32;

const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// An inode slot as stored in the inode table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    /// file's total bytes
    pub size: u32,
    /// number of entries of `blocks` in use
    pub block_count: u32,
    /// seconds since the Unix epoch
    pub modified: u64,
    pub free: bool,
    blocks: [Lba; MAX_BLOCKS_PER_FILE],
}

impl DiskInode {
    /// An unused slot
    pub fn empty() -> Self {
        Self {
            size: 0,
            block_count: 0,
            modified: 0,
            free: true,
            blocks: [0; MAX_BLOCKS_PER_FILE],
        }
    }

    /// An occupied slot describing `size` bytes stored in `blocks`, in order.
    pub fn new_file(size: u32, blocks: &[Lba], modified: u64) -> Self {
        debug_assert_eq!(blocks.len(), Self::total_blocks(size) as usize);
        let mut inode = Self {
            size,
            block_count: blocks.len() as u32,
            modified,
            free: false,
            blocks: [0; MAX_BLOCKS_PER_FILE],
        };
        inode.blocks[..blocks.len()].copy_from_slice(blocks);
        inode
    }

    /// Number of data blocks needed to hold `size` bytes
    pub fn total_blocks(size: u32) -> u32 {
        (size as usize).div_ceil(BLOCK_SZ) as u32
    }

    /// The data blocks of the file, in file order
    pub fn data_blocks(&self) -> &[Lba] {
        &self.blocks[..self.block_count as usize]
    }

    /// Serialize into the first [`INODE_SZ`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        let buf = &mut buf[..INODE_SZ];
        buf.fill(0);
        put_u32(buf, 0, self.size);
        put_u32(buf, 4, self.block_count);
        put_u64(buf, 8, self.modified);
        buf[16] = self.free as u8;
        for (i, block) in self.blocks.iter().enumerate() {
            put_u32(buf, 20 + 4 * i, *block);
        }
    }

    /// Deserialize from the first [`INODE_SZ`] bytes of `buf`.
    ///
    /// Returns `None` for an occupied inode whose block count does not match its size.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut inode = Self {
            size: get_u32(buf, 0),
            block_count: get_u32(buf, 4),
            modified: get_u64(buf, 8),
            free: buf[16] != 0,
            blocks: [0; MAX_BLOCKS_PER_FILE],
        };
        for (i, block) in inode.blocks.iter_mut().enumerate() {
            *block = get_u32(buf, 20 + 4 * i);
        }
        if !inode.free && inode.block_count != Self::total_blocks(inode.size) {
            return None;
        }
        if inode.block_count as usize > MAX_BLOCKS_PER_FILE {
            return None;
        }
        Some(inode)
    }
}

/// A directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_FIELD_LEN],
    free: bool,
    inode: u32,
}

impl DirEntry {
    /// Create an empty directory entry
    pub fn empty() -> Self {
        Self {
            name: [0u8; NAME_FIELD_LEN],
            free: true,
            inode: 0,
        }
    }

    /// Create a directory entry from name and inode number
    pub fn new(name: &str, inode: u32) -> Self {
        let bytes = name.as_bytes();
        debug_assert!(bytes.len() <= MAX_NAME_LEN);
        debug_assert!(!bytes.is_empty() && !bytes.contains(&0));
        let mut entry = Self {
            name: [0u8; NAME_FIELD_LEN],
            free: false,
            inode,
        };
        entry.name[..bytes.len()].copy_from_slice(bytes);
        entry
    }

    fn name_len(&self) -> usize {
        self.name.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_LEN)
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len()]
    }

    /// Get name of the entry
    pub fn name(&self) -> &str {
        core::str::from_utf8(self.name_bytes()).unwrap_or_default()
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    /// Get inode number of the entry
    pub fn inode_id(&self) -> u32 {
        self.inode
    }

    pub fn encode(&self, buf: &mut [u8]) {
        let buf = &mut buf[..DIRENT_SZ];
        buf.fill(0);
        buf[..NAME_FIELD_LEN].copy_from_slice(&self.name);
        buf[NAME_FIELD_LEN] = self.free as u8;
        put_u32(buf, NAME_FIELD_LEN + 4, self.inode);
    }

    /// Returns `None` when an occupied entry carries a name that is not UTF-8.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut entry = Self {
            name: [0u8; NAME_FIELD_LEN],
            free: buf[NAME_FIELD_LEN] != 0,
            inode: get_u32(buf, NAME_FIELD_LEN + 4),
        };
        entry.name.copy_from_slice(&buf[..NAME_FIELD_LEN]);
        entry.name[MAX_NAME_LEN] = 0;
        if !entry.free && core::str::from_utf8(entry.name_bytes()).is_err() {
            return None;
        }
        Some(entry)
    }
}
