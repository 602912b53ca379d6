//! The filesystem façade
//!
//! [`FlatFileSystem`] owns the virtual disk and the in-memory mirrors of every
//! metadata structure. Each mutating operation first validates, then applies the
//! whole update to the mirrors, then pushes the touched structures to the disk in a
//! fixed order. There is no journal: when a write fails half way the mirrors hold
//! the complete update, the disk holds a prefix of it, and the caller is told which
//! step failed through [`FsError::PartiallyPersisted`].
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::block_dev::{block_offset, BlockDevice, BlockFile};
use crate::config::{
    FsOptions, BITMAP_CAPACITY, BLOCK_SZ, DATA_START, INODES_PER_BLOCK, INODE_BLOCKS, INODE_SZ,
    MAX_BLOCKS_PER_FILE, MAX_INODES, MAX_NAME_LEN, MIN_BLOCKS,
};
use crate::directory::Directory;
use crate::error::{FsError, PersistExt, PersistStep, Result};
use crate::inode_table::InodeTable;
use crate::layout::{DiskInode, Lba};
use crate::super_block::SuperBlock;

/// What `list` reports for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u32,
    /// seconds since the Unix epoch
    pub modified: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Empty,
    Files { entries: Vec<FileInfo>, total: usize },
}

/// The caller's answer when an export target already exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteDecision {
    Overwrite,
    /// Export to this path instead; it is checked for existence again.
    Rename(PathBuf),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    Aborted,
}

/// A broken volume invariant, as found by [`FlatFileSystem::check`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// the super block's free counter disagrees with the bitmap
    FreeCounter { cached: usize, actual: usize },
    MetadataBlockFree(usize),
    /// a file references a block whose bit is clear
    UnmarkedBlock { slot: usize, block: Lba },
    /// a file references a block outside the data pool
    BlockOutOfRange { slot: usize, block: Lba },
    SharedBlock { block: Lba, slots: (usize, usize) },
    /// a data block is marked but no file references it
    LeakedBlock(usize),
    /// a directory entry names a free inode, or an inode other than its own slot
    DanglingEntry(usize),
    /// an inode is occupied but no directory entry names it
    OrphanInode(usize),
}

pub struct FlatFileSystem {
    block_device: Box<dyn BlockDevice>,
    super_block: SuperBlock,
    bitmap: Bitmap,
    inodes: InodeTable,
    directory: Directory,
    options: FsOptions,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Number of blocks of a disk of `total_disk_bytes`, if the format can address it
fn checked_geometry(total_disk_bytes: u64) -> Result<usize> {
    let blocks = total_disk_bytes / BLOCK_SZ as u64;
    if blocks < MIN_BLOCKS as u64 {
        return Err(FsError::SizeTooSmall {
            blocks: blocks as usize,
            min: MIN_BLOCKS,
        });
    }
    if blocks >= BITMAP_CAPACITY as u64 {
        return Err(FsError::SizeTooLarge {
            blocks: usize::try_from(blocks).unwrap_or(usize::MAX),
            max: BITMAP_CAPACITY,
        });
    }
    Ok(blocks as usize)
}

impl FlatFileSystem {
    /// Create the virtual disk `path` of `total_disk_bytes` and format it.
    ///
    /// The size is validated before the file is touched.
    pub fn format(total_disk_bytes: u64, path: impl AsRef<Path>, options: FsOptions) -> Result<Self> {
        let blocks = checked_geometry(total_disk_bytes)?;
        let device = BlockFile::create(path.as_ref(), block_offset(blocks))?;
        Self::format_device(Box::new(device), total_disk_bytes, options)
    }

    /// Format an already opened device of `total_disk_bytes`.
    pub fn format_device(
        block_device: Box<dyn BlockDevice>,
        total_disk_bytes: u64,
        options: FsOptions,
    ) -> Result<Self> {
        checked_geometry(total_disk_bytes)?;

        let mut bitmap = Bitmap::new();
        // super block, bitmap, directory and inode table
        bitmap.mark(0..DATA_START);
        bitmap.store(&*block_device)?;

        let directory = Directory::new();
        directory.store(&*block_device)?;

        let free_inode = DiskInode::empty();
        for slot in 0..MAX_INODES {
            InodeTable::write(&*block_device, slot, &free_inode, options.persistence)?;
        }

        let super_block = SuperBlock::initialize(total_disk_bytes, &bitmap);
        super_block.store(&*block_device)?;
        block_device.sync()?;

        let fs = Self {
            block_device,
            super_block,
            bitmap,
            inodes: InodeTable::new(),
            directory,
            options,
        };
        fs.report_geometry();
        Ok(fs)
    }

    /// Mount the virtual disk at `path`.
    pub fn open(path: impl AsRef<Path>, options: FsOptions) -> Result<Self> {
        let device = BlockFile::open(path.as_ref())?;
        let len = device.len()?;
        let fs = Self::open_device(Box::new(device), options)?;
        if len < block_offset(fs.super_block.total_blocks as usize) {
            return Err(FsError::InvalidImage(format!(
                "{} bytes cannot hold {} blocks",
                len, fs.super_block.total_blocks
            )));
        }
        Ok(fs)
    }

    /// Mount an already opened device.
    pub fn open_device(block_device: Box<dyn BlockDevice>, options: FsOptions) -> Result<Self> {
        let mut super_block = SuperBlock::load(&*block_device)?;
        if !super_block.is_valid() {
            return Err(FsError::InvalidImage("bad super block".into()));
        }
        let bitmap = Bitmap::load(&*block_device)?;
        if let Some(block) = (0..DATA_START).find(|block| !bitmap.is_set(*block)) {
            return Err(FsError::InvalidImage(format!(
                "metadata block {} is marked free",
                block
            )));
        }
        let directory = Directory::load(&*block_device)?
            .ok_or_else(|| FsError::InvalidImage("undecodable directory entry".into()))?;
        let inodes = InodeTable::load(&*block_device)?
            .ok_or_else(|| FsError::InvalidImage("inconsistent inode".into()))?;
        for (slot, entry) in directory.occupied() {
            if entry.inode_id() as usize != slot || inodes.get(slot).is_none() {
                return Err(FsError::InvalidImage(format!(
                    "directory entry {} does not name its inode",
                    slot
                )));
            }
        }
        if super_block.recompute_free_blocks(&bitmap) {
            warn!(
                "free block counter was stale, {} blocks are free",
                super_block.free_blocks
            );
        }

        let fs = Self {
            block_device,
            super_block,
            bitmap,
            inodes,
            directory,
            options,
        };
        // every file block must be in the data pool, marked and owned once; leaks are tolerated
        if let Some(broken) = fs.check().into_iter().find(|found| {
            matches!(
                found,
                Inconsistency::BlockOutOfRange { .. }
                    | Inconsistency::UnmarkedBlock { .. }
                    | Inconsistency::SharedBlock { .. }
            )
        }) {
            return Err(FsError::InvalidImage(format!("{:?}", broken)));
        }

        info!(
            "mounted {} blocks, {} files, {} blocks free",
            fs.super_block.total_blocks,
            fs.directory.count(),
            fs.super_block.free_blocks
        );
        Ok(fs)
    }

    fn report_geometry(&self) {
        let total = self.super_block.total_blocks as usize;
        info!(
            "formatted {} B ({} B/block), {} blocks",
            total * BLOCK_SZ,
            BLOCK_SZ,
            total
        );
        info!(
            "1 block for the super block, 1 for the bitmap ({} bits), 1 for the directory",
            BITMAP_CAPACITY
        );
        info!(
            "{} blocks for inodes ({} inodes of {} B, {} per block)",
            INODE_BLOCKS, MAX_INODES, INODE_SZ, INODES_PER_BLOCK
        );
        info!(
            "{} blocks for data ({} B)",
            self.super_block.free_blocks,
            self.super_block.free_bytes()
        );
    }

    /// Copy the external file `external` into the volume as `name`.
    ///
    /// Preconditions are checked in a fixed order and the first one failing is
    /// reported; nothing is modified in that case. On disk the update lands as:
    /// inode, file data, bitmap, directory, super block, then a sync.
    pub fn import_file(&mut self, external: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = external.as_ref();
        let not_readable = |source| FsError::NotReadable {
            path: path.to_path_buf(),
            source,
        };
        let mut source = File::open(path).map_err(not_readable)?;
        let metadata = source.metadata().map_err(not_readable)?;
        if !metadata.is_file() {
            return Err(not_readable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let size = metadata.len();

        let free = self.super_block.free_bytes();
        if size > free {
            return Err(FsError::InsufficientSpace { size, free });
        }
        let max = (MAX_BLOCKS_PER_FILE * BLOCK_SZ) as u64;
        if size > max {
            return Err(FsError::FileTooLarge { size, max });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if name.is_empty() || name.contains('\0') {
            return Err(FsError::InvalidName(name.to_string()));
        }
        if self.directory.find_by_name(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let slot = self.inodes.allocate_slot().ok_or(FsError::NoFreeInode)?;
        if self.directory.is_full() {
            return Err(FsError::DirectoryFull);
        }

        let size = size as u32;
        let block_count = DiskInode::total_blocks(size);
        let blocks = self
            .bitmap
            .find_free_blocks(block_count as usize)
            .ok_or(FsError::InsufficientSpace {
                size: size as u64,
                free,
            })?;
        debug!("import {}: inode {}, blocks {:?}", name, slot, blocks);

        let inode = DiskInode::new_file(size, &blocks, now());
        self.inodes.occupy(slot, inode.clone());
        self.directory.insert(slot, name, slot as u32);
        self.super_block.allocated(block_count);

        let device = &*self.block_device;
        InodeTable::write(device, slot, &inode, self.options.persistence)
            .step(PersistStep::Inode)?;
        Self::write_data(device, &mut source, &inode).step(PersistStep::Data)?;
        self.bitmap.store(device).step(PersistStep::Bitmap)?;
        self.directory.store(device).step(PersistStep::Directory)?;
        self.super_block.store(device).step(PersistStep::SuperBlock)?;
        device.sync().step(PersistStep::Sync)?;
        Ok(())
    }

    /// Stream the file into its blocks: full blocks, then the remainder.
    fn write_data(device: &dyn BlockDevice, source: &mut impl Read, inode: &DiskInode) -> io::Result<()> {
        let mut buffer = [0u8; BLOCK_SZ];
        let mut remaining = inode.size as usize;
        for block_id in inode.data_blocks() {
            let len = remaining.min(BLOCK_SZ);
            source.read_exact(&mut buffer[..len])?;
            device.write_at(block_offset(*block_id as usize), &buffer[..len])?;
            remaining -= len;
        }
        Ok(())
    }

    /// Copy the file `name` out of the volume into `external`.
    ///
    /// When the target exists `decide` chooses what happens; a renamed target is
    /// checked again.
    pub fn export_file(
        &self,
        name: &str,
        external: impl AsRef<Path>,
        mut decide: impl FnMut(&Path) -> OverwriteDecision,
    ) -> Result<ExportOutcome> {
        let inode = self
            .directory
            .find_by_name(name)
            .and_then(|slot| self.inodes.get(slot))
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        let mut target = external.as_ref().to_path_buf();
        while target.exists() {
            match decide(&target) {
                OverwriteDecision::Overwrite => break,
                OverwriteDecision::Rename(path) => target = path,
                OverwriteDecision::Abort => return Ok(ExportOutcome::Aborted),
            }
        }

        let mut file = File::create(&target)?;
        let mut buffer = [0u8; BLOCK_SZ];
        let mut remaining = inode.size as usize;
        for block_id in inode.data_blocks() {
            let len = remaining.min(BLOCK_SZ);
            self.block_device
                .read_at(block_offset(*block_id as usize), &mut buffer[..len])?;
            file.write_all(&buffer[..len])?;
            remaining -= len;
        }
        file.sync_all()?;
        debug!("export {} to {}", name, target.display());
        Ok(ExportOutcome::Written(target))
    }

    /// Delete the file `name`.
    ///
    /// On disk the update lands as: directory, inode, bitmap, super block, then a sync.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let slot = self
            .directory
            .find_by_name(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let inode = self
            .inodes
            .free(slot)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.super_block.released(inode.block_count);
        self.bitmap.release(inode.data_blocks());
        self.directory.remove(slot);
        debug!("remove {}: inode {}, blocks {:?}", name, slot, inode.data_blocks());

        let device = &*self.block_device;
        self.directory.store(device).step(PersistStep::Directory)?;
        InodeTable::write(device, slot, &DiskInode::empty(), self.options.persistence)
            .step(PersistStep::Inode)?;
        self.bitmap.store(device).step(PersistStep::Bitmap)?;
        self.super_block.store(device).step(PersistStep::SuperBlock)?;
        device.sync().step(PersistStep::Sync)?;
        Ok(())
    }

    /// Every file in directory order
    pub fn list(&self) -> Listing {
        let entries: Vec<FileInfo> = self
            .directory
            .occupied()
            .filter_map(|(slot, entry)| {
                self.inodes.get(slot).map(|inode| FileInfo {
                    name: entry.name().to_string(),
                    size: inode.size,
                    modified: inode.modified,
                })
            })
            .collect();
        if entries.is_empty() {
            Listing::Empty
        } else {
            let total = entries.len();
            Listing::Files { entries, total }
        }
    }

    /// Free blocks, counted from the bitmap
    pub fn free_space(&self) -> usize {
        self.bitmap.count_free(self.super_block.total_blocks as usize)
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn options(&self) -> FsOptions {
        self.options
    }

    /// Check every volume invariant against the in-memory state.
    pub fn check(&self) -> Vec<Inconsistency> {
        let mut found = Vec::new();
        let total = self.super_block.total_blocks as usize;

        let actual = self.free_space();
        let cached = self.super_block.free_blocks as usize;
        if actual != cached {
            found.push(Inconsistency::FreeCounter { cached, actual });
        }
        found.extend(
            (0..DATA_START)
                .filter(|block| !self.bitmap.is_set(*block))
                .map(Inconsistency::MetadataBlockFree),
        );

        let mut owner: Vec<Option<usize>> = vec![None; total];
        for (slot, inode) in self.inodes.occupied() {
            for &block in inode.data_blocks() {
                let index = block as usize;
                if !(DATA_START..total).contains(&index) {
                    found.push(Inconsistency::BlockOutOfRange { slot, block });
                    continue;
                }
                if !self.bitmap.is_set(index) {
                    found.push(Inconsistency::UnmarkedBlock { slot, block });
                }
                match owner[index] {
                    Some(first) => found.push(Inconsistency::SharedBlock {
                        block,
                        slots: (first, slot),
                    }),
                    None => owner[index] = Some(slot),
                }
            }
            if self.directory.entry(slot).is_free() {
                found.push(Inconsistency::OrphanInode(slot));
            }
        }
        found.extend(
            (DATA_START..total)
                .filter(|block| self.bitmap.is_set(*block) && owner[*block].is_none())
                .map(Inconsistency::LeakedBlock),
        );
        for (slot, entry) in self.directory.occupied() {
            if entry.inode_id() as usize != slot || self.inodes.get(slot).is_none() {
                found.push(Inconsistency::DanglingEntry(slot));
            }
        }
        found
    }

    /// Sync and close the virtual disk, releasing every inode record.
    pub fn shutdown(mut self) -> Result<()> {
        self.block_device.sync()?;
        self.inodes.clear();
        info!("shut down, {} blocks free", self.super_block.free_blocks);
        Ok(())
    }
}
