//! flat-fs
//!
//! flat-fs is a single-volume, single-directory file system stored in a virtual disk
//! file on the host.
//!
//! [`FlatFileSystem`]'s disk layout is fixed: the [`SuperBlock`](super_block::SuperBlock),
//! the bitmap, the directory and the inode table sit in the first blocks and every
//! later block belongs to the data pool. Each structure has an in-memory mirror that
//! is loaded once at mount time and written back block by block as files come and go,
//! so reading involves only memory while every update involves both.
//!
//! flat-fs is divided into layers, from bottom to top:
//!
//! - Disk block device interface layer
//! - Disk layout & data structure layer
//! - Disk block manager layer (bitmap, super block)
//! - index node and directory layer
//! - File system façade

pub mod bitmap;
pub mod block_dev;
pub mod config;
pub mod directory;
pub mod error;
pub mod fs;
pub mod inode_table;
pub mod layout;
pub mod super_block;

pub use block_dev::{BlockDevice, BlockFile};
pub use config::{FsOptions, Persistence, BLOCK_SZ};
pub use error::{FsError, PersistStep, Result};
pub use fs::{ExportOutcome, FileInfo, FlatFileSystem, Inconsistency, Listing, OverwriteDecision};
