//! Errors reported by the filesystem

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FsError {
    #[error("a disk of {blocks} blocks is smaller than the minimum of {min} blocks")]
    SizeTooSmall { blocks: usize, min: usize },
    #[error("a disk of {blocks} blocks cannot be addressed by a bitmap of {max} bits")]
    SizeTooLarge { blocks: usize, max: usize },
    #[error("cannot read external file {}: {source}", .path.display())]
    NotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{size} bytes do not fit in the {free} free bytes of the disk")]
    InsufficientSpace { size: u64, free: u64 },
    #[error("{size} bytes exceed the per-file limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    #[error("a name of {len} bytes exceeds the limit of {max} bytes")]
    NameTooLong { len: usize, max: usize },
    /// The name is empty or holds a NUL byte, so it could never be looked up again.
    #[error("{0:?} is not a valid file name")]
    InvalidName(String),
    #[error("file {0} already exists")]
    AlreadyExists(String),
    #[error("no free inode left")]
    NoFreeInode,
    #[error("the directory is full")]
    DirectoryFull,
    #[error("file {0} not found")]
    NotFound(String),
    #[error("not a flat-fs image: {0}")]
    InvalidImage(String),
    /// Earlier steps of the operation already reached the disk and were not rolled
    /// back; the in-memory state holds the complete update.
    #[error("{step} was not persisted, the disk is partially updated: {source}")]
    PartiallyPersisted {
        step: PersistStep,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;

/// One write of an ordered multi-structure update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStep {
    Inode,
    Data,
    Bitmap,
    Directory,
    SuperBlock,
    Sync,
}

impl fmt::Display for PersistStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersistStep::Inode => "inode",
            PersistStep::Data => "file data",
            PersistStep::Bitmap => "bitmap",
            PersistStep::Directory => "directory",
            PersistStep::SuperBlock => "super block",
            PersistStep::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// Tags an I/O failure with the step of the update it interrupted
pub(crate) trait PersistExt<T> {
    fn step(self, step: PersistStep) -> Result<T>;
}

impl<T> PersistExt<T> for io::Result<T> {
    fn step(self, step: PersistStep) -> Result<T> {
        self.map_err(|source| FsError::PartiallyPersisted { step, source })
    }
}
