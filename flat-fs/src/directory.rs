//! The single flat directory
//!
//! One block holds the number of files followed by [`MAX_INODES`] fixed-size entries.
//! A file's entry lives at the same index as the inode slot it names.
use std::io;

use log::warn;

use crate::block_dev::BlockDevice;
use crate::config::{BLOCK_SZ, DIRECTORY_BLOCK_ID, DIRENT_SZ, MAX_INODES};
use crate::layout::{get_u32, put_u32, DirEntry};

pub struct Directory {
    entries: Vec<DirEntry>,
    /// number of occupied entries
    count: usize,
}

impl Directory {
    /// A directory with every entry free
    pub fn new() -> Self {
        Self {
            entries: vec![DirEntry::empty(); MAX_INODES],
            count: 0,
        }
    }

    /// Read the directory block; `None` if an entry cannot be decoded.
    ///
    /// The file count is rebuilt from the entries rather than trusted.
    pub fn load(block_device: &dyn BlockDevice) -> io::Result<Option<Self>> {
        let mut block = [0u8; BLOCK_SZ];
        block_device.read_block(DIRECTORY_BLOCK_ID, &mut block)?;
        let mut entries = Vec::with_capacity(MAX_INODES);
        for raw in block[4..].chunks_exact(DIRENT_SZ).take(MAX_INODES) {
            match DirEntry::decode(raw) {
                Some(entry) => entries.push(entry),
                None => return Ok(None),
            }
        }
        let count = entries.iter().filter(|entry| !entry.is_free()).count();
        if count != get_u32(&block, 0) as usize {
            warn!(
                "directory claims {} files but holds {}",
                get_u32(&block, 0),
                count
            );
        }
        Ok(Some(Self { entries, count }))
    }

    pub fn store(&self, block_device: &dyn BlockDevice) -> io::Result<()> {
        let mut block = [0u8; BLOCK_SZ];
        put_u32(&mut block, 0, self.count as u32);
        for (entry, raw) in self
            .entries
            .iter()
            .zip(block[4..].chunks_exact_mut(DIRENT_SZ))
        {
            entry.encode(raw);
        }
        block_device.write_block(DIRECTORY_BLOCK_ID, &block)
    }

    /// Slot of the occupied entry named exactly `name`
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.name_bytes() == name.as_bytes())
    }

    /// Bind `name` to `inode` in the free entry `slot`.
    pub fn insert(&mut self, slot: usize, name: &str, inode: u32) {
        debug_assert!(self.entries[slot].is_free());
        self.entries[slot] = DirEntry::new(name, inode);
        self.count += 1;
    }

    /// Free the entry at `slot`, returning what it held.
    pub fn remove(&mut self, slot: usize) -> Option<DirEntry> {
        if self.entries[slot].is_free() {
            return None;
        }
        self.count -= 1;
        Some(core::mem::replace(&mut self.entries[slot], DirEntry::empty()))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == MAX_INODES
    }

    pub fn entry(&self, slot: usize) -> &DirEntry {
        &self.entries[slot]
    }

    /// Occupied entries in slot order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_free())
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::testing::MemDevice;

    #[test]
    fn lookup_is_exact() {
        let mut dir = Directory::new();
        dir.insert(4, "Notes.txt", 4);
        assert_eq!(dir.find_by_name("Notes.txt"), Some(4));
        assert_eq!(dir.find_by_name("notes.txt"), None);
        assert_eq!(dir.find_by_name("Notes"), None);
        assert_eq!(dir.find_by_name(""), None);
    }

    #[test]
    fn count_tracks_occupied_entries() {
        let mut dir = Directory::new();
        dir.insert(0, "a", 0);
        dir.insert(1, "b", 1);
        assert_eq!(dir.count(), 2);
        assert_eq!(dir.remove(0).map(|entry| entry.name().to_string()), Some("a".into()));
        assert_eq!(dir.remove(0), None);
        assert_eq!(dir.count(), 1);
        assert_eq!(dir.find_by_name("a"), None);
        assert_eq!(dir.occupied().map(|(slot, _)| slot).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn full_directory() {
        let mut dir = Directory::new();
        for slot in 0..MAX_INODES {
            dir.insert(slot, &format!("f{}", slot), slot as u32);
        }
        assert!(dir.is_full());
    }

    #[test]
    fn survives_a_store_and_load() {
        let device = MemDevice::new(4 * BLOCK_SZ);
        let mut dir = Directory::new();
        dir.insert(2, "kernel.bin", 2);
        dir.insert(9, "x", 9);
        dir.store(&device).expect("store");

        let mut raw = [0u8; BLOCK_SZ];
        device.read_block(DIRECTORY_BLOCK_ID, &mut raw).expect("read");
        assert_eq!(get_u32(&raw, 0), 2);

        let loaded = Directory::load(&device).expect("load").expect("valid");
        assert_eq!(loaded.count(), 2);
        assert_eq!(loaded.find_by_name("kernel.bin"), Some(2));
        assert_eq!(loaded.entry(9).inode_id(), 9);
        assert!(loaded.entry(0).is_free());
    }
}
