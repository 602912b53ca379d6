//! index node(inode, namely file control block) layer
//!
//! [`DiskInode`] sits at a fixed position of the inode table on disk, while
//! [`InodeTable`] keeps a mirror of every slot in memory: a slot is
//! [`Slot::Occupied`] with a copy of its inode exactly while the persisted inode is
//! not free. Only the façade decides when a slot changes state; the table persists
//! single slots on request.
use std::io;

use log::warn;

use crate::block_dev::{block_offset, BlockDevice};
use crate::config::{Persistence, INODES_PER_BLOCK, INODE_SZ, INODE_TABLE_START, MAX_INODES};
use crate::layout::DiskInode;

/// In-memory state of one inode slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Free,
    Occupied(DiskInode),
}

impl Slot {
    /// Empty the slot, handing back the inode it held.
    pub fn take(&mut self) -> Option<DiskInode> {
        match core::mem::replace(self, Slot::Free) {
            Slot::Free => None,
            Slot::Occupied(inode) => Some(inode),
        }
    }

    pub fn inode(&self) -> Option<&DiskInode> {
        match self {
            Slot::Free => None,
            Slot::Occupied(inode) => Some(inode),
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

/// Byte position of an inode slot on the device
pub fn disk_inode_pos(slot: usize) -> u64 {
    let block_id = INODE_TABLE_START + slot / INODES_PER_BLOCK;
    block_offset(block_id) + ((slot % INODES_PER_BLOCK) * INODE_SZ) as u64
}

pub struct InodeTable {
    slots: Vec<Slot>,
}

impl InodeTable {
    /// A table whose slots are all free
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Free; MAX_INODES],
        }
    }

    /// Read every persisted slot; `None` if one holds an inconsistent inode.
    pub fn load(block_device: &dyn BlockDevice) -> io::Result<Option<Self>> {
        let mut slots = Vec::with_capacity(MAX_INODES);
        let mut buf = [0u8; INODE_SZ];
        for slot in 0..MAX_INODES {
            block_device.read_at(disk_inode_pos(slot), &mut buf)?;
            let inode = match DiskInode::decode(&buf) {
                Some(inode) => inode,
                None => return Ok(None),
            };
            slots.push(if inode.free {
                Slot::Free
            } else {
                Slot::Occupied(inode)
            });
        }
        Ok(Some(Self { slots }))
    }

    /// Persist `inode` into `slot` and sync the device.
    ///
    /// Under [`Persistence::Lenient`] a failure is logged and swallowed.
    pub fn write(
        block_device: &dyn BlockDevice,
        slot: usize,
        inode: &DiskInode,
        persistence: Persistence,
    ) -> io::Result<()> {
        assert!(slot < MAX_INODES);
        let mut buf = [0u8; INODE_SZ];
        inode.encode(&mut buf);
        let result = block_device
            .write_at(disk_inode_pos(slot), &buf)
            .and_then(|()| block_device.sync());
        match (result, persistence) {
            (Err(err), Persistence::Lenient) => {
                warn!("inode {} was not written, continuing: {}", slot, err);
                Ok(())
            }
            (result, _) => result,
        }
    }

    /// Index of the first free slot
    pub fn allocate_slot(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_free)
    }

    /// Record `inode` as the content of a free slot.
    pub fn occupy(&mut self, slot: usize, inode: DiskInode) {
        debug_assert!(self.slots[slot].is_free());
        debug_assert!(!inode.free);
        self.slots[slot] = Slot::Occupied(inode);
    }

    /// Release the in-memory record of `slot`, leaving the slot free.
    pub fn free(&mut self, slot: usize) -> Option<DiskInode> {
        self.slots[slot].take()
    }

    pub fn get(&self, slot: usize) -> Option<&DiskInode> {
        self.slots.get(slot).and_then(Slot::inode)
    }

    /// Occupied slots with their inodes
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &DiskInode)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, state)| state.inode().map(|inode| (slot, inode)))
    }

    /// Drop every in-memory record
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| {
            slot.take();
        });
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::testing::{FaultyDevice, MemDevice};
    use crate::config::{BLOCK_SZ, DATA_START};

    fn formatted_device() -> MemDevice {
        let device = MemDevice::new(DATA_START * BLOCK_SZ);
        for slot in 0..MAX_INODES {
            InodeTable::write(&device, slot, &DiskInode::empty(), Persistence::Strict)
                .expect("write");
        }
        device
    }

    #[test]
    fn slot_positions_follow_the_table_geometry() {
        assert_eq!(disk_inode_pos(0), block_offset(INODE_TABLE_START));
        assert_eq!(disk_inode_pos(1), block_offset(INODE_TABLE_START) + INODE_SZ as u64);
        assert_eq!(
            disk_inode_pos(INODES_PER_BLOCK + 2),
            block_offset(INODE_TABLE_START + 1) + 2 * INODE_SZ as u64
        );
        let last = disk_inode_pos(MAX_INODES - 1) + INODE_SZ as u64;
        assert!(last <= block_offset(DATA_START));
    }

    #[test]
    fn load_mirrors_the_persisted_free_flags() {
        let device = formatted_device();
        let inode = DiskInode::new_file(5000, &[DATA_START as u32, DATA_START as u32 + 1], 77);
        InodeTable::write(&device, 12, &inode, Persistence::Strict).expect("write");

        let table = InodeTable::load(&device).expect("load").expect("consistent");
        assert_eq!(table.get(12), Some(&inode));
        assert_eq!(table.occupied().count(), 1);
        assert_eq!(table.allocate_slot(), Some(0));
    }

    #[test]
    fn freeing_a_slot_clears_the_record() {
        let mut table = InodeTable::new();
        table.occupy(0, DiskInode::new_file(1, &[20], 1));
        table.occupy(1, DiskInode::new_file(0, &[], 1));
        assert_eq!(table.allocate_slot(), Some(2));

        let inode = table.free(0).expect("occupied");
        assert_eq!(inode.data_blocks(), &[20]);
        assert_eq!(table.get(0), None);
        assert_eq!(table.free(0), None);
        assert_eq!(table.allocate_slot(), Some(0));

        table.clear();
        assert_eq!(table.occupied().count(), 0);
    }

    #[test]
    fn exhausted_table_has_no_slot() {
        let mut table = InodeTable::new();
        for slot in 0..MAX_INODES {
            table.occupy(slot, DiskInode::new_file(0, &[], 0));
        }
        assert_eq!(table.allocate_slot(), None);
    }

    #[test]
    fn lenient_writes_swallow_failures() {
        let table_start = block_offset(INODE_TABLE_START);
        let (device, armed) = FaultyDevice::new(DATA_START * BLOCK_SZ, table_start, u64::MAX);
        armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let inode = DiskInode::empty();

        assert!(InodeTable::write(&device, 3, &inode, Persistence::Strict).is_err());
        assert!(InodeTable::write(&device, 3, &inode, Persistence::Lenient).is_ok());
    }
}
