//! Disk layout & data structure layer: about the bitmap
//!
//! A single [`Bitmap`] block tracks every block of the volume: bit `i` is 1 when block
//! `i` is in use, by metadata or by a file. The block holds `BLOCK_SZ * 8` bits, which
//! is more than any valid volume has blocks. Allocation is first-fit over ascending
//! bit positions (look for a 0 bit and set it to 1); deallocation clears the bit.
use std::io;
use std::ops::Range;

use crate::block_dev::BlockDevice;
use crate::config::{BITMAP_BLOCK_ID, BITMAP_CAPACITY, BLOCK_SZ};
use crate::layout::Lba;

/// The bitmap block viewed as 64-bit words
type BitmapBlock = [u64; BLOCK_SZ / 8];

/// Decompose a bit into (bits64_pos, inner_pos)
fn decomposition(bit: usize) -> (usize, usize) {
    (bit / 64, bit % 64)
}

/// In-memory copy of the bitmap block
pub struct Bitmap {
    bits: Box<BitmapBlock>,
}

impl Bitmap {
    /// A bitmap with every bit clear
    pub fn new() -> Self {
        Self {
            bits: Box::new([0u64; BLOCK_SZ / 8]),
        }
    }

    /// Reload the whole bitmap with one block read.
    pub fn load(block_device: &dyn BlockDevice) -> io::Result<Self> {
        let mut block = [0u8; BLOCK_SZ];
        block_device.read_block(BITMAP_BLOCK_ID, &mut block)?;
        let mut bitmap = Self::new();
        for (bits64, bytes) in bitmap.bits.iter_mut().zip(block.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes);
            *bits64 = u64::from_le_bytes(word);
        }
        Ok(bitmap)
    }

    /// Persist the whole bitmap with one block write.
    pub fn store(&self, block_device: &dyn BlockDevice) -> io::Result<()> {
        let mut block = [0u8; BLOCK_SZ];
        for (bits64, bytes) in self.bits.iter().zip(block.chunks_exact_mut(8)) {
            bytes.copy_from_slice(&bits64.to_le_bytes());
        }
        block_device.write_block(BITMAP_BLOCK_ID, &block)
    }

    /// bitmap max size in bits
    pub fn capacity(&self) -> usize {
        BITMAP_CAPACITY
    }

    pub fn is_set(&self, bit: usize) -> bool {
        let (bits64_pos, inner_pos) = decomposition(bit);
        self.bits[bits64_pos] & (1u64 << inner_pos) != 0
    }

    /// Mark every block of `range` as used
    pub fn mark(&mut self, range: Range<usize>) {
        for bit in range {
            let (bits64_pos, inner_pos) = decomposition(bit);
            self.bits[bits64_pos] |= 1u64 << inner_pos;
        }
    }

    /// Allocate the first `count` free blocks in ascending order.
    ///
    /// Either every requested block is allocated or none is: when the bitmap runs out
    /// the blocks picked so far are cleared again and `None` is returned.
    pub fn find_free_blocks(&mut self, count: usize) -> Option<Vec<Lba>> {
        let mut found = Vec::with_capacity(count);
        let mut bits64_pos = 0;
        while found.len() < count {
            match self.bits[bits64_pos..]
                .iter()
                .position(|bits64| *bits64 != u64::MAX)
            {
                Some(skip) => {
                    bits64_pos += skip;
                    let inner_pos = self.bits[bits64_pos].trailing_ones() as usize;
                    self.bits[bits64_pos] |= 1u64 << inner_pos;
                    found.push((bits64_pos * 64 + inner_pos) as Lba);
                }
                None => {
                    self.release(&found);
                    return None;
                }
            }
        }
        Some(found)
    }

    /// Clear the bit of every block in `blocks`; clearing a clear bit is a no-op, and
    /// so is a block past the bitmap's capacity.
    pub fn release(&mut self, blocks: &[Lba]) {
        for block in blocks.iter().filter(|block| (**block as usize) < BITMAP_CAPACITY) {
            let (bits64_pos, inner_pos) = decomposition(*block as usize);
            self.bits[bits64_pos] &= !(1u64 << inner_pos);
        }
    }

    /// Number of clear bits among the first `limit` blocks
    pub fn count_free(&self, limit: usize) -> usize {
        (0..limit.min(BITMAP_CAPACITY))
            .filter(|bit| !self.is_set(*bit))
            .count()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::testing::MemDevice;

    #[test]
    fn allocates_first_fit_in_ascending_order() {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..3);
        bitmap.mark(4..6);
        assert_eq!(bitmap.find_free_blocks(3), Some(vec![3, 6, 7]));
        assert!(bitmap.is_set(3) && bitmap.is_set(7));
        assert!(!bitmap.is_set(8));
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..63);
        assert_eq!(bitmap.find_free_blocks(3), Some(vec![63, 64, 65]));
    }

    #[test]
    fn exhausted_bitmap_keeps_nothing() {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..BITMAP_CAPACITY - 2);
        assert_eq!(bitmap.find_free_blocks(3), None);
        assert_eq!(bitmap.count_free(BITMAP_CAPACITY), 2);
        assert_eq!(
            bitmap.find_free_blocks(2),
            Some(vec![BITMAP_CAPACITY as Lba - 2, BITMAP_CAPACITY as Lba - 1])
        );
    }

    #[test]
    fn release_is_idempotent() {
        let mut bitmap = Bitmap::new();
        let blocks = bitmap.find_free_blocks(4).expect("alloc");
        bitmap.release(&blocks[1..3]);
        bitmap.release(&blocks[1..3]);
        assert_eq!(bitmap.count_free(8), 6);
        assert_eq!(bitmap.find_free_blocks(1), Some(vec![1]));
    }

    #[test]
    fn release_ignores_blocks_past_the_capacity() {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..4);
        bitmap.release(&[BITMAP_CAPACITY as Lba, 40_000, 2]);
        assert_eq!(bitmap.count_free(8), 5);
        assert!(!bitmap.is_set(2));
    }

    #[test]
    fn count_free_is_limited_to_the_volume() {
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..10);
        assert_eq!(bitmap.count_free(16), 6);
        assert_eq!(bitmap.count_free(10), 0);
    }

    #[test]
    fn survives_a_store_and_load() {
        let device = MemDevice::new(4 * BLOCK_SZ);
        let mut bitmap = Bitmap::new();
        bitmap.mark(0..9);
        bitmap.mark(100..101);
        bitmap.store(&device).expect("store");

        let mut raw = [0u8; BLOCK_SZ];
        device.read_block(BITMAP_BLOCK_ID, &mut raw).expect("read");
        // bit i lives in byte i / 8, least significant bit first
        assert_eq!(raw[0], 0xFF);
        assert_eq!(raw[1], 0x01);
        assert_eq!(raw[12], 0x10);

        let loaded = Bitmap::load(&device).expect("load");
        assert_eq!(loaded.count_free(128), 128 - 10);
        assert!(loaded.is_set(100));
    }
}
