//! Super block and disk layout.
//!
//! Disk layout:
//! [ super block | inode bitmap | block bitmap | inode table | data blocks ]
//!
//! The super block occupies block 0, the bitmaps blocks 1 and 2, and the
//! inode table starts at block 3 with four 64-byte inodes per block. The
//! data region (data and indirect blocks, addressed by 16-bit pointers)
//! follows the table.

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::param::{IPB, LARGE_DISK, LARGE_DISK_INODES, ROOTINO};

/// On-disk super block. All fields little-endian.
#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Superblock {
    total_inode: u32,
    total_block: u32,
    free_inode: u32,
    free_block: u32,
    root_inode: u32,
}

const_assert!(core::mem::size_of::<Superblock>() == 20);

impl Superblock {
    /// A freshly formatted volume: everything free, root not yet allocated.
    pub fn format(layout: &Layout) -> Self {
        Self {
            total_inode: layout.ninodes.to_le(),
            total_block: layout.nblocks.to_le(),
            free_inode: layout.ninodes.to_le(),
            free_block: layout.nblocks.to_le(),
            root_inode: (ROOTINO as u32).to_le(),
        }
    }

    pub fn total_inode(&self) -> u32 {
        u32::from_le(self.total_inode)
    }

    pub fn total_block(&self) -> u32 {
        u32::from_le(self.total_block)
    }

    pub fn free_inode(&self) -> u32 {
        u32::from_le(self.free_inode)
    }

    pub fn free_block(&self) -> u32 {
        u32::from_le(self.free_block)
    }

    pub fn set_free_inode(&mut self, n: u32) {
        self.free_inode = n.to_le();
    }

    pub fn set_free_block(&mut self, n: u32) {
        self.free_block = n.to_le();
    }
}

/// Geometry-derived block homes. Computed once at startup from the disk's
/// total capacity; never stored on disk.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    /// Inode budget.
    pub ninodes: u32,
    /// Data-region budget (data plus indirect blocks).
    pub nblocks: u32,
    /// Linear index of the first data-region block.
    pub data_start: u32,
    /// Disk capacity in blocks.
    pub disk_blocks: u32,
}

/// Linear block home of the super block.
pub const SUPER_BLOCK: u32 = 0;

/// Linear block home of the inode bitmap.
pub const INODE_BITMAP_BLOCK: u32 = 1;

/// Linear block home of the block bitmap.
pub const BLOCK_BITMAP_BLOCK: u32 = 2;

/// Linear block home of the first inode-table block.
pub const INODE_TABLE_START: u32 = 3;

impl Layout {
    /// Derive the logical budgets from the disk's capacity. A big disk gets
    /// the full inode budget; a small one scales down so the table and data
    /// region still fit.
    pub fn new(disk_blocks: u32) -> Self {
        let ninodes = if disk_blocks >= LARGE_DISK {
            LARGE_DISK_INODES
        } else {
            (disk_blocks / 3).saturating_sub(2)
        };
        let nblocks = 2 * ninodes;
        // The table is rounded up to whole blocks so an inode budget that is
        // not a multiple of four cannot overlap the data region.
        let table_blocks = (ninodes + IPB as u32 - 1) / IPB as u32;
        Self {
            ninodes,
            nblocks,
            data_start: INODE_TABLE_START + table_blocks,
            disk_blocks,
        }
    }

    /// Inode-table block holding inode `i`.
    pub fn iblock(&self, i: u16) -> u32 {
        INODE_TABLE_START + i as u32 / IPB as u32
    }

    /// Linear home of data-region block `k`.
    pub fn dblock(&self, k: u16) -> u32 {
        self.data_start + k as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_disk_gets_full_budget() {
        let l = Layout::new(3600);
        assert_eq!(l.ninodes, 1024);
        assert_eq!(l.nblocks, 2048);
        assert_eq!(l.data_start, 3 + 256);
        assert_eq!(l.iblock(0), 3);
        assert_eq!(l.iblock(5), 4);
        assert_eq!(l.dblock(0), 259);
    }

    #[test]
    fn small_disk_scales_down() {
        let l = Layout::new(300);
        assert_eq!(l.ninodes, 98);
        assert_eq!(l.nblocks, 196);
        assert_eq!(l.data_start, 3 + 25);
        // Table and data region must fit on the disk, and the last inode's
        // table block must sit below the data region.
        assert!(l.data_start + l.nblocks <= 300);
        assert!(l.iblock(97) < l.data_start);
    }

    #[test]
    fn format_counters_start_full() {
        let l = Layout::new(3600);
        let sb = Superblock::format(&l);
        assert_eq!(sb.total_inode(), 1024);
        assert_eq!(sb.free_inode(), 1024);
        assert_eq!(sb.total_block(), 2048);
        assert_eq!(sb.free_block(), 2048);
    }
}
