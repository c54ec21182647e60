//! File system implementation. Five layers:
//!   + Blocks: bitmap allocator for inodes and data-region blocks.
//!   + Addresses: direct and indirect pointer trees over file contents.
//!   + Files: inode records, byte-range reads and writes, timestamps.
//!   + Directories: files whose payload is a list of child inode indices.
//!   + Names: paths like /usr/doc/notes resolved against a working
//!     directory.
//!
//! All persistent state lives on the disk behind [`crate::disk::BlockIo`];
//! the file system holds only the geometry it derived at startup and
//! whatever block it is currently working on. Every operation re-reads what
//! it needs, so there is no cache to invalidate and no dirty state to lose.

mod addr;
mod bitmap;
mod dir;
mod inode;
mod path;
mod store;
mod superblock;
mod time;

pub use inode::{Dinode, Perm, PermClass, Stamp, TouchScope};
pub use path::{FileName, Path};
pub use superblock::{Layout, Superblock};
pub use time::Timestamp;

use log::info;

use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, DIR_ALL_ALLOW, ROOTINO};

/// The file system: a disk plus the layout derived from its capacity.
///
/// Threaded mutably through every operation; there is exactly one per
/// process and no state outside it.
pub struct Fs<D> {
    pub(crate) disk: D,
    pub(crate) layout: Layout,
}

impl<D: BlockIo> Fs<D> {
    pub fn new(disk: D) -> Self {
        let layout = Layout::new(disk.total_blocks());
        info!(
            "disk of {} blocks: {} inodes, {} data blocks, data region at {}",
            layout.disk_blocks, layout.ninodes, layout.nblocks, layout.data_start
        );
        Self { disk, layout }
    }

    /// Reinitialize the volume: fresh super block, empty bitmaps, and the
    /// root directory as inode 0, its own parent, named `/`.
    pub fn format(&mut self) -> Result<()> {
        let sb = Superblock::format(&self.layout);
        self.write_super(&sb)?;
        let zero = [0u8; BSIZE];
        self.write_bitmap(store::BitmapKind::Inode, &zero)?;
        self.write_bitmap(store::BitmapKind::Block, &zero)?;

        let root = self.allocate_inode()?;
        if root != ROOTINO {
            return Err(FsError::Corrupt("root did not land on inode 0"));
        }
        let mut din = Dinode::default();
        din.set_info(DIR_ALL_ALLOW);
        din.set_root_name();
        din.set_num_link(1);
        din.set_parent(ROOTINO);
        din.stamp(Stamp::ACCESS | Stamp::MODIFY | Stamp::CHANGE, Timestamp::now());
        self.write_inode(root, &din)?;
        info!("formatted: {} inodes, {} blocks", self.layout.ninodes, self.layout.nblocks);
        Ok(())
    }

    /// Pass the shutdown on to the disk process.
    pub fn shutdown(&mut self) -> Result<()> {
        self.disk.shutdown()
    }
}

/// Test-only invariant check: set bits plus the free counter must equal the
/// total, for both bitmaps.
#[cfg(test)]
pub(crate) fn check_counters<D: BlockIo>(fs: &mut Fs<D>) {
    let sb = fs.read_super().unwrap();
    for (kind, total, free) in [
        (store::BitmapKind::Inode, sb.total_inode(), sb.free_inode()),
        (store::BitmapKind::Block, sb.total_block(), sb.free_block()),
    ] {
        let map = fs.read_bitmap(kind).unwrap();
        let set: u32 = map.iter().map(|b| b.count_ones()).sum();
        assert_eq!(set + free, total);
    }
}
