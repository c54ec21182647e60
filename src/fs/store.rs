//! Typed access to the five on-disk structures.
//!
//! Every logical read re-issues a disk read and every logical write goes
//! straight back out; nothing is cached across operations. Inodes share
//! table blocks, so an inode update reads the whole 4-inode block, patches
//! one 64-byte slot, and rewrites the block.

use core::mem;

use zerocopy::{AsBytes, FromBytes};

use super::inode::Dinode;
use super::superblock::{Superblock, BLOCK_BITMAP_BLOCK, INODE_BITMAP_BLOCK, SUPER_BLOCK};
use super::Fs;
use crate::disk::{Block, BlockIo};
use crate::error::{FsError, Result};
use crate::param::{BSIZE, IPB};

/// Which of the two allocation bitmaps.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitmapKind {
    Inode,
    Block,
}

impl BitmapKind {
    pub(crate) fn home(self) -> u32 {
        match self {
            BitmapKind::Inode => INODE_BITMAP_BLOCK,
            BitmapKind::Block => BLOCK_BITMAP_BLOCK,
        }
    }

    pub(crate) fn noun(self) -> &'static str {
        match self {
            BitmapKind::Inode => "inodes",
            BitmapKind::Block => "blocks",
        }
    }
}

fn load_record<T: AsBytes + FromBytes + Default>(bytes: &[u8]) -> T {
    let mut record = T::default();
    let n = mem::size_of::<T>();
    record.as_bytes_mut().copy_from_slice(&bytes[..n]);
    record
}

impl<D: BlockIo> Fs<D> {
    pub(crate) fn read_super(&mut self) -> Result<Superblock> {
        let block = self.disk.read_block(SUPER_BLOCK)?;
        Ok(load_record(&block))
    }

    pub(crate) fn write_super(&mut self, sb: &Superblock) -> Result<()> {
        let mut block = [0u8; BSIZE];
        block[..mem::size_of::<Superblock>()].copy_from_slice(sb.as_bytes());
        self.disk.write_block(SUPER_BLOCK, &block)
    }

    pub(crate) fn read_bitmap(&mut self, kind: BitmapKind) -> Result<Block> {
        self.disk.read_block(kind.home())
    }

    pub(crate) fn write_bitmap(&mut self, kind: BitmapKind, block: &Block) -> Result<()> {
        self.disk.write_block(kind.home(), block)
    }

    pub(crate) fn read_inode(&mut self, i: u16) -> Result<Dinode> {
        let home = self.inode_home(i)?;
        let block = self.disk.read_block(home)?;
        let off = (i as usize % IPB) * mem::size_of::<Dinode>();
        Ok(load_record(&block[off..]))
    }

    pub(crate) fn write_inode(&mut self, i: u16, din: &Dinode) -> Result<()> {
        let home = self.inode_home(i)?;
        let mut block = self.disk.read_block(home)?;
        let off = (i as usize % IPB) * mem::size_of::<Dinode>();
        block[off..off + mem::size_of::<Dinode>()].copy_from_slice(din.as_bytes());
        self.disk.write_block(home, &block)
    }

    pub(crate) fn read_data(&mut self, k: u16) -> Result<Block> {
        let home = self.data_home(k)?;
        self.disk.read_block(home)
    }

    pub(crate) fn write_data(&mut self, k: u16, block: &Block) -> Result<()> {
        let home = self.data_home(k)?;
        self.disk.write_block(home, block)
    }

    fn inode_home(&self, i: u16) -> Result<u32> {
        if (i as u32) >= self.layout.ninodes {
            return Err(FsError::ExceedCapacity(self.layout.iblock(i)));
        }
        Ok(self.layout.iblock(i))
    }

    fn data_home(&self, k: u16) -> Result<u32> {
        let home = self.layout.dblock(k);
        if (k as u32) >= self.layout.nblocks || home >= self.layout.disk_blocks {
            return Err(FsError::ExceedCapacity(home));
        }
        Ok(home)
    }
}
