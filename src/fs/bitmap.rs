//! Inode and block allocation.
//!
//! One bit per inode in block 1, one bit per data-region block in block 2,
//! least-significant bit first within each byte. A set bit means owned. The
//! free counters in the super block move in lockstep with the bitmaps.

use log::debug;

use super::store::BitmapKind;
use super::Fs;
use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::param::BSIZE;

impl<D: BlockIo> Fs<D> {
    /// Claim the first free inode. The new inode's access time is cleared
    /// as the not-yet-built sentinel.
    pub fn allocate_inode(&mut self) -> Result<u16> {
        let mut sb = self.read_super()?;
        let i = self.bitmap_claim(BitmapKind::Inode, sb.total_inode())?;
        sb.set_free_inode(sb.free_inode().saturating_sub(1));
        self.write_super(&sb)?;

        let mut din = self.read_inode(i)?;
        din.clear_atime();
        self.write_inode(i, &din)?;
        debug!("allocate inode {}", i);
        Ok(i)
    }

    /// Claim the first free data-region block, zero-filled.
    pub fn allocate_block(&mut self) -> Result<u16> {
        let mut sb = self.read_super()?;
        let b = self.bitmap_claim(BitmapKind::Block, sb.total_block())?;
        sb.set_free_block(sb.free_block().saturating_sub(1));
        self.write_super(&sb)?;

        self.write_data(b, &[0u8; BSIZE])?;
        debug!("allocate block {}", b);
        Ok(b)
    }

    pub fn release_inode(&mut self, i: u16) -> Result<()> {
        let mut sb = self.read_super()?;
        self.bitmap_release(BitmapKind::Inode, i)?;
        sb.set_free_inode(sb.free_inode() + 1);
        self.write_super(&sb)?;
        debug!("release inode {}", i);
        Ok(())
    }

    pub fn release_block(&mut self, b: u16) -> Result<()> {
        let mut sb = self.read_super()?;
        self.bitmap_release(BitmapKind::Block, b)?;
        sb.set_free_block(sb.free_block() + 1);
        self.write_super(&sb)?;
        debug!("release block {}", b);
        Ok(())
    }

    /// Linear scan for the first zero bit below `limit`; sets it.
    fn bitmap_claim(&mut self, kind: BitmapKind, limit: u32) -> Result<u16> {
        let mut map = self.read_bitmap(kind)?;
        for idx in 0..limit {
            let m = 1u8 << (idx % 8);
            if map[(idx / 8) as usize] & m == 0 {
                map[(idx / 8) as usize] |= m;
                self.write_bitmap(kind, &map)?;
                return Ok(idx as u16);
            }
        }
        Err(FsError::NoSpace(kind.noun()))
    }

    fn bitmap_release(&mut self, kind: BitmapKind, idx: u16) -> Result<()> {
        let mut map = self.read_bitmap(kind)?;
        let m = 1u8 << (idx % 8);
        if map[(idx / 8) as usize] & m == 0 {
            return Err(FsError::Corrupt("releasing a free slot"));
        }
        map[(idx / 8) as usize] &= !m;
        self.write_bitmap(kind, &map)
    }
}
