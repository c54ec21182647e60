//! Virtual-to-physical block translation.
//!
//! File contents live behind the classic pointer tree: eight direct
//! pointers, then one, two, and three levels of indirection with a fan-out
//! of 128 (an indirect block holds 128 little-endian 16-bit children).
//!
//! | virtual block  | route  |
//! |----------------|--------|
//! | 0 .. 7         | direct |
//! | 8 .. 135       | single |
//! | 136 .. 16519   | double |
//! | 16520 .. 2113671 | triple |
//!
//! Which pointers are live is decided by `num_block` alone: the single root
//! exists exactly when the file has a ninth block, and so on. Growth
//! allocates indirect blocks the moment their first child appears; shrinking
//! releases an indirect block when its slot 0 is freed. A partially emptied
//! indirect block therefore stays allocated, which is fine for the only
//! callers there are: they always free a contiguous tail.

use super::inode::Dinode;
use super::Fs;
use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, MAXFILE, NDIRECT, NINDIRECT};

/// Route to one virtual block: the slot index at each level of the walk.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Route {
    Direct(usize),
    Single(usize),
    Double(usize, usize),
    Triple(usize, usize, usize),
}

/// First virtual block served by the double-indirect tree.
const DOUBLE_BASE: usize = NDIRECT + NINDIRECT;

/// First virtual block served by the triple-indirect tree.
const TRIPLE_BASE: usize = DOUBLE_BASE + NINDIRECT * NINDIRECT;

pub(crate) fn route(v: usize) -> Result<Route> {
    if v < NDIRECT {
        Ok(Route::Direct(v))
    } else if v < DOUBLE_BASE {
        Ok(Route::Single(v - NDIRECT))
    } else if v < TRIPLE_BASE {
        let t = v - DOUBLE_BASE;
        Ok(Route::Double(t / NINDIRECT, t % NINDIRECT))
    } else if v < MAXFILE {
        let t = v - TRIPLE_BASE;
        Ok(Route::Triple(
            t / (NINDIRECT * NINDIRECT),
            (t / NINDIRECT) % NINDIRECT,
            t % NINDIRECT,
        ))
    } else {
        Err(FsError::FileTooLarge)
    }
}

impl<D: BlockIo> Fs<D> {
    /// Physical home of virtual block `v`, which must be below `num_block`.
    pub(crate) fn locate(&mut self, din: &Dinode, v: u32) -> Result<u16> {
        if v >= din.num_block() as u32 {
            return Err(FsError::Corrupt("virtual block past end of file"));
        }
        match route(v as usize)? {
            Route::Direct(i) => Ok(din.direct(i)),
            Route::Single(i) => self.read_ptr(din.single(), i),
            Route::Double(i, j) => {
                let l1 = self.read_ptr(din.double(), i)?;
                self.read_ptr(l1, j)
            }
            Route::Triple(i, j, k) => {
                let l1 = self.read_ptr(din.triple(), i)?;
                let l2 = self.read_ptr(l1, j)?;
                self.read_ptr(l2, k)
            }
        }
    }

    /// Extend the file by `delta` data blocks, allocating indirect blocks as
    /// their first child appears. Indirect blocks come out of the same free
    /// pool but are not counted in `num_block`.
    pub(crate) fn grow(&mut self, din: &mut Dinode, delta: u32) -> Result<()> {
        for _ in 0..delta {
            let v = din.num_block() as usize;
            let phys = self.allocate_block()?;
            if let Err(e) = self.attach(din, v, phys) {
                let _ = self.release_block(phys);
                return Err(e);
            }
            din.set_num_block(v as u16 + 1);
        }
        Ok(())
    }

    /// Wire freshly allocated block `phys` in as virtual block `v`.
    fn attach(&mut self, din: &mut Dinode, v: usize, phys: u16) -> Result<()> {
        match route(v)? {
            Route::Direct(i) => din.set_direct(i, phys),
            Route::Single(i) => {
                if i == 0 {
                    let root = self.allocate_block()?;
                    din.set_single(root);
                }
                self.write_ptr(din.single(), i, phys)?;
            }
            Route::Double(i, j) => {
                if i == 0 && j == 0 {
                    let root = self.allocate_block()?;
                    din.set_double(root);
                }
                let l1 = if j == 0 {
                    let l1 = self.allocate_block()?;
                    self.write_ptr(din.double(), i, l1)?;
                    l1
                } else {
                    self.read_ptr(din.double(), i)?
                };
                self.write_ptr(l1, j, phys)?;
            }
            Route::Triple(i, j, k) => {
                if i == 0 && j == 0 && k == 0 {
                    let root = self.allocate_block()?;
                    din.set_triple(root);
                }
                let l1 = if j == 0 && k == 0 {
                    let l1 = self.allocate_block()?;
                    self.write_ptr(din.triple(), i, l1)?;
                    l1
                } else {
                    self.read_ptr(din.triple(), i)?
                };
                let l2 = if k == 0 {
                    let l2 = self.allocate_block()?;
                    self.write_ptr(l1, j, l2)?;
                    l2
                } else {
                    self.read_ptr(l1, j)?
                };
                self.write_ptr(l2, k, phys)?;
            }
        }
        Ok(())
    }

    /// Free every data block from virtual block `start_v` to the end of the
    /// file, walking in ascending order. With `capture`, each freed block's
    /// contents are appended to the buffer first. Indirect blocks whose slot
    /// 0 falls in the range are freed too; `num_block` drops to `start_v`.
    pub(crate) fn shrink_from(
        &mut self,
        din: &mut Dinode,
        start_v: u32,
        capture: Option<&mut Vec<u8>>,
    ) -> Result<()> {
        let end = din.num_block() as usize;
        let start = start_v as usize;
        if start >= end {
            return Ok(());
        }
        let mut cap = capture;

        for v in start..end.min(NDIRECT) {
            let b = din.direct(v);
            self.capture_block(b, &mut cap)?;
            self.release_block(b)?;
            din.set_direct(v, 0);
        }

        if end > NDIRECT {
            let live = (end - NDIRECT).min(NINDIRECT);
            let from = start.saturating_sub(NDIRECT);
            if from < live && self.shrink_subtree(din.single(), 1, from, live, &mut cap)? {
                din.set_single(0);
            }
        }

        if end > DOUBLE_BASE {
            let live = (end - DOUBLE_BASE).min(NINDIRECT * NINDIRECT);
            let from = start.saturating_sub(DOUBLE_BASE);
            if from < live && self.shrink_subtree(din.double(), 2, from, live, &mut cap)? {
                din.set_double(0);
            }
        }

        if end > TRIPLE_BASE {
            let live = end - TRIPLE_BASE;
            let from = start.saturating_sub(TRIPLE_BASE);
            if from < live && self.shrink_subtree(din.triple(), 3, from, live, &mut cap)? {
                din.set_triple(0);
            }
        }

        din.set_num_block(start as u16);
        Ok(())
    }

    /// Free data blocks `from ..` of the subtree rooted at indirect block
    /// `root`, holding `live` data blocks. Returns whether `root` itself was
    /// freed (exactly when `from == 0`).
    fn shrink_subtree(
        &mut self,
        root: u16,
        level: u32,
        from: usize,
        live: usize,
        cap: &mut Option<&mut Vec<u8>>,
    ) -> Result<bool> {
        let span = NINDIRECT.pow(level - 1);
        let block = self.read_data(root)?;
        let children = (live + span - 1) / span;
        for c in from / span..children {
            let child = u16::from_le_bytes([block[2 * c], block[2 * c + 1]]);
            if level == 1 {
                self.capture_block(child, cap)?;
                self.release_block(child)?;
            } else {
                let cfrom = from.saturating_sub(c * span);
                let clive = (live - c * span).min(span);
                self.shrink_subtree(child, level - 1, cfrom, clive, cap)?;
            }
        }
        if from == 0 {
            self.release_block(root)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Append the contents of virtual blocks `start_v .. start_v + count` to
    /// `out` without disturbing anything.
    pub(crate) fn read_blocks(
        &mut self,
        din: &Dinode,
        start_v: u32,
        count: u32,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        out.reserve(count as usize * BSIZE);
        for v in start_v..start_v + count {
            let phys = self.locate(din, v)?;
            out.extend_from_slice(&self.read_data(phys)?);
        }
        Ok(())
    }

    fn capture_block(&mut self, b: u16, cap: &mut Option<&mut Vec<u8>>) -> Result<()> {
        if let Some(buf) = cap.as_mut() {
            let block = self.read_data(b)?;
            buf.extend_from_slice(&block);
        }
        Ok(())
    }

    fn read_ptr(&mut self, blk: u16, slot: usize) -> Result<u16> {
        let block = self.read_data(blk)?;
        Ok(u16::from_le_bytes([block[2 * slot], block[2 * slot + 1]]))
    }

    fn write_ptr(&mut self, blk: u16, slot: usize, val: u16) -> Result<()> {
        let mut block = self.read_data(blk)?;
        block[2 * slot..2 * slot + 2].copy_from_slice(&val.to_le_bytes());
        self.write_data(blk, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Fs;
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn routes_cover_all_four_regions() {
        assert_eq!(route(0).unwrap(), Route::Direct(0));
        assert_eq!(route(7).unwrap(), Route::Direct(7));
        assert_eq!(route(8).unwrap(), Route::Single(0));
        assert_eq!(route(135).unwrap(), Route::Single(127));
        assert_eq!(route(136).unwrap(), Route::Double(0, 0));
        assert_eq!(route(136 + 128 + 5).unwrap(), Route::Double(1, 5));
        assert_eq!(route(16_519).unwrap(), Route::Double(127, 127));
        assert_eq!(route(16_520).unwrap(), Route::Triple(0, 0, 0));
        assert_eq!(
            route(16_520 + 2 * 128 * 128 + 3 * 128 + 4).unwrap(),
            Route::Triple(2, 3, 4)
        );
        assert_eq!(route(2_113_671).unwrap(), Route::Triple(127, 127, 127));
        assert!(matches!(route(2_113_672), Err(FsError::FileTooLarge)));
    }

    fn grown_file(fs: &mut Fs<MemDisk>, blocks: u32) -> Dinode {
        let mut din = Dinode::default();
        fs.grow(&mut din, blocks).unwrap();
        din
    }

    #[test]
    fn growth_across_the_single_boundary_costs_one_extra_block() {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();
        let free0 = fs.read_super().unwrap().free_block();

        let mut din = grown_file(&mut fs, 8);
        assert_eq!(fs.read_super().unwrap().free_block(), free0 - 8);

        // Block 8 brings the single root with it.
        fs.grow(&mut din, 1).unwrap();
        assert_eq!(fs.read_super().unwrap().free_block(), free0 - 10);
        assert_eq!(din.num_block(), 9);

        // Every grown block is reachable.
        for v in 0..9 {
            fs.locate(&din, v).unwrap();
        }
    }

    #[test]
    fn double_region_round_trips_data() {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();

        // 140 data blocks reaches 4 blocks into the double region.
        let din = grown_file(&mut fs, 140);
        let v = 137u32;
        let phys = fs.locate(&din, v).unwrap();
        let mut block = [0u8; BSIZE];
        block[0] = 0x77;
        fs.write_data(phys, &block).unwrap();

        let mut out = Vec::new();
        fs.read_blocks(&din, v, 1, &mut out).unwrap();
        assert_eq!(out[0], 0x77);
    }

    #[test]
    fn shrink_returns_every_block_to_the_pool() {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();
        let free0 = fs.read_super().unwrap().free_block();

        let mut din = grown_file(&mut fs, 140);
        fs.shrink_from(&mut din, 0, None).unwrap();
        assert_eq!(din.num_block(), 0);
        assert_eq!(fs.read_super().unwrap().free_block(), free0);
        assert_eq!(din.single(), 0);
        assert_eq!(din.double(), 0);
    }

    #[test]
    fn tail_shrink_keeps_partial_indirects() {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();

        let mut din = grown_file(&mut fs, 12);
        let free_before = fs.read_super().unwrap().free_block();

        // Free virtual blocks 10 and 11: two data blocks, but the single
        // root keeps slots 0 and 1, so it stays allocated.
        fs.shrink_from(&mut din, 10, None).unwrap();
        assert_eq!(din.num_block(), 10);
        assert_eq!(fs.read_super().unwrap().free_block(), free_before + 2);
        assert_ne!(din.single(), 0);
        for v in 0..10 {
            fs.locate(&din, v).unwrap();
        }
    }

    #[test]
    fn shrink_capture_preserves_contents_in_order() {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();

        let mut din = grown_file(&mut fs, 10);
        for v in 0..10u32 {
            let phys = fs.locate(&din, v).unwrap();
            let mut block = [0u8; BSIZE];
            block[0] = v as u8;
            fs.write_data(phys, &block).unwrap();
        }

        let mut cap = Vec::new();
        fs.shrink_from(&mut din, 4, Some(&mut cap)).unwrap();
        assert_eq!(cap.len(), 6 * BSIZE);
        for (n, chunk) in cap.chunks(BSIZE).enumerate() {
            assert_eq!(chunk[0], 4 + n as u8);
        }
    }
}
