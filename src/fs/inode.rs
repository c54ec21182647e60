//! Inodes.
//!
//! An inode is a 64-byte record describing one file or directory: its packed
//! `info` word (kind, owner, permission triples), its name, size, timestamps,
//! and the pointer tree over its data blocks. Four inodes share each block of
//! the inode table; updates read the whole table block, patch one 64-byte
//! slot, and write the block back.
//!
//! This module also holds the byte-range engine: overwrite, insert, and
//! delete of arbitrary ranges, whole-file reads, truncation, and the
//! timestamp bookkeeping that accompanies each of them. Insert and delete
//! work by capturing the tail of the file into memory, freeing its blocks,
//! and rewriting the shifted bytes.

use core::mem;

use bitflags::bitflags;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use super::path::FileName;
use super::time::Timestamp;
use super::Fs;
use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, DIRSIZ, MAXFILE, NDIRECT, ROOTINO};

/// On-disk inode structure. All multi-byte fields little-endian.
#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Dinode {
    /// Packed kind/owner/permission word.
    info: u32,

    /// File name, NUL-padded.
    name: [u8; DIRSIZ],

    /// Size of file (bytes).
    size_file: u32,

    time_access: u32,
    time_modify: u32,
    time_change: u32,

    /// Count of data blocks. Indirect blocks are not counted here.
    num_block: u16,

    /// Number of links to inode in file system.
    num_link: u16,

    /// Inode index of the parent directory. The root is its own parent.
    parent: u16,

    /// Direct data-block pointers.
    direct: [u16; NDIRECT],

    /// Single/double/triple indirect roots.
    single: u16,
    double: u16,
    triple: u16,
}

const_assert!(mem::size_of::<Dinode>() == 64);

bitflags! {
    /// One permission triple out of the packed `info` word.
    pub struct Perm: u32 {
        const EXEC = 0b001;
        const WRITE = 0b010;
        const READ = 0b100;
    }
}

/// Owner of a permission triple, with its bit position inside `info`.
#[derive(Clone, Copy)]
pub enum PermClass {
    Owner,
    Group,
    Public,
}

impl PermClass {
    fn shift(self) -> u32 {
        match self {
            PermClass::Owner => 9,
            PermClass::Group => 12,
            PermClass::Public => 15,
        }
    }
}

impl core::fmt::Display for Perm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Perm::READ) { 'r' } else { '-' },
            if self.contains(Perm::WRITE) { 'w' } else { '-' },
            if self.contains(Perm::EXEC) { 'x' } else { '-' },
        )
    }
}

impl Dinode {
    pub fn info(&self) -> u32 {
        u32::from_le(self.info)
    }

    pub fn set_info(&mut self, info: u32) {
        self.info = info.to_le();
    }

    /// Bit 0 of `info`.
    pub fn is_dir(&self) -> bool {
        self.info() & 1 != 0
    }

    /// Bits 1-4 of `info`.
    pub fn owner_id(&self) -> u32 {
        (self.info() >> 1) & 0xf
    }

    /// Bits 5-8 of `info`.
    pub fn group_id(&self) -> u32 {
        (self.info() >> 5) & 0xf
    }

    pub fn perm(&self, class: PermClass) -> Perm {
        Perm::from_bits_truncate((self.info() >> class.shift()) & 0b111)
    }

    /// `ls -l`-style mode column: kind then the three triples.
    pub fn mode_string(&self) -> String {
        format!(
            "{}{}{}{}",
            if self.is_dir() { 'd' } else { '-' },
            self.perm(PermClass::Owner),
            self.perm(PermClass::Group),
            self.perm(PermClass::Public),
        )
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    /// Fill in name. Names shorter than the field are NUL-padded.
    pub fn set_name(&mut self, name: &FileName<'_>) {
        let bytes = name.as_bytes();
        self.name = [0; DIRSIZ];
        self.name[..bytes.len()].copy_from_slice(bytes);
    }

    /// The root's name is the one name no `FileName` can spell.
    pub fn set_root_name(&mut self) {
        self.name = [0; DIRSIZ];
        self.name[0] = b'/';
    }

    pub fn size(&self) -> u32 {
        u32::from_le(self.size_file)
    }

    pub fn set_size(&mut self, size: u32) {
        self.size_file = size.to_le();
    }

    pub fn atime(&self) -> Timestamp {
        Timestamp(u32::from_le(self.time_access))
    }

    pub fn mtime(&self) -> Timestamp {
        Timestamp(u32::from_le(self.time_modify))
    }

    pub fn ctime(&self) -> Timestamp {
        Timestamp(u32::from_le(self.time_change))
    }

    pub fn clear_atime(&mut self) {
        self.time_access = 0;
    }

    pub fn stamp(&mut self, fields: Stamp, t: Timestamp) {
        if fields.contains(Stamp::ACCESS) {
            self.time_access = t.raw().to_le();
        }
        if fields.contains(Stamp::MODIFY) {
            self.time_modify = t.raw().to_le();
        }
        if fields.contains(Stamp::CHANGE) {
            self.time_change = t.raw().to_le();
        }
    }

    pub fn num_block(&self) -> u16 {
        u16::from_le(self.num_block)
    }

    pub fn set_num_block(&mut self, n: u16) {
        self.num_block = n.to_le();
    }

    pub fn num_link(&self) -> u16 {
        u16::from_le(self.num_link)
    }

    pub fn set_num_link(&mut self, n: u16) {
        self.num_link = n.to_le();
    }

    pub fn parent(&self) -> u16 {
        u16::from_le(self.parent)
    }

    pub fn set_parent(&mut self, p: u16) {
        self.parent = p.to_le();
    }

    pub fn direct(&self, i: usize) -> u16 {
        u16::from_le(self.direct[i])
    }

    pub fn set_direct(&mut self, i: usize, b: u16) {
        self.direct[i] = b.to_le();
    }

    pub fn single(&self) -> u16 {
        u16::from_le(self.single)
    }

    pub fn set_single(&mut self, b: u16) {
        self.single = b.to_le();
    }

    pub fn double(&self) -> u16 {
        u16::from_le(self.double)
    }

    pub fn set_double(&mut self, b: u16) {
        self.double = b.to_le();
    }

    pub fn triple(&self) -> u16 {
        u16::from_le(self.triple)
    }

    pub fn set_triple(&mut self, b: u16) {
        self.triple = b.to_le();
    }
}

bitflags! {
    /// Timestamp fields selected by `touch`.
    pub struct Stamp: u8 {
        const ACCESS = 1;
        const MODIFY = 2;
        const CHANGE = 4;
    }
}

/// How far up the tree a `touch` reaches.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum TouchScope {
    SelfOnly,
    WithAncestors,
}

impl<D: BlockIo> Fs<D> {
    /// Stamp `fields` with the current time on inode `i` and, when asked,
    /// on every ancestor up to the root.
    pub fn touch(&mut self, i: u16, scope: TouchScope, fields: Stamp) -> Result<()> {
        let now = Timestamp::now();
        let mut cur = i;
        let mut steps = 0u32;
        loop {
            let mut din = self.read_inode(cur)?;
            din.stamp(fields, now);
            self.write_inode(cur, &din)?;
            if scope == TouchScope::SelfOnly || cur == ROOTINO {
                return Ok(());
            }
            cur = din.parent();
            steps += 1;
            if steps > self.layout.ninodes {
                return Err(FsError::Corrupt("parent chain does not terminate"));
            }
        }
    }

    /// Initialize a freshly allocated inode. Stamps modify and change times
    /// and cascades an access-time bump up the parent chain; the inode's own
    /// access time stays at the allocator's sentinel until something reads
    /// or writes it.
    pub fn build(
        &mut self,
        i: u16,
        info: u32,
        name: &FileName<'_>,
        size: u32,
        nblk: u16,
        nlink: u16,
        parent: u16,
    ) -> Result<()> {
        let mut din = Dinode::default();
        din.set_info(info);
        din.set_name(name);
        din.set_size(size);
        din.set_num_block(nblk);
        din.set_num_link(nlink);
        din.set_parent(parent);
        din.stamp(Stamp::MODIFY | Stamp::CHANGE, Timestamp::now());
        self.write_inode(i, &din)?;
        if i != ROOTINO {
            self.touch(parent, TouchScope::WithAncestors, Stamp::ACCESS)?;
        }
        Ok(())
    }

    /// Overwrite `data.len()` bytes starting at `pos`, extending the file if
    /// needed.
    pub fn write_range(&mut self, i: u16, pos: u32, data: &[u8]) -> Result<()> {
        self.write_stream(i, pos, data)?;
        self.touch(i, TouchScope::WithAncestors, Stamp::ACCESS | Stamp::MODIFY)?;
        self.touch(i, TouchScope::SelfOnly, Stamp::CHANGE)
    }

    /// Insert `data.len()` bytes at `pos` (clamped to the current size),
    /// shifting the existing tail right.
    pub fn insert_range(&mut self, i: u16, pos: u32, data: &[u8]) -> Result<()> {
        let mut din = self.read_inode(i)?;
        let size = din.size();
        let pos = pos.min(size);
        let base = pos as usize / BSIZE * BSIZE;
        let boff = pos as usize - base;
        let live = size as usize - base;

        // Capture the tail from the block containing `pos`, free its blocks,
        // then rewrite with the new bytes spliced in.
        let mut tail = Vec::new();
        self.shrink_from(&mut din, (base / BSIZE) as u32, Some(&mut tail))?;
        din.set_size(base as u32);
        self.write_inode(i, &din)?;

        let mut overlay = Vec::with_capacity(live + data.len());
        overlay.extend_from_slice(&tail[..boff]);
        overlay.extend_from_slice(data);
        overlay.extend_from_slice(&tail[boff..live]);
        self.write_stream(i, base as u32, &overlay)?;

        self.touch(i, TouchScope::WithAncestors, Stamp::ACCESS | Stamp::MODIFY)?;
        self.touch(i, TouchScope::SelfOnly, Stamp::CHANGE)
    }

    /// Delete up to `len` bytes starting at `pos`, shifting the tail left.
    pub fn delete_range(&mut self, i: u16, pos: u32, len: u32) -> Result<()> {
        let mut din = self.read_inode(i)?;
        let size = din.size();
        let pos = pos.min(size);
        let len = len.min(size - pos);
        if len != 0 {
            let base = pos as usize / BSIZE * BSIZE;
            let boff = pos as usize - base;
            let live = size as usize - base;

            let mut tail = Vec::new();
            self.shrink_from(&mut din, (base / BSIZE) as u32, Some(&mut tail))?;
            din.set_size(base as u32);
            self.write_inode(i, &din)?;

            let mut overlay = Vec::with_capacity(live - len as usize);
            overlay.extend_from_slice(&tail[..boff]);
            overlay.extend_from_slice(&tail[boff + len as usize..live]);
            self.write_stream(i, base as u32, &overlay)?;
        }
        self.touch(i, TouchScope::WithAncestors, Stamp::ACCESS | Stamp::MODIFY)?;
        self.touch(i, TouchScope::SelfOnly, Stamp::CHANGE)
    }

    /// Discard all contents: size drops to zero, every data and indirect
    /// block returns to the free pool.
    pub fn truncate(&mut self, i: u16) -> Result<()> {
        let mut din = self.read_inode(i)?;
        self.shrink_from(&mut din, 0, None)?;
        din.set_size(0);
        self.write_inode(i, &din)?;
        self.touch(i, TouchScope::WithAncestors, Stamp::ACCESS | Stamp::MODIFY)?;
        self.touch(i, TouchScope::SelfOnly, Stamp::CHANGE)
    }

    /// The whole data region, `num_block x 256` bytes, trailing NUL padding
    /// included. Bumps access times up to the root.
    pub fn read_all(&mut self, i: u16) -> Result<Vec<u8>> {
        let buf = self.read_payload(i)?;
        self.touch(i, TouchScope::WithAncestors, Stamp::ACCESS)?;
        Ok(buf)
    }

    /// Same as [`Fs::read_all`] minus the timestamp bump. Directory walks use
    /// this so a lookup does not rewrite the tree it is reading.
    pub(crate) fn read_payload(&mut self, i: u16) -> Result<Vec<u8>> {
        let din = self.read_inode(i)?;
        let mut buf = Vec::with_capacity(din.num_block() as usize * BSIZE);
        self.read_blocks(&din, 0, din.num_block() as u32, &mut buf)?;
        Ok(buf)
    }

    /// Release the inode itself. The caller must already have freed the
    /// data and indirect blocks.
    pub fn destroy(&mut self, i: u16) -> Result<()> {
        let parent = self.read_inode(i)?.parent();
        self.touch(i, TouchScope::SelfOnly, Stamp::CHANGE)?;
        if i != ROOTINO {
            self.touch(parent, TouchScope::WithAncestors, Stamp::ACCESS | Stamp::MODIFY)?;
        }
        self.release_inode(i)
    }

    /// Range write without timestamp bookkeeping. Grows the file first, then
    /// walks virtual blocks writing the first one partially from `pos % 256`
    /// and the rest from offset 0.
    pub(crate) fn write_stream(&mut self, i: u16, pos: u32, data: &[u8]) -> Result<()> {
        let mut din = self.read_inode(i)?;
        let new_size = din.size().max(pos + data.len() as u32);
        let needed = (new_size as usize + BSIZE - 1) / BSIZE;
        if needed > MAXFILE {
            return Err(FsError::FileTooLarge);
        }
        let cur_blocks = din.num_block() as usize;
        if needed > cur_blocks {
            self.grow(&mut din, (needed - cur_blocks) as u32)?;
        }

        let mut v = pos as usize / BSIZE;
        let mut off = pos as usize % BSIZE;
        let mut written = 0;
        while written < data.len() {
            let phys = self.locate(&din, v as u32)?;
            let mut block = self.read_data(phys)?;
            let n = (BSIZE - off).min(data.len() - written);
            block[off..off + n].copy_from_slice(&data[written..written + n]);
            self.write_data(phys, &block)?;
            written += n;
            off = 0;
            v += 1;
        }

        din.set_size(new_size);
        self.write_inode(i, &din)
    }
}
