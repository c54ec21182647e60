//! Directories.
//!
//! A directory is a file whose payload is a packed array of 16-bit child
//! inode indices; `size_file` is twice the child count. Names are not in
//! the payload at all; each child inode carries its own name, so a lookup
//! loads child inodes one by one and compares their name fields.

use itertools::Itertools;
use log::debug;

use super::inode::{Stamp, TouchScope};
use super::path::{FileName, Path};
use super::Fs;
use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::param::{DIRENT_SIZE, ROOTINO};

impl<D: BlockIo> Fs<D> {
    /// The child inode indices of directory `dir`, in payload order.
    pub(crate) fn children(&mut self, dir: u16) -> Result<Vec<u16>> {
        let size = self.read_inode(dir)?.size() as usize;
        let payload = self.read_payload(dir)?;
        Ok(payload[..size]
            .chunks_exact(DIRENT_SIZE)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Scan `dir` for a child named `name`. Returns the child's slot in the
    /// payload and its inode index.
    pub fn lookup(&mut self, dir: u16, name: &FileName<'_>) -> Result<Option<(usize, u16)>> {
        for (slot, child) in self.children(dir)?.into_iter().enumerate() {
            let din = self.read_inode(child)?;
            if din.name_bytes() == name.as_bytes() {
                return Ok(Some((slot, child)));
            }
        }
        Ok(None)
    }

    /// Create a child of `dir` with the given packed `info` word. Fails on a
    /// duplicate name; otherwise allocates an inode, appends its index to the
    /// payload, and builds the child.
    pub fn create_entry(&mut self, dir: u16, info: u32, name: &FileName<'_>) -> Result<u16> {
        if self.lookup(dir, name)?.is_some() {
            return Err(FsError::AlreadyExists(
                String::from_utf8_lossy(name.as_bytes()).into_owned(),
            ));
        }

        let child = self.allocate_inode()?;
        let size = self.read_inode(dir)?.size();
        if let Err(e) = self.write_stream(dir, size, &child.to_le_bytes()) {
            // The payload could not grow; give the inode back.
            let _ = self.release_inode(child);
            return Err(e);
        }
        self.build(child, info, name, 0, 0, 1, dir)?;
        self.touch(dir, TouchScope::SelfOnly, Stamp::MODIFY)?;
        debug!(
            "create {} (inode {}) in directory {}",
            String::from_utf8_lossy(name.as_bytes()),
            child,
            dir
        );
        Ok(child)
    }

    /// Splice slot `slot` out of `dir`'s payload, keeping the other entries
    /// in order. The payload blocks are captured, freed, and rewritten two
    /// bytes shorter.
    pub fn remove_entry(&mut self, dir: u16, slot: usize) -> Result<()> {
        let mut children = self.children(dir)?;
        if slot >= children.len() {
            return Err(FsError::Corrupt("directory slot out of range"));
        }
        children.remove(slot);

        let mut din = self.read_inode(dir)?;
        self.shrink_from(&mut din, 0, None)?;
        din.set_size(0);
        self.write_inode(dir, &din)?;

        let bytes: Vec<u8> = children.iter().flat_map(|c| c.to_le_bytes()).collect();
        self.write_stream(dir, 0, &bytes)
    }

    /// Resolve `path` against directory `cwd`. A leading `/` restarts at the
    /// root; `.` stays put; `..` ascends. Fails on the first missing or
    /// non-directory component.
    pub fn resolve(&mut self, cwd: u16, path: &Path<'_>) -> Result<u16> {
        let mut cur = if path.is_absolute() { ROOTINO } else { cwd };
        for component in path.components() {
            let din = self.read_inode(cur)?;
            if !din.is_dir() {
                return Err(FsError::NotDirectory(din.name_lossy()));
            }
            cur = match component {
                "." => cur,
                ".." => din.parent(),
                name => {
                    let name = FileName::new(name)?;
                    match self.lookup(cur, &name)? {
                        Some((_, child)) => child,
                        None => {
                            return Err(FsError::NotFound(
                                String::from_utf8_lossy(name.as_bytes()).into_owned(),
                            ))
                        }
                    }
                }
            };
        }
        Ok(cur)
    }

    /// Destroy inode `i` and, if it is a directory, everything below it.
    /// Children go before parents so an inode's data is only freed once
    /// nothing references it.
    pub fn destroy_tree(&mut self, i: u16) -> Result<()> {
        // Parents first into `order`; walking it backwards frees leaves
        // before the directories that hold them. A work stack instead of
        // recursion keeps deep trees off the host stack.
        let mut order = Vec::new();
        let mut stack = vec![i];
        while let Some(n) = stack.pop() {
            order.push(n);
            if self.read_inode(n)?.is_dir() {
                stack.extend(self.children(n)?);
            }
        }
        for &n in order.iter().rev() {
            let mut din = self.read_inode(n)?;
            self.shrink_from(&mut din, 0, None)?;
            din.set_size(0);
            self.write_inode(n, &din)?;
            self.destroy(n)?;
        }
        debug!("destroyed subtree of {} inode(s) at {}", order.len(), i);
        Ok(())
    }

    /// One listing line: files first, a `&` separator, then directories,
    /// each group sorted case-insensitively with a byte-compare tiebreak.
    /// Every token is followed by a space.
    pub fn list(&mut self, dir: u16) -> Result<String> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for child in self.children(dir)? {
            let din = self.read_inode(child)?;
            debug!(
                "{} {:2} {:2} {:8} {} {} {} {}",
                din.mode_string(),
                din.owner_id(),
                din.group_id(),
                din.size(),
                din.atime(),
                din.mtime(),
                din.ctime(),
                din.name_lossy(),
            );
            if din.is_dir() {
                dirs.push(din.name_lossy());
            } else {
                files.push(din.name_lossy());
            }
        }

        let order = |name: &String| (name.to_lowercase(), name.clone());
        files.sort_by_key(order);
        dirs.sort_by_key(order);

        let line: String = files
            .iter()
            .map(String::as_str)
            .chain(core::iter::once("&"))
            .chain(dirs.iter().map(String::as_str))
            .map(|token| format!("{} ", token))
            .join("");
        Ok(line)
    }

    /// Absolute path of directory `dir`, rebuilt by walking the parent
    /// chain.
    pub fn abs_path(&mut self, dir: u16) -> Result<String> {
        let mut names = Vec::new();
        let mut cur = dir;
        let mut steps = 0u32;
        while cur != ROOTINO {
            let din = self.read_inode(cur)?;
            names.push(din.name_lossy());
            cur = din.parent();
            steps += 1;
            if steps > self.layout.ninodes {
                return Err(FsError::Corrupt("parent chain does not terminate"));
            }
        }
        names.reverse();
        Ok(format!("/{}", names.iter().join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Fs;
    use super::*;
    use crate::disk::MemDisk;
    use crate::param::{DIR_ALL_ALLOW, FILE_ALL_ALLOW};

    fn fresh() -> Fs<MemDisk> {
        let mut fs = Fs::new(MemDisk::new(3600));
        fs.format().unwrap();
        fs
    }

    fn name(s: &str) -> FileName<'_> {
        FileName::new(s).unwrap()
    }

    #[test]
    fn created_children_are_found_and_wired() {
        let mut fs = fresh();
        let a = fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("a")).unwrap();
        let x = fs.create_entry(a, FILE_ALL_ALLOW, &name("x")).unwrap();

        assert_eq!(fs.lookup(ROOTINO, &name("a")).unwrap(), Some((0, a)));
        assert_eq!(fs.lookup(a, &name("x")).unwrap(), Some((0, x)));
        assert_eq!(fs.lookup(a, &name("y")).unwrap(), None);

        let child = fs.read_inode(x).unwrap();
        assert_eq!(child.parent(), a);
        assert_eq!(child.num_link(), 1);
        assert_eq!(fs.read_inode(a).unwrap().size(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = fresh();
        fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name("x")).unwrap();
        assert!(matches!(
            fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name("x")),
            Err(FsError::AlreadyExists(_))
        ));
        // Directory vs file makes no difference; the namespace is shared.
        assert!(fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("x")).is_err());
    }

    #[test]
    fn remove_entry_splices_and_keeps_order() {
        let mut fs = fresh();
        let a = fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name("a")).unwrap();
        let b = fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name("b")).unwrap();
        let c = fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name("c")).unwrap();

        fs.remove_entry(ROOTINO, 1).unwrap();
        assert_eq!(fs.children(ROOTINO).unwrap(), vec![a, c]);
        assert_eq!(fs.read_inode(ROOTINO).unwrap().size(), 4);
        // b's inode still exists; only the link is gone.
        assert_eq!(fs.read_inode(b).unwrap().name_bytes(), b"b");
    }

    #[test]
    fn resolution_handles_dots_and_absolutes() {
        let mut fs = fresh();
        let a = fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("a")).unwrap();
        let b = fs.create_entry(a, DIR_ALL_ALLOW, &name("b")).unwrap();
        fs.create_entry(a, FILE_ALL_ALLOW, &name("f")).unwrap();

        assert_eq!(fs.resolve(ROOTINO, &Path::new("a/b")).unwrap(), b);
        assert_eq!(fs.resolve(b, &Path::new("/a")).unwrap(), a);
        assert_eq!(fs.resolve(b, &Path::new("..")).unwrap(), a);
        assert_eq!(fs.resolve(b, &Path::new("./../b")).unwrap(), b);
        assert_eq!(fs.resolve(ROOTINO, &Path::new("..")).unwrap(), ROOTINO);

        assert!(matches!(
            fs.resolve(ROOTINO, &Path::new("a/missing")),
            Err(FsError::NotFound(_))
        ));
        // A file in the middle of a path is a dead end.
        assert!(matches!(
            fs.resolve(ROOTINO, &Path::new("a/f/b")),
            Err(FsError::NotDirectory(_))
        ));
    }

    #[test]
    fn destroy_tree_returns_all_resources() {
        let mut fs = fresh();
        let sb0 = fs.read_super().unwrap();

        let a = fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("a")).unwrap();
        fs.create_entry(a, FILE_ALL_ALLOW, &name("x")).unwrap();
        let b = fs.create_entry(a, DIR_ALL_ALLOW, &name("b")).unwrap();
        let y = fs.create_entry(b, FILE_ALL_ALLOW, &name("y")).unwrap();
        fs.write_range(y, 0, &[7u8; 600]).unwrap();

        fs.destroy_tree(a).unwrap();
        let slot = fs.lookup(ROOTINO, &name("a")).unwrap().map(|(s, _)| s);
        fs.remove_entry(ROOTINO, slot.unwrap()).unwrap();

        let sb = fs.read_super().unwrap();
        assert_eq!(sb.free_inode(), sb0.free_inode());
        assert_eq!(sb.free_block(), sb0.free_block());
        assert_eq!(fs.lookup(ROOTINO, &name("a")).unwrap(), None);
    }

    #[test]
    fn listing_sorts_case_insensitively_with_byte_tiebreak() {
        let mut fs = fresh();
        for n in ["Banana", "apple", "apple2", "APPLE"] {
            fs.create_entry(ROOTINO, FILE_ALL_ALLOW, &name(n)).unwrap();
        }
        fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("zoo")).unwrap();
        fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("Attic")).unwrap();

        assert_eq!(
            fs.list(ROOTINO).unwrap(),
            "APPLE apple apple2 Banana & Attic zoo "
        );
    }

    #[test]
    fn abs_path_walks_to_the_root() {
        let mut fs = fresh();
        let a = fs.create_entry(ROOTINO, DIR_ALL_ALLOW, &name("a")).unwrap();
        let b = fs.create_entry(a, DIR_ALL_ALLOW, &name("b")).unwrap();
        assert_eq!(fs.abs_path(ROOTINO).unwrap(), "/");
        assert_eq!(fs.abs_path(b).unwrap(), "/a/b");
    }
}
