/// Block size in bytes. Every disk transfer moves exactly one block.
pub const BSIZE: usize = 256;

/// Direct data-block pointers per inode.
pub const NDIRECT: usize = 8;

/// Child pointers per indirect block (16-bit pointers).
pub const NINDIRECT: usize = BSIZE / 2;

/// Largest file in data blocks: direct + single + double + triple.
pub const MAXFILE: usize =
    NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT + NINDIRECT * NINDIRECT * NINDIRECT;

/// Inodes per block of the inode table.
pub const IPB: usize = BSIZE / 64;

/// Maximum file name length stored in an inode.
pub const DIRSIZ: usize = 16;

/// Root directory i-number.
pub const ROOTINO: u16 = 0;

/// Bytes per directory entry (one child i-number).
pub const DIRENT_SIZE: usize = 2;

/// Disks of at least this many blocks get the full inode budget.
pub const LARGE_DISK: u32 = 3600;

/// Inode budget of a large disk.
pub const LARGE_DISK_INODES: u32 = 1024;

/// Packed `info` word of a freshly created regular file.
pub const FILE_ALL_ALLOW: u32 = 0x27e00;

/// Packed `info` word of a freshly created directory.
pub const DIR_ALL_ALLOW: u32 = 0x27e01;
