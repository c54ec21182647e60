//! A Unix-like inode file system served over a networked block device.
//!
//! Three processes make up the full system: a cylinder/sector disk store, a
//! terminal client, and this crate, the file-system server between them.
//! The server owns no persistent state of its own; every structure lives on
//! the disk and is re-read on use. See [`disk`] for the block protocol,
//! [`fs`] for the on-disk layout and engines, and [`shell`] for the client
//! command loop.

pub mod disk;
pub mod error;
pub mod fs;
pub mod param;
pub mod shell;

pub use error::{FsError, Result};
