//! Error taxonomy.
//!
//! Transport and protocol failures are fatal: the connection to the disk is
//! the only copy of all state, so the process gives up and exits. Everything
//! else recovers at the command boundary; the shell answers `No` and returns
//! to the prompt with the file system unchanged.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    /// Socket read/write failed or the peer hung up.
    #[error("disk transport: {0}")]
    Transport(#[from] std::io::Error),

    /// The disk answered with something the protocol does not allow.
    #[error("disk protocol: {0}")]
    Protocol(String),

    /// Linear block index past the disk's capacity.
    #[error("block {0} exceeds disk capacity")]
    ExceedCapacity(u32),

    /// Both bitmaps scanned, no zero bit left.
    #[error("no free {0} left")]
    NoSpace(&'static str),

    /// Growing the file would pass the triple-indirect ceiling.
    #[error("file too large")]
    FileTooLarge,

    /// On-disk structure contradicts itself (e.g. a counted block with no
    /// pointer path leading to it).
    #[error("corrupt file system: {0}")]
    Corrupt(&'static str),

    /// Name lookup failed.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Name already present in the directory.
    #[error("name exists: {0}")]
    AlreadyExists(String),

    /// Operation wants a regular file but found a directory.
    #[error("{0} is a directory")]
    IsDirectory(String),

    /// Operation wants a directory but found a regular file.
    #[error("{0} is not a directory")]
    NotDirectory(String),

    /// Empty name, name over 16 bytes, or a name with `/` or NUL in it.
    #[error("bad name: {0}")]
    BadName(String),

    /// Command line the dispatcher cannot parse.
    #[error("bad command: {0}")]
    BadCommand(String),
}

impl FsError {
    /// Fatal errors tear the process down; the rest turn into a `No` reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Transport(_) | FsError::Protocol(_))
    }
}
