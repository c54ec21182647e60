//! Block transport.
//!
//! The disk is a separate process reached over a byte stream. It speaks a
//! line-oriented text protocol with four commands:
//!
//!   + `I`: geometry probe; the disk answers `"<C> <S>"`.
//!   + `R <c> <s>`: read one block; the disk answers 256 raw bytes.
//!   + `W <c> <s> <block>`: write one block; the disk echoes the payload.
//!   + `E`: shut the disk down; no answer.
//!
//! Every send is followed by a receive before the next send. The two
//! processes otherwise deadlock: two back-to-back writes coalesce into one
//! message on the stream and the peer waits for a second message that never
//! arrives. The interleave is an invariant of this module, not a convention.

use std::io::{Read, Write};

use log::trace;

use crate::error::{FsError, Result};
use crate::param::BSIZE;

/// One disk block.
pub type Block = [u8; BSIZE];

/// What the file system needs from a disk: a linear array of blocks.
pub trait BlockIo {
    /// Number of addressable blocks.
    fn total_blocks(&self) -> u32;

    fn read_block(&mut self, b: u32) -> Result<Block>;

    fn write_block(&mut self, b: u32, data: &Block) -> Result<()>;

    /// Tell the disk process to exit. The disk sends no reply.
    fn shutdown(&mut self) -> Result<()>;
}

/// A disk process on the far side of a stream.
///
/// Linear block index `b` maps to cylinder `b / sectors` and sector
/// `b % sectors`.
pub struct RemoteDisk<S> {
    stream: S,
    cylinders: u32,
    sectors: u32,
}

impl<S: Read + Write> RemoteDisk<S> {
    /// Probe the disk's geometry and wrap the stream.
    pub fn new(mut stream: S) -> Result<Self> {
        stream.write_all(b"I\n")?;
        stream.flush()?;

        // The disk answers with a single short ASCII message.
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(FsError::Protocol("disk closed during geometry probe".into()));
        }
        let text = core::str::from_utf8(&buf[..n])
            .map_err(|_| FsError::Protocol("geometry reply is not ASCII".into()))?;
        let mut fields = text.split_whitespace();
        let cylinders = parse_geometry(fields.next())?;
        let sectors = parse_geometry(fields.next())?;
        trace!("disk geometry: {} cylinders x {} sectors", cylinders, sectors);

        Ok(Self {
            stream,
            cylinders,
            sectors,
        })
    }

    fn addr(&self, b: u32) -> Result<(u32, u32)> {
        if b >= self.cylinders * self.sectors {
            return Err(FsError::ExceedCapacity(b));
        }
        Ok((b / self.sectors, b % self.sectors))
    }
}

fn parse_geometry(field: Option<&str>) -> Result<u32> {
    let n = field
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(|| FsError::Protocol("malformed geometry reply".into()))?;
    if n == 0 {
        return Err(FsError::Protocol("zero-sized disk geometry".into()));
    }
    Ok(n)
}

impl<S: Read + Write> BlockIo for RemoteDisk<S> {
    fn total_blocks(&self) -> u32 {
        self.cylinders * self.sectors
    }

    fn read_block(&mut self, b: u32) -> Result<Block> {
        let (c, s) = self.addr(b)?;
        self.stream.write_all(format!("R {} {}\n", c, s).as_bytes())?;
        self.stream.flush()?;

        let mut block = [0u8; BSIZE];
        self.stream.read_exact(&mut block)?;
        trace!("R {} {} (block {})", c, s, b);
        Ok(block)
    }

    fn write_block(&mut self, b: u32, data: &Block) -> Result<()> {
        let (c, s) = self.addr(b)?;
        // Header, raw payload, and terminator go out as one message.
        let mut msg = Vec::with_capacity(BSIZE + 16);
        msg.extend_from_slice(format!("W {} {} ", c, s).as_bytes());
        msg.extend_from_slice(data);
        msg.push(b'\n');
        self.stream.write_all(&msg)?;
        self.stream.flush()?;

        // The ack is an echo of the payload. Its content is irrelevant but it
        // must be drained before the next command goes out.
        let mut ack = [0u8; BSIZE];
        self.stream.read_exact(&mut ack)?;
        trace!("W {} {} (block {})", c, s, b);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stream.write_all(b"E\n")?;
        self.stream.flush()?;
        Ok(())
    }
}

/// In-memory stand-in for the disk process. Test builds only.
#[cfg(test)]
pub(crate) struct MemDisk {
    blocks: Vec<Block>,
}

#[cfg(test)]
impl MemDisk {
    pub(crate) fn new(total: u32) -> Self {
        Self {
            blocks: vec![[0u8; BSIZE]; total as usize],
        }
    }
}

#[cfg(test)]
impl BlockIo for MemDisk {
    fn total_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn read_block(&mut self, b: u32) -> Result<Block> {
        self.blocks
            .get(b as usize)
            .copied()
            .ok_or(FsError::ExceedCapacity(b))
    }

    fn write_block(&mut self, b: u32, data: &Block) -> Result<()> {
        match self.blocks.get_mut(b as usize) {
            Some(slot) => {
                *slot = *data;
                Ok(())
            }
            None => Err(FsError::ExceedCapacity(b)),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted stream: pops canned replies, records everything written.
    struct Script {
        replies: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Script {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                replies: replies.into(),
                written: Vec::new(),
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.replies.front_mut() {
                Some(reply) => {
                    let n = reply.len().min(buf.len());
                    buf[..n].copy_from_slice(&reply[..n]);
                    reply.drain(..n);
                    if reply.is_empty() {
                        self.replies.pop_front();
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn geometry_probe_and_mapping() {
        let script = Script::new(vec![b"100 36".to_vec()]);
        let disk = RemoteDisk::new(script).unwrap();
        assert_eq!(disk.total_blocks(), 3600);
        assert_eq!(disk.addr(0).unwrap(), (0, 0));
        assert_eq!(disk.addr(37).unwrap(), (1, 1));
        assert_eq!(disk.addr(3599).unwrap(), (99, 35));
        assert!(matches!(
            disk.addr(3600),
            Err(FsError::ExceedCapacity(3600))
        ));
    }

    #[test]
    fn read_sends_r_and_takes_exact_block() {
        let mut payload = vec![0xabu8; BSIZE];
        payload[0] = 1;
        let script = Script::new(vec![b"2 4".to_vec(), payload.clone()]);
        let mut disk = RemoteDisk::new(script).unwrap();
        let block = disk.read_block(5).unwrap();
        assert_eq!(&block[..], &payload[..]);
        assert_eq!(&disk.stream.written, b"I\nR 1 1\n");
    }

    #[test]
    fn write_frames_payload_and_drains_ack() {
        let script = Script::new(vec![b"2 4".to_vec(), vec![0u8; BSIZE]]);
        let mut disk = RemoteDisk::new(script).unwrap();
        let block = [0x5au8; BSIZE];
        disk.write_block(6, &block).unwrap();

        let written = &disk.stream.written;
        assert!(written.starts_with(b"I\nW 1 2 "));
        assert_eq!(written.len(), b"I\nW 1 2 ".len() + BSIZE + 1);
        assert_eq!(written[written.len() - 1], b'\n');
        assert_eq!(&written[b"I\nW 1 2 ".len()..written.len() - 1], &block[..]);
    }

    #[test]
    fn truncated_read_reply_is_fatal() {
        let script = Script::new(vec![b"2 4".to_vec(), vec![0u8; 10]]);
        let mut disk = RemoteDisk::new(script).unwrap();
        let err = disk.read_block(0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn shutdown_sends_e() {
        let script = Script::new(vec![b"1 1".to_vec()]);
        let mut disk = RemoteDisk::new(script).unwrap();
        disk.shutdown().unwrap();
        assert_eq!(&disk.stream.written, b"I\nE\n");
    }
}
