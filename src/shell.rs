//! Command dispatcher.
//!
//! The client speaks a strictly alternating protocol: the server writes the
//! prompt, reads one command line, writes the result, and reads a one-line
//! acknowledgement before the next prompt. The ack keeps result and prompt
//! from coalescing into a single message on the stream. `e` is the one
//! exception: the server answers `Goodbye!` and exits without waiting.
//!
//! Failures below the transport are answered with `No` and a one-line
//! diagnostic in the log; the dispatcher always comes back to the prompt.

use std::io::{BufRead, Write};

use log::{debug, info, warn};

use crate::disk::BlockIo;
use crate::error::{FsError, Result};
use crate::fs::{FileName, Fs, Path};
use crate::param::{DIR_ALL_ALLOW, FILE_ALL_ALLOW, ROOTINO};

/// One client session over an injected byte stream pair.
pub struct Shell<'f, D, R, W> {
    fs: &'f mut Fs<D>,
    client_in: R,
    client_out: W,
    cwd: u16,
    uid: u32,
}

impl<'f, D: BlockIo, R: BufRead, W: Write> Shell<'f, D, R, W> {
    pub fn new(fs: &'f mut Fs<D>, client_in: R, client_out: W) -> Self {
        Self {
            fs,
            client_in,
            client_out,
            cwd: ROOTINO,
            uid: 0,
        }
    }

    /// Serve round trips until the client quits or hangs up.
    pub fn serve(&mut self) -> Result<()> {
        loop {
            let prompt = format!("{}:{}$ ", self.uid, self.fs.abs_path(self.cwd)?);
            self.client_out.write_all(prompt.as_bytes())?;
            self.client_out.flush()?;

            let mut line = String::new();
            if self.client_in.read_line(&mut line)? == 0 {
                info!("client hung up");
                return Ok(());
            }
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            debug!("command: {}", line);

            if line == "e" {
                self.fs.shutdown()?;
                self.client_out.write_all(b"Goodbye!\n")?;
                self.client_out.flush()?;
                info!("session closed by client");
                return Ok(());
            }

            let reply = match self.execute(line) {
                Ok(reply) => reply,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: {}", line, e);
                    "No".into()
                }
            };
            self.client_out.write_all(reply.as_bytes())?;
            self.client_out.write_all(b"\n")?;
            self.client_out.flush()?;

            // Coalescence guard; EOF here just ends the session.
            let mut ack = String::new();
            if self.client_in.read_line(&mut ack)? == 0 {
                info!("client hung up");
                return Ok(());
            }
        }
    }

    fn execute(&mut self, line: &str) -> Result<String> {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");

        match cmd {
            "f" => {
                self.fs.format()?;
                self.cwd = ROOTINO;
                Ok("Done".into())
            }
            "mk" => {
                self.fs
                    .create_entry(self.cwd, FILE_ALL_ALLOW, &FileName::new(rest)?)?;
                Ok("Yes".into())
            }
            "mkdir" => {
                self.fs
                    .create_entry(self.cwd, DIR_ALL_ALLOW, &FileName::new(rest)?)?;
                Ok("Yes".into())
            }
            "rm" => self.remove(rest, false),
            "rmdir" => self.remove(rest, true),
            "cd" => {
                let target = self.fs.resolve(self.cwd, &Path::new(rest))?;
                let din = self.fs.read_inode(target)?;
                if !din.is_dir() {
                    return Err(FsError::NotDirectory(din.name_lossy()));
                }
                self.cwd = target;
                Ok("Yes".into())
            }
            "ls" => self.fs.list(self.cwd),
            "cat" => {
                let file = self.file_in_cwd(rest)?.1;
                let size = self.fs.read_inode(file)?.size() as usize;
                let mut bytes = self.fs.read_all(file)?;
                bytes.truncate(size);
                // Trailing NUL padding is data on disk but not on screen.
                if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                    bytes.truncate(nul);
                }
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            "w" => {
                let mut args = rest.splitn(3, ' ');
                let file = self.file_in_cwd(args.next().unwrap_or(""))?.1;
                let len = parse_num(args.next())?;
                let data = clamp(args.next().unwrap_or(""), len);
                self.fs.truncate(file)?;
                self.fs.write_range(file, 0, data)?;
                Ok("Yes".into())
            }
            "i" => {
                let mut args = rest.splitn(4, ' ');
                let file = self.file_in_cwd(args.next().unwrap_or(""))?.1;
                let pos = parse_num(args.next())?;
                let len = parse_num(args.next())?;
                let data = clamp(args.next().unwrap_or(""), len);
                self.fs.insert_range(file, pos, data)?;
                Ok("Yes".into())
            }
            "d" => {
                let mut args = rest.splitn(3, ' ');
                let file = self.file_in_cwd(args.next().unwrap_or(""))?.1;
                let pos = parse_num(args.next())?;
                let len = parse_num(args.next())?;
                self.fs.delete_range(file, pos, len)?;
                Ok("Yes".into())
            }
            _ => Err(FsError::BadCommand(line.into())),
        }
    }

    /// `rm` wants a file, `rmdir` wants a directory; both destroy the target
    /// and splice it out of the working directory.
    fn remove(&mut self, name: &str, want_dir: bool) -> Result<String> {
        let (slot, child) = self.lookup_in_cwd(name)?;
        let din = self.fs.read_inode(child)?;
        match (din.is_dir(), want_dir) {
            (true, false) => return Err(FsError::IsDirectory(name.into())),
            (false, true) => return Err(FsError::NotDirectory(name.into())),
            _ => {}
        }
        self.fs.destroy_tree(child)?;
        self.fs.remove_entry(self.cwd, slot)?;
        Ok("Yes".into())
    }

    fn lookup_in_cwd(&mut self, name: &str) -> Result<(usize, u16)> {
        self.fs
            .lookup(self.cwd, &FileName::new(name)?)?
            .ok_or_else(|| FsError::NotFound(name.into()))
    }

    /// Like [`Shell::lookup_in_cwd`] but the target must be a regular file.
    fn file_in_cwd(&mut self, name: &str) -> Result<(usize, u16)> {
        let (slot, child) = self.lookup_in_cwd(name)?;
        if self.fs.read_inode(child)?.is_dir() {
            return Err(FsError::IsDirectory(name.into()));
        }
        Ok((slot, child))
    }
}

fn parse_num(field: Option<&str>) -> Result<u32> {
    field
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(|| FsError::BadCommand(field.unwrap_or("").into()))
}

fn clamp(data: &str, len: u32) -> &[u8] {
    let bytes = data.as_bytes();
    &bytes[..bytes.len().min(len as usize)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::fs::check_counters;

    fn fresh() -> Fs<MemDisk> {
        Fs::new(MemDisk::new(3600))
    }

    /// Run a scripted session: each command line is followed by the ack line
    /// the client protocol requires (none after `e`). Returns the full
    /// transcript the client would see.
    fn run(fs: &mut Fs<MemDisk>, cmds: &[&str]) -> String {
        let mut input = String::new();
        for c in cmds {
            input.push_str(c);
            input.push('\n');
            if *c != "e" {
                input.push('\n');
            }
        }
        let mut out = Vec::new();
        Shell::new(fs, input.as_bytes(), &mut out).serve().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn s1_format_and_create() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mkdir a", "cd a", "mk x", "ls"]);
        assert_eq!(
            t,
            "0:/$ Done\n0:/$ Yes\n0:/$ Yes\n0:/a$ Yes\n0:/a$ x & \n0:/a$ "
        );
    }

    #[test]
    fn s2_duplicate_names() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mk x", "mk x"]);
        assert!(t.ends_with("No\n0:/$ "));
    }

    #[test]
    fn s3_kind_mismatch() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mkdir d", "rm d", "rmdir d"]);
        assert_eq!(t, "0:/$ Done\n0:/$ Yes\n0:/$ No\n0:/$ Yes\n0:/$ ");
    }

    #[test]
    fn s4_overwrite_roundtrip() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mk f", "w f 5 hello", "cat f"]);
        assert_eq!(t, "0:/$ Done\n0:/$ Yes\n0:/$ Yes\n0:/$ hello\n0:/$ ");
    }

    #[test]
    fn s5_insert_middle() {
        let mut fs = fresh();
        let t = run(
            &mut fs,
            &["f", "mk f", "w f 5 hello", "i f 2 3 XYZ", "cat f"],
        );
        assert!(t.ends_with("0:/$ heXYZllo\n0:/$ "));
    }

    #[test]
    fn s6_delete_range() {
        let mut fs = fresh();
        let t = run(
            &mut fs,
            &["f", "mk f", "w f 5 hello", "i f 2 3 XYZ", "d f 1 4", "cat f"],
        );
        assert!(t.ends_with("0:/$ hllo\n0:/$ "));
    }

    #[test]
    fn s7_recursive_deletion() {
        let mut fs = fresh();
        let t = run(
            &mut fs,
            &[
                "f", "mkdir a", "cd a", "mk x", "mkdir b", "cd b", "mk y", "cd /", "rmdir a",
            ],
        );
        assert!(t.ends_with("Yes\n0:/$ "));

        // Only the root survives; every block is back in the pool.
        let sb = fs.read_super().unwrap();
        assert_eq!(sb.free_inode(), sb.total_inode() - 1);
        assert_eq!(sb.free_block(), sb.total_block());
        check_counters(&mut fs);
    }

    #[test]
    fn s8_lexicographic_listing() {
        let mut fs = fresh();
        let t = run(
            &mut fs,
            &["f", "mk Banana", "mk apple", "mk apple2", "mk APPLE", "ls"],
        );
        assert!(t.ends_with("0:/$ APPLE apple apple2 Banana & \n0:/$ "));
    }

    #[test]
    fn goodbye_skips_the_ack() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "e"]);
        assert_eq!(t, "0:/$ Done\n0:/$ Goodbye!\n");
    }

    #[test]
    fn unknown_commands_answer_no() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "frobnicate", "mk"]);
        assert_eq!(t, "0:/$ Done\n0:/$ No\n0:/$ No\n0:/$ ");
    }

    #[test]
    fn cd_rejects_files_and_missing_paths() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mk x", "cd x", "cd nowhere", "cd /x/.."]);
        assert_eq!(
            t,
            "0:/$ Done\n0:/$ Yes\n0:/$ No\n0:/$ No\n0:/$ No\n0:/$ "
        );
    }

    #[test]
    fn cat_and_writes_reject_directories() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mkdir d", "cat d", "w d 3 abc", "d d 0 1"]);
        assert_eq!(
            t,
            "0:/$ Done\n0:/$ Yes\n0:/$ No\n0:/$ No\n0:/$ No\n0:/$ "
        );
    }

    #[test]
    fn write_len_clamps_to_payload() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mk f", "w f 100 short", "cat f"]);
        assert!(t.ends_with("0:/$ short\n0:/$ "));
    }

    #[test]
    fn data_may_contain_spaces() {
        let mut fs = fresh();
        let t = run(&mut fs, &["f", "mk f", "w f 11 hello world", "cat f"]);
        assert!(t.ends_with("0:/$ hello world\n0:/$ "));
    }

    #[test]
    fn deep_trees_delete_without_recursion_depth_limits() {
        let mut fs = fresh();
        run(&mut fs, &["f"]);
        // Build a 200-deep chain of directories, then remove it at the top.
        let mut cmds: Vec<String> = Vec::new();
        for _ in 0..200 {
            cmds.push("mkdir d".into());
            cmds.push("cd d".into());
        }
        let cmds: Vec<&str> = cmds.iter().map(String::as_str).collect();
        run(&mut fs, &cmds);

        let t = run(&mut fs, &["cd /", "rmdir d"]);
        assert!(t.ends_with("Yes\n0:/$ "));
        let sb = fs.read_super().unwrap();
        assert_eq!(sb.free_inode(), sb.total_inode() - 1);
    }
}
