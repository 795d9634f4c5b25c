//! Read-then-rewrite stream over one shard file
//!
//! A shard is read forward line by line. Rewriting starts lazily at a
//! given byte offset: from then on every consumed line must be emitted
//! again (or dropped), and emitted bytes are queued until the logical
//! read offset has moved past the region they overwrite. On finish the
//! unread tail is copied behind the written bytes and the file is cut
//! to the new length.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StoreError, StoreResult};

const TAIL_CHUNK: usize = 64 * 1024;

pub(crate) struct ShardStream {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset just past the last consumed byte
    read_pos: u64,
    /// Lines consumed so far, header included
    line_number: usize,
    /// Last consumed line had no trailing newline
    unterminated: bool,
    /// File had no header line
    pub(crate) needs_header: bool,
    writer: Option<BufWriter<File>>,
    write_pos: u64,
    pending: Vec<u8>,
}

impl ShardStream {
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        let file = File::open(path).map_err(|e| StoreError::io(path, "open", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            read_pos: 0,
            line_number: 0,
            unterminated: false,
            needs_header: false,
            writer: None,
            write_pos: 0,
            pending: Vec::new(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read_pos(&self) -> u64 {
        self.read_pos
    }

    pub(crate) fn line_number(&self) -> usize {
        self.line_number
    }

    pub(crate) fn unterminated(&self) -> bool {
        self.unterminated
    }

    pub(crate) fn is_rewriting(&self) -> bool {
        self.writer.is_some()
    }

    /// Reads the next line, newline included, into `buf`. Returns false at EOF.
    pub(crate) fn read_line(&mut self, buf: &mut Vec<u8>) -> StoreResult<bool> {
        buf.clear();
        let n = self
            .reader
            .read_until(b'\n', buf)
            .map_err(|e| StoreError::io(&self.path, "read", e))?;
        if n == 0 {
            return Ok(false);
        }
        self.read_pos += n as u64;
        self.line_number += 1;
        self.unterminated = !buf.ends_with(b"\n");
        self.drain(false)?;
        Ok(true)
    }

    /// Starts rewriting at byte offset `at`, which must not exceed the read offset.
    pub(crate) fn start_rewrite(&mut self, at: u64) -> StoreResult<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, "open for writing", e))?;
        file.seek(SeekFrom::Start(at))
            .map_err(|e| StoreError::io(&self.path, "seek", e))?;
        self.writer = Some(BufWriter::new(file));
        self.write_pos = at;
        Ok(())
    }

    /// Queues raw bytes for writing.
    pub(crate) fn emit(&mut self, bytes: &[u8]) -> StoreResult<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);
        self.drain(false)
    }

    /// Queues one line, adding the newline if it is missing.
    pub(crate) fn emit_line(&mut self, line: &[u8]) -> StoreResult<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.pending.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            self.pending.push(b'\n');
        }
        self.drain(false)
    }

    fn drain(&mut self, all: bool) -> StoreResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let room = if all {
            self.pending.len()
        } else {
            let free = self.read_pos.saturating_sub(self.write_pos);
            self.pending.len().min(usize::try_from(free).unwrap_or(usize::MAX))
        };
        if room == 0 {
            return Ok(());
        }
        writer
            .write_all(&self.pending[..room])
            .map_err(|e| StoreError::io(&self.path, "write", e))?;
        self.write_pos += room as u64;
        self.pending.drain(..room);
        Ok(())
    }

    /// Copies the unread tail, truncates and optionally syncs. A stream
    /// that never started rewriting is closed without touching the file.
    pub(crate) fn finish(mut self, sync: bool) -> StoreResult<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let mut chunk = vec![0u8; TAIL_CHUNK];
        loop {
            let n = self
                .reader
                .read(&mut chunk)
                .map_err(|e| StoreError::io(&self.path, "read", e))?;
            if n == 0 {
                break;
            }
            self.read_pos += n as u64;
            self.pending.extend_from_slice(&chunk[..n]);
            self.drain(false)?;
        }
        self.drain(true)?;

        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::io(&self.path, "flush", e.into_error()))?;
        file.set_len(self.write_pos)
            .map_err(|e| StoreError::io(&self.path, "truncate", e))?;
        if sync {
            file.sync_all()
                .map_err(|e| StoreError::io(&self.path, "sync", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn shard(contents: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.csv");
        fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn test_scan_without_rewrite_leaves_file_alone() {
        let (_temp, path) = shard("h\na\nb\n");
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        let mut stream = ShardStream::open(&path).unwrap();
        let mut buf = Vec::new();
        let mut lines = 0;
        while stream.read_line(&mut buf).unwrap() {
            lines += 1;
        }
        assert_eq!(lines, 3);
        stream.finish(true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "h\na\nb\n");
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn test_growing_rewrite_keeps_tail() {
        let (_temp, path) = shard("h\na\nb\nc\n");
        let mut stream = ShardStream::open(&path).unwrap();
        let mut buf = Vec::new();
        stream.read_line(&mut buf).unwrap();
        let start = stream.read_pos();
        stream.read_line(&mut buf).unwrap();
        stream.start_rewrite(start).unwrap();
        stream.emit_line(b"inserted-row-longer-than-the-rest").unwrap();
        stream.emit_line(&buf.clone()).unwrap();
        stream.finish(false).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "h\ninserted-row-longer-than-the-rest\na\nb\nc\n"
        );
    }

    #[test]
    fn test_shrinking_rewrite_truncates() {
        let (_temp, path) = shard("h\naaaa\nbbbb\n");
        let mut stream = ShardStream::open(&path).unwrap();
        let mut buf = Vec::new();
        stream.read_line(&mut buf).unwrap();
        let start = stream.read_pos();
        stream.read_line(&mut buf).unwrap();
        stream.start_rewrite(start).unwrap();
        stream.finish(true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "h\nbbbb\n");
    }

    #[test]
    fn test_unterminated_last_line() {
        let (_temp, path) = shard("h\nlast");
        let mut stream = ShardStream::open(&path).unwrap();
        let mut buf = Vec::new();
        while stream.read_line(&mut buf).unwrap() {}
        assert!(stream.unterminated());
        assert_eq!(stream.line_number(), 2);
    }
}
