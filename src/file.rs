//! Seekable byte-stream access over a [`Stream`].
//!
//! [`VirtualFile`] implements `std::io::{Read, Write, Seek}` on top of a
//! borrowed stream cursor, crossing block boundaries transparently: reads
//! stop at the logical length, writes extend the chain block by block, and
//! seeks clamp to `[0, len]`.  It is the page transport for the B+Trees and
//! the engine behind every open file descriptor.
//!
//! [`FileMode`] parses the familiar open-mode strings: `r`, `w`, `a`, `x`,
//! optionally combined with `+` (read+write).  A trailing `b` is accepted
//! and ignored; any other character, or a repeated one, is `InvalidMode`.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::block::DATA_SIZE;
use crate::blocks::BlockManager;
use crate::error::{Error, Result};
use crate::stream::Stream;

// ── FileMode ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    base:    char,
    update:  bool,
}

impl FileMode {
    /// Parse a mode string such as `"r"`, `"w+"`, `"ab"`, `"x+b"`.
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || Error::InvalidMode {
            mode: mode.to_string(),
        };
        let mut base = None;
        let mut update = false;
        let mut binary = false;
        for c in mode.chars() {
            match c {
                'r' | 'w' | 'a' | 'x' => {
                    if base.replace(c).is_some() {
                        return Err(invalid());
                    }
                }
                '+' => {
                    if update {
                        return Err(invalid());
                    }
                    update = true;
                }
                'b' => {
                    if binary {
                        return Err(invalid());
                    }
                    binary = true;
                }
                _ => return Err(invalid()),
            }
        }
        Ok(Self {
            base: base.ok_or_else(invalid)?,
            update,
        })
    }

    /// Reads allowed?
    #[inline]
    pub fn readable(&self) -> bool {
        self.base == 'r' || self.update
    }

    /// Writes allowed?
    #[inline]
    pub fn writable(&self) -> bool {
        self.base != 'r' || self.update
    }

    /// Every write lands at the current end of the file.
    #[inline]
    pub fn append(&self) -> bool {
        self.base == 'a'
    }

    /// The target must not already exist.
    #[inline]
    pub fn exclusive(&self) -> bool {
        self.base == 'x'
    }

    /// A missing target is created rather than reported.
    #[inline]
    pub fn creates(&self) -> bool {
        self.base != 'r'
    }

    /// Existing content is discarded at open.
    #[inline]
    pub fn truncates(&self) -> bool {
        self.base == 'w'
    }
}

// ── VirtualFile ──────────────────────────────────────────────────────────────

pub struct VirtualFile<'a> {
    stream:   &'a mut Stream,
    blocks:   &'a mut BlockManager,
    position: u64,
    append:   bool,
}

fn to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl<'a> VirtualFile<'a> {
    /// Wrap a stream for random access starting at offset 0.
    pub fn new(blocks: &'a mut BlockManager, stream: &'a mut Stream) -> Self {
        Self {
            stream,
            blocks,
            position: 0,
            append: false,
        }
    }

    /// Wrap a stream in append discipline: every write goes to the end.
    pub fn appending(blocks: &'a mut BlockManager, stream: &'a mut Stream) -> Self {
        Self {
            stream,
            blocks,
            position: 0,
            append: true,
        }
    }

    /// Current cursor offset.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Restore a cursor offset saved from an earlier wrap (clamped).
    pub fn set_position(&mut self, position: u64) {
        self.position = position.min(self.stream.len());
    }

    /// Logical length of the underlying stream.
    #[inline]
    pub fn len(&self) -> u64 {
        self.stream.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Shrink to `size` bytes (current position when `None`), recycling the
    /// detached tail blocks.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        let size = size.unwrap_or(self.position);
        let len = self.stream.truncate(self.blocks, size)?;
        self.position = self.position.min(len);
        Ok(len)
    }

    /// Move the stream cursor onto block ordinal `ord`, extending the chain
    /// when writing one block past the end.
    fn pin_block(&mut self, ord: u32, grow: bool) -> Result<()> {
        while grow && ord >= self.stream.block_count() {
            let last = self.stream.block_count() - 1;
            self.stream.wind(self.blocks, last)?;
            self.stream.extend(self.blocks)?;
        }
        let landed = self.stream.wind(self.blocks, ord)?;
        if landed != ord {
            return Err(Error::OutOfBounds {
                index: ord,
                count: self.stream.block_count(),
            });
        }
        Ok(())
    }
}

impl Read for VirtualFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = self.stream.len();
        let mut done = 0usize;
        while done < buf.len() && self.position < end {
            let ord = (self.position / DATA_SIZE as u64) as u32;
            self.pin_block(ord, false).map_err(to_io)?;

            let intra = (self.position % DATA_SIZE as u64) as usize;
            let block_start = ord as u64 * DATA_SIZE as u64;
            let avail = ((end - block_start).min(DATA_SIZE as u64)) as usize;
            if intra >= avail {
                break;
            }
            let n = (buf.len() - done).min(avail - intra);
            buf[done..done + n].copy_from_slice(&self.stream.data()[intra..intra + n]);
            done += n;
            self.position += n as u64;
        }
        Ok(done)
    }
}

impl Write for VirtualFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.append {
            self.position = self.stream.len();
        }
        let mut done = 0usize;
        while done < buf.len() {
            let ord = (self.position / DATA_SIZE as u64) as u32;
            self.pin_block(ord, true).map_err(to_io)?;

            let intra = (self.position % DATA_SIZE as u64) as usize;
            let n = (buf.len() - done).min(DATA_SIZE - intra);
            self.stream.data_mut()[intra..intra + n].copy_from_slice(&buf[done..done + n]);
            done += n;
            self.position += n as u64;
            if self.position > self.stream.len() {
                let delta = self.position - self.stream.len();
                self.stream.add_len(delta as i64);
            }
        }
        Ok(done)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.save(self.blocks, true).map_err(to_io)
    }
}

impl Seek for VirtualFile<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let end = self.stream.len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.position as i64 + d,
            SeekFrom::End(d) => end + d,
        };
        self.position = target.clamp(0, end) as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SECRET: [u8; 32] = [11u8; 32];

    fn fixture() -> (tempfile::TempDir, BlockManager, Stream) {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = BlockManager::create(dir.path().join("f.a7"), &SECRET).unwrap();
        let stream = Stream::create(&mut blocks, Uuid::new_v4()).unwrap();
        (dir, blocks, stream)
    }

    #[test]
    fn mode_parsing() {
        assert!(FileMode::parse("r").unwrap().readable());
        assert!(!FileMode::parse("r").unwrap().writable());
        assert!(FileMode::parse("r+").unwrap().writable());
        assert!(FileMode::parse("w+b").unwrap().readable());
        assert!(FileMode::parse("a").unwrap().append());
        assert!(FileMode::parse("x").unwrap().exclusive());
        for bad in ["", "z", "rr", "rw", "++r", "r+b+"] {
            assert!(FileMode::parse(bad).is_err(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn write_read_across_block_boundary() {
        let (_d, mut blocks, mut stream) = fixture();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        {
            let mut f = VirtualFile::new(&mut blocks, &mut stream);
            f.write_all(&payload).unwrap();
            f.flush().unwrap();
        }
        assert_eq!(stream.len(), 10_000);
        assert_eq!(stream.block_count(), 3);

        let mut back = vec![0u8; 10_000];
        let mut f = VirtualFile::new(&mut blocks, &mut stream);
        f.seek(SeekFrom::Start(0)).unwrap();
        f.read_exact(&mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn exact_multiple_of_block_payload_uses_exactly_k_blocks() {
        let (_d, mut blocks, mut stream) = fixture();
        let payload = vec![0x5au8; DATA_SIZE * 2];
        let mut f = VirtualFile::new(&mut blocks, &mut stream);
        f.write_all(&payload).unwrap();
        f.flush().unwrap();
        assert_eq!(stream.block_count(), 2);

        // One extra byte tips over into a third block.
        let mut f = VirtualFile::new(&mut blocks, &mut stream);
        f.seek(SeekFrom::End(0)).unwrap();
        f.write_all(b"!").unwrap();
        f.flush().unwrap();
        assert_eq!(stream.block_count(), 3);
    }

    #[test]
    fn seek_clamps_to_length() {
        let (_d, mut blocks, mut stream) = fixture();
        let mut f = VirtualFile::new(&mut blocks, &mut stream);
        f.write_all(b"0123456789").unwrap();
        assert_eq!(f.seek(SeekFrom::Start(400)).unwrap(), 10);
        assert_eq!(f.seek(SeekFrom::End(-4)).unwrap(), 6);
        let mut rest = Vec::new();
        f.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"6789");
    }

    #[test]
    fn append_mode_writes_at_end() {
        let (_d, mut blocks, mut stream) = fixture();
        {
            let mut f = VirtualFile::new(&mut blocks, &mut stream);
            f.write_all(b"head").unwrap();
            f.flush().unwrap();
        }
        let mut f = VirtualFile::appending(&mut blocks, &mut stream);
        f.write_all(b"-tail").unwrap();
        f.flush().unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut all = Vec::new();
        f.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"head-tail");
    }

    #[test]
    fn truncate_at_position() {
        let (_d, mut blocks, mut stream) = fixture();
        let mut f = VirtualFile::new(&mut blocks, &mut stream);
        f.write_all(&vec![1u8; DATA_SIZE + 100]).unwrap();
        f.flush().unwrap();
        f.seek(SeekFrom::Start(DATA_SIZE as u64)).unwrap();
        assert_eq!(f.truncate(None).unwrap(), DATA_SIZE as u64);
        assert_eq!(f.len(), DATA_SIZE as u64);
    }
}
