//! Block manager — sealed blocks over one host file.
//!
//! Maps block index ↔ file offset (`index * 4096`), allocates new blocks
//! (recycled pool first, then append), and performs the mandatory integrity
//! checks on every load:
//!
//!   1. Envelope authentication (Poly1305) — `CorruptBlock`
//!   2. Self-reference in the chain header — `HeaderReference`
//!   3. SHA-1 of the payload against the stored digest — `DigestMismatch`
//!
//! All three are fatal; the caller must not write through a handle that
//! produced one.
//!
//! The host file is held under an exclusive advisory lock for the lifetime
//! of the manager — a second opener on the same path fails at `open`.  The
//! lock is released when the file handle drops.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use log::{debug, trace};

use crate::block::{Block, BLOCK_SIZE};
use crate::error::{Error, Result};

pub struct BlockManager {
    file:     File,
    secret:   [u8; 32],
    count:    u32,
    recycled: Vec<u32>,
}

impl BlockManager {
    /// Create a new, empty container file.  Fails if the path exists.
    pub fn create<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.try_lock_exclusive()?;
        debug!("created container at {}", path.as_ref().display());
        Ok(Self {
            file,
            secret: *secret,
            count: 0,
            recycled: Vec::new(),
        })
    }

    /// Open an existing container file.
    ///
    /// Acquires the exclusive advisory lock and verifies the file length is
    /// a whole number of blocks (`UnevenArchive` otherwise).
    pub fn open<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        file.try_lock_exclusive()?;

        let length = file.metadata()?.len();
        if length % BLOCK_SIZE as u64 != 0 {
            return Err(Error::UnevenArchive {
                length,
                block_size: BLOCK_SIZE,
            });
        }
        let count = (length / BLOCK_SIZE as u64) as u32;
        debug!(
            "opened container at {} ({count} blocks)",
            path.as_ref().display()
        );
        Ok(Self {
            file,
            secret: *secret,
            count,
            recycled: Vec::new(),
        })
    }

    /// Number of blocks in the host file.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Allocate a fresh zero-data block and write it immediately.
    ///
    /// Reuses the most recently recycled index when the pool is non-empty;
    /// otherwise appends at end of file.
    pub fn new_block(&mut self) -> Result<Block> {
        let position = match self.recycled.pop() {
            Some(pos) => {
                trace!("reusing recycled block {pos}");
                pos
            }
            None => {
                let pos = self.count;
                self.count += 1;
                pos
            }
        };
        let block = Block::new(position);
        self.save_block(position, &block)?;
        Ok(block)
    }

    /// Read, open, and validate the block at `index`.
    pub fn load_block(&mut self, index: u32) -> Result<Block> {
        if index >= self.count {
            return Err(Error::OutOfBounds {
                index,
                count: self.count,
            });
        }
        self.file
            .seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
        let mut sealed = [0u8; BLOCK_SIZE];
        self.file.read_exact(&mut sealed)?;

        let plain = crate::crypto::open(&self.secret, &sealed)
            .map_err(|_| Error::CorruptBlock { position: index })?;
        let (block, stored) = Block::unpack(index, &plain)
            .ok_or(Error::CorruptBlock { position: index })?;

        if block.previous == index as i32 || block.next == index as i32 {
            return Err(Error::HeaderReference { position: index });
        }
        let computed = block.compute_digest();
        if computed != stored {
            return Err(Error::DigestMismatch {
                position: index,
                stored:   hex::encode(stored),
                computed: hex::encode(computed),
            });
        }
        Ok(block)
    }

    /// Seal and write `block` at `index`, then flush and fsync.
    pub fn save_block(&mut self, index: u32, block: &Block) -> Result<()> {
        if block.position != index {
            return Err(Error::IndexPositionMismatch {
                expected: index,
                actual:   block.position,
            });
        }
        if index >= self.count {
            return Err(Error::OutOfBounds {
                index,
                count: self.count,
            });
        }
        let sealed = crate::crypto::seal(&self.secret, &block.pack())?;
        debug_assert_eq!(sealed.len(), BLOCK_SIZE);

        self.file
            .seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
        let written = self.file.write(&sealed)?;
        if written != BLOCK_SIZE {
            return Err(Error::FailedFullWrite {
                position: index,
                written,
                expected: BLOCK_SIZE,
            });
        }
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Return block indexes to the pool for future reuse.
    pub fn recycle(&mut self, indexes: impl IntoIterator<Item = u32>) {
        let before = self.recycled.len();
        self.recycled.extend(indexes);
        debug!("recycled {} blocks", self.recycled.len() - before);
    }

    /// Take the whole recycled pool (used when persisting it to trash).
    pub(crate) fn drain_recycled(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.recycled)
    }

    /// Restore a previously persisted pool.
    pub(crate) fn restore_recycled(&mut self, indexes: Vec<u32>) {
        self.recycled = indexes;
    }

    /// Flush file metadata as well as data.  Called once at close.
    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    const SECRET: [u8; 32] = [3u8; 32];

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.a7");
        (dir, path)
    }

    #[test]
    fn allocate_save_load_round_trip() {
        let (_dir, path) = scratch();
        let mut mgr = BlockManager::create(&path, &SECRET).unwrap();

        let mut b = mgr.new_block().unwrap();
        assert_eq!(b.position, 0);
        b.data[..4].copy_from_slice(b"abcd");
        mgr.save_block(0, &b).unwrap();

        let back = mgr.load_block(0).unwrap();
        assert_eq!(&back.data[..4], b"abcd");
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn recycled_indexes_are_reused_before_extending() {
        let (_dir, path) = scratch();
        let mut mgr = BlockManager::create(&path, &SECRET).unwrap();
        for _ in 0..3 {
            mgr.new_block().unwrap();
        }
        mgr.recycle([1u32]);
        let b = mgr.new_block().unwrap();
        assert_eq!(b.position, 1);
        assert_eq!(mgr.count(), 3);
        let b = mgr.new_block().unwrap();
        assert_eq!(b.position, 3);
        assert_eq!(mgr.count(), 4);
    }

    #[test]
    fn save_requires_matching_position() {
        let (_dir, path) = scratch();
        let mut mgr = BlockManager::create(&path, &SECRET).unwrap();
        mgr.new_block().unwrap();
        mgr.new_block().unwrap();
        let b = mgr.load_block(0).unwrap();
        assert!(matches!(
            mgr.save_block(1, &b),
            Err(Error::IndexPositionMismatch { .. })
        ));
    }

    #[test]
    fn flipped_ciphertext_byte_fails_authentication() {
        let (_dir, path) = scratch();
        {
            let mut mgr = BlockManager::create(&path, &SECRET).unwrap();
            mgr.new_block().unwrap();
        }
        {
            let mut f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(100)).unwrap();
            let mut byte = [0u8; 1];
            std::io::Read::read_exact(&mut f, &mut byte).unwrap();
            f.seek(SeekFrom::Start(100)).unwrap();
            f.write_all(&[byte[0] ^ 0x01]).unwrap();
        }
        let mut mgr = BlockManager::open(&path, &SECRET).unwrap();
        assert!(matches!(
            mgr.load_block(0),
            Err(Error::CorruptBlock { position: 0 })
        ));
    }

    #[test]
    fn uneven_file_is_rejected() {
        let (_dir, path) = scratch();
        {
            let mut mgr = BlockManager::create(&path, &SECRET).unwrap();
            mgr.new_block().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 17]).unwrap();
        }
        assert!(matches!(
            BlockManager::open(&path, &SECRET),
            Err(Error::UnevenArchive { .. })
        ));
    }
}
