//! Stream manager — the container's root of ownership.
//!
//! Owns the block manager and the five reserved internal streams, and keeps
//! the registry of user streams.  Block 0 is the metadata block; its 4008
//! payload bytes are split into:
//!
//! ```text
//! [ caller-opaque header (3818 B) | 5 × packed StreamMeta (190 B) ]
//! ```
//!
//! Reserved streams (identities are the small-integer UUIDs 0..4):
//!
//! | # | Purpose                                |
//! |---|----------------------------------------|
//! | 0 | stream registry B+Tree                 |
//! | 1 | trash — persisted recycled-block pool  |
//! | 2 | entry registry B+Tree                  |
//! | 3 | path registry B+Tree                   |
//! | 4 | listing registry B+Tree                |
//!
//! User streams are registered in the stream-registry tree keyed by their
//! UUID; the 38-byte metadata record is the value.  The recycled-block pool
//! lives in memory during a session and is drained into the trash stream at
//! close (drained *first*, so writing the snapshot cannot pop from the pool
//! it is serializing).  Entries lost to a crash are leaked blocks, never
//! corruption.

use std::collections::HashSet;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use uuid::Uuid;

use crate::block::{Block, DATA_SIZE};
use crate::blocks::BlockManager;
use crate::btree::Btree;
use crate::error::{Error, Result};
use crate::file::VirtualFile;
use crate::stream::{Stream, StreamMeta, STREAM_META_SIZE};

/// Number of reserved internal streams.
pub const SPECIAL_STREAM_COUNT: usize = 5;

pub const SPECIAL_REGISTRY: usize = 0;
pub const SPECIAL_TRASH: usize = 1;
pub const SPECIAL_ENTRIES: usize = 2;
pub const SPECIAL_PATHS: usize = 3;
pub const SPECIAL_LISTINGS: usize = 4;

/// Caller-opaque header bytes at the top of block 0's payload.
pub const META_AREA_SIZE: usize = DATA_SIZE - SPECIAL_STREAM_COUNT * STREAM_META_SIZE;

/// Stream-registry record: identity key + packed metadata value.
const REGISTRY_REC_SIZE: usize = 16 + STREAM_META_SIZE;

pub struct StreamManager {
    pub(crate) blocks: BlockManager,
    meta_block: Block,
    special:    Vec<Stream>,
    registry:   Btree,
    opened:     HashSet<Uuid>,
}

impl StreamManager {
    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a new container: metadata block, five reserved streams, an
    /// empty stream registry, and an empty trash.
    pub fn create<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let mut blocks = BlockManager::create(path, secret)?;
        let meta_block = blocks.new_block()?;
        debug_assert_eq!(meta_block.position, 0);

        let mut special = Vec::with_capacity(SPECIAL_STREAM_COUNT);
        for i in 0..SPECIAL_STREAM_COUNT {
            special.push(Stream::create(&mut blocks, Uuid::from_u128(i as u128))?);
        }
        let registry = {
            let mut file = VirtualFile::new(&mut blocks, &mut special[SPECIAL_REGISTRY]);
            Btree::create(&mut file, 16, REGISTRY_REC_SIZE)?
        };

        let mut mgr = Self {
            blocks,
            meta_block,
            special,
            registry,
            opened: HashSet::new(),
        };
        mgr.save()?;
        debug!("container initialized ({} reserved streams)", SPECIAL_STREAM_COUNT);
        Ok(mgr)
    }

    /// Mount an existing container from its metadata block.
    pub fn mount<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let mut blocks = BlockManager::open(path, secret)?;
        let meta_block = blocks.load_block(0)?;

        let mut special = Vec::with_capacity(SPECIAL_STREAM_COUNT);
        for i in 0..SPECIAL_STREAM_COUNT {
            let at = META_AREA_SIZE + i * STREAM_META_SIZE;
            let meta = StreamMeta::unpack(&meta_block.data[at..at + STREAM_META_SIZE])
                .ok_or_else(|| Error::TreeCorrupt {
                    detail: format!("unreadable reserved stream record {i}"),
                })?;
            if meta.identity != Uuid::from_u128(i as u128) {
                return Err(Error::CorruptStreamIdentifier {
                    slot:  i,
                    found: meta.identity,
                });
            }
            special.push(Stream::open(&mut blocks, meta)?);
        }
        let registry = {
            let mut file = VirtualFile::new(&mut blocks, &mut special[SPECIAL_REGISTRY]);
            Btree::mount(&mut file, 16, REGISTRY_REC_SIZE)?
        };

        let mut mgr = Self {
            blocks,
            meta_block,
            special,
            registry,
            opened: HashSet::new(),
        };
        mgr.load_trash()?;
        debug!("container mounted ({} blocks)", mgr.blocks.count());
        Ok(mgr)
    }

    /// Flush every reserved stream and rewrite the metadata block.
    pub fn save(&mut self) -> Result<()> {
        for i in 0..SPECIAL_STREAM_COUNT {
            self.special[i].save(&mut self.blocks, false)?;
        }
        for i in 0..SPECIAL_STREAM_COUNT {
            let at = META_AREA_SIZE + i * STREAM_META_SIZE;
            self.meta_block.data[at..at + STREAM_META_SIZE]
                .copy_from_slice(&self.special[i].meta().pack());
        }
        self.blocks.save_block(0, &self.meta_block)
    }

    /// Persist the trash pool, flush everything, fsync, release the lock.
    pub fn close(mut self) -> Result<()> {
        self.save_trash()?;
        self.save()?;
        self.blocks.sync_all()?;
        debug!("container closed");
        Ok(())
    }

    // ── Caller header area ───────────────────────────────────────────────

    /// The caller-opaque header bytes at the top of block 0's payload.
    pub fn meta_area(&self) -> &[u8] {
        &self.meta_block.data[..META_AREA_SIZE]
    }

    /// Mutable view of the header area.  Persisted on the next [`save`].
    ///
    /// [`save`]: StreamManager::save
    pub fn meta_area_mut(&mut self) -> &mut [u8] {
        &mut self.meta_block.data[..META_AREA_SIZE]
    }

    // ── Reserved streams ─────────────────────────────────────────────────

    /// Borrow a reserved stream together with the block manager, as needed
    /// to wrap it in a [`VirtualFile`].  Out-of-range → `SpecialStreamBoundary`.
    pub fn special_parts(&mut self, index: usize) -> Result<(&mut BlockManager, &mut Stream)> {
        if index >= SPECIAL_STREAM_COUNT {
            return Err(Error::SpecialStreamBoundary {
                index,
                limit: SPECIAL_STREAM_COUNT,
            });
        }
        Ok((&mut self.blocks, &mut self.special[index]))
    }

    // ── User streams ─────────────────────────────────────────────────────

    /// Allocate and register a stream under a fresh random identity.  The
    /// returned stream is resident until [`close_stream`].
    ///
    /// [`close_stream`]: StreamManager::close_stream
    pub fn new_stream(&mut self) -> Result<Stream> {
        let identity = Uuid::new_v4();
        let stream = Stream::create(&mut self.blocks, identity)?;

        let mut rec = Vec::with_capacity(REGISTRY_REC_SIZE);
        rec.extend_from_slice(identity.as_bytes());
        rec.extend_from_slice(&stream.meta().pack());
        {
            let mut file =
                VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_REGISTRY]);
            self.registry.insert(&mut file, &rec)?;
        }
        self.opened.insert(identity);
        Ok(stream)
    }

    /// Open a registered stream at its begin block.
    pub fn open_stream(&mut self, identity: Uuid) -> Result<Stream> {
        if self.opened.contains(&identity) {
            return Err(Error::AlreadyOpen { identity });
        }
        let rec = {
            let mut file =
                VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_REGISTRY]);
            self.registry
                .get(&mut file, identity.as_bytes())
                .map_err(|e| match e {
                    Error::RecordNotFound => Error::NoStreamIdentity { identity },
                    other => other,
                })?
        };
        let meta = StreamMeta::unpack(&rec[16..]).ok_or(Error::NoStreamIdentity { identity })?;
        let stream = Stream::open(&mut self.blocks, meta)?;
        self.opened.insert(identity);
        Ok(stream)
    }

    /// Save a resident stream and upsert its metadata in the registry.
    pub fn close_stream(&mut self, mut stream: Stream) -> Result<()> {
        stream.save(&mut self.blocks, false)?;
        let identity = stream.identity();
        {
            let mut file =
                VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_REGISTRY]);
            self.registry
                .update(&mut file, identity.as_bytes(), &stream.meta().pack())
                .map_err(|e| match e {
                    Error::RecordNotFound => Error::NoStreamIdentity { identity },
                    other => other,
                })?;
        }
        self.opened.remove(&identity);
        Ok(())
    }

    /// Unregister a stream and recycle every block of its chain.
    pub fn del_stream(&mut self, identity: Uuid) -> Result<()> {
        if self.opened.contains(&identity) {
            return Err(Error::AlreadyOpen { identity });
        }
        let rec = {
            let mut file =
                VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_REGISTRY]);
            self.registry
                .get(&mut file, identity.as_bytes())
                .map_err(|e| match e {
                    Error::RecordNotFound => Error::NoStreamIdentity { identity },
                    other => other,
                })?
        };
        let meta = StreamMeta::unpack(&rec[16..]).ok_or(Error::NoStreamIdentity { identity })?;

        let mut dropped = Vec::with_capacity(meta.count as usize);
        let mut link = meta.begin;
        while link >= 0 {
            let block = self.blocks.load_block(link as u32)?;
            dropped.push(block.position);
            link = block.next;
        }
        {
            let mut file =
                VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_REGISTRY]);
            self.registry.delete(&mut file, identity.as_bytes())?;
        }
        self.blocks.recycle(dropped);
        debug!("deleted stream {identity} ({} blocks)", meta.count);
        Ok(())
    }

    // ── Trash persistence ────────────────────────────────────────────────

    fn load_trash(&mut self) -> Result<()> {
        let stream = &mut self.special[SPECIAL_TRASH];
        if stream.len() < 4 {
            return Ok(());
        }
        let mut file = VirtualFile::new(&mut self.blocks, stream);
        file.seek(SeekFrom::Start(0))?;
        let count = file.read_u32::<BigEndian>()?;
        let mut pool = Vec::with_capacity(count as usize);
        for _ in 0..count {
            pool.push(file.read_u32::<BigEndian>()?);
        }
        debug!("restored {} recycled block indexes", pool.len());
        self.blocks.restore_recycled(pool);
        Ok(())
    }

    fn save_trash(&mut self) -> Result<()> {
        let pool = self.blocks.drain_recycled();
        let mut file = VirtualFile::new(&mut self.blocks, &mut self.special[SPECIAL_TRASH]);
        file.seek(SeekFrom::Start(0))?;
        file.write_u32::<BigEndian>(pool.len() as u32)?;
        for index in &pool {
            file.write_u32::<BigEndian>(*index)?;
        }
        std::io::Write::flush(&mut file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DATA_SIZE;
    use std::io::{Read, Write};

    const SECRET: [u8; 32] = [23u8; 32];

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.a7");
        (dir, path)
    }

    #[test]
    fn create_mount_round_trip() {
        let (_d, path) = scratch();
        {
            let mgr = StreamManager::create(&path, &SECRET).unwrap();
            mgr.close().unwrap();
        }
        let mgr = StreamManager::mount(&path, &SECRET).unwrap();
        assert!(mgr.meta_area().iter().all(|&b| b == 0));
        mgr.close().unwrap();
    }

    #[test]
    fn user_stream_survives_reopen() {
        let (_d, path) = scratch();
        let identity;
        {
            let mut mgr = StreamManager::create(&path, &SECRET).unwrap();
            let mut stream = mgr.new_stream().unwrap();
            identity = stream.identity();
            {
                let mut file = VirtualFile::new(&mut mgr.blocks, &mut stream);
                file.write_all(b"persisted bytes").unwrap();
                file.flush().unwrap();
            }
            mgr.close_stream(stream).unwrap();
            mgr.close().unwrap();
        }

        let mut mgr = StreamManager::mount(&path, &SECRET).unwrap();
        let mut stream = mgr.open_stream(identity).unwrap();
        let mut back = String::new();
        {
            let mut file = VirtualFile::new(&mut mgr.blocks, &mut stream);
            file.read_to_string(&mut back).unwrap();
        }
        assert_eq!(back, "persisted bytes");
        mgr.close_stream(stream).unwrap();
        mgr.close().unwrap();
    }

    #[test]
    fn double_open_is_rejected() {
        let (_d, path) = scratch();
        let mut mgr = StreamManager::create(&path, &SECRET).unwrap();
        let stream = mgr.new_stream().unwrap();
        let identity = stream.identity();
        assert!(matches!(
            mgr.open_stream(identity),
            Err(Error::AlreadyOpen { .. })
        ));
        mgr.close_stream(stream).unwrap();
        let reopened = mgr.open_stream(identity).unwrap();
        mgr.close_stream(reopened).unwrap();
    }

    #[test]
    fn unknown_stream_identity() {
        let (_d, path) = scratch();
        let mut mgr = StreamManager::create(&path, &SECRET).unwrap();
        assert!(matches!(
            mgr.open_stream(Uuid::new_v4()),
            Err(Error::NoStreamIdentity { .. })
        ));
    }

    #[test]
    fn deleted_stream_blocks_feed_the_next_allocation() {
        let (_d, path) = scratch();
        let identity;
        {
            let mut mgr = StreamManager::create(&path, &SECRET).unwrap();
            let mut stream = mgr.new_stream().unwrap();
            identity = stream.identity();
            {
                let mut file = VirtualFile::new(&mut mgr.blocks, &mut stream);
                file.write_all(&vec![9u8; DATA_SIZE * 2]).unwrap();
                file.flush().unwrap();
            }
            mgr.close_stream(stream).unwrap();
            mgr.close().unwrap();
        }

        let mut mgr = StreamManager::mount(&path, &SECRET).unwrap();
        let count_before = mgr.blocks.count();
        mgr.del_stream(identity).unwrap();
        // Two payload blocks went back to the pool; the next stream reuses
        // one instead of growing the file.
        let stream = mgr.new_stream().unwrap();
        assert_eq!(mgr.blocks.count(), count_before);
        mgr.close_stream(stream).unwrap();
        mgr.close().unwrap();
    }

    #[test]
    fn special_boundary_is_checked() {
        let (_d, path) = scratch();
        let mut mgr = StreamManager::create(&path, &SECRET).unwrap();
        assert!(mgr.special_parts(4).is_ok());
        assert!(matches!(
            mgr.special_parts(5),
            Err(Error::SpecialStreamBoundary { .. })
        ));
    }
}
