//! Streams — variable-length logical byte sequences over block chains.
//!
//! A stream is a doubly-linked chain of blocks.  Its metadata record (38
//! bytes on disk, big-endian) lives either in-line in the metadata block
//! (reserved streams) or in the stream registry (user streams):
//!
//! ```text
//! Offset  Size  Field
//!    0     16   identity      stream UUID
//!   16      4   begin   i32   position of first block, −1 if empty
//!   20      4   end     i32   position of last block, −1 if empty
//!   24      4   count   u32   blocks in chain
//!   28      8   length  u64   logical byte length (≤ count × 4008)
//!   36      2   compression   reserved, 0
//! ```
//!
//! A [`Stream`] pins exactly one resident block (the cursor).  Moving the
//! cursor saves the resident block first if it is dirty, so at most one
//! block per stream is ever unwritten.  All operations borrow the
//! [`BlockManager`] — streams never own it.

use uuid::Uuid;

use crate::block::{Block, DATA_SIZE, NIL_LINK};
use crate::blocks::BlockManager;
use crate::error::{Error, Result};

/// Packed size of one stream metadata record.
pub const STREAM_META_SIZE: usize = 38;

// ── Metadata record ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMeta {
    pub identity:    Uuid,
    pub begin:       i32,
    pub end:         i32,
    pub count:       u32,
    pub length:      u64,
    pub compression: u16,
}

impl StreamMeta {
    /// Metadata for a one-block stream whose begin block sits at `position`.
    pub fn single(identity: Uuid, position: u32) -> Self {
        Self {
            identity,
            begin: position as i32,
            end: position as i32,
            count: 1,
            length: 0,
            compression: 0,
        }
    }

    pub fn pack(&self) -> [u8; STREAM_META_SIZE] {
        let mut buf = [0u8; STREAM_META_SIZE];
        buf[0..16].copy_from_slice(self.identity.as_bytes());
        buf[16..20].copy_from_slice(&self.begin.to_be_bytes());
        buf[20..24].copy_from_slice(&self.end.to_be_bytes());
        buf[24..28].copy_from_slice(&self.count.to_be_bytes());
        buf[28..36].copy_from_slice(&self.length.to_be_bytes());
        buf[36..38].copy_from_slice(&self.compression.to_be_bytes());
        buf
    }

    pub fn unpack(buf: &[u8]) -> Option<Self> {
        if buf.len() < STREAM_META_SIZE {
            return None;
        }
        Some(Self {
            identity:    Uuid::from_bytes(buf[0..16].try_into().unwrap()),
            begin:       i32::from_be_bytes(buf[16..20].try_into().unwrap()),
            end:         i32::from_be_bytes(buf[20..24].try_into().unwrap()),
            count:       u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            length:      u64::from_be_bytes(buf[28..36].try_into().unwrap()),
            compression: u16::from_be_bytes(buf[36..38].try_into().unwrap()),
        })
    }
}

// ── Stream ───────────────────────────────────────────────────────────────────

pub struct Stream {
    meta:  StreamMeta,
    block: Block,
    dirty: bool,
}

impl Stream {
    /// Allocate a brand-new one-block stream.
    pub fn create(blocks: &mut BlockManager, identity: Uuid) -> Result<Self> {
        let mut block = blocks.new_block()?;
        block.stream = identity;
        blocks.save_block(block.position, &block)?;
        Ok(Self {
            meta: StreamMeta::single(identity, block.position),
            block,
            dirty: false,
        })
    }

    /// Load an existing stream at its begin block.
    pub fn open(blocks: &mut BlockManager, meta: StreamMeta) -> Result<Self> {
        if meta.begin < 0 {
            return Err(Error::NoStreamIdentity {
                identity: meta.identity,
            });
        }
        let block = blocks.load_block(meta.begin as u32)?;
        Ok(Self { meta, block, dirty: false })
    }

    #[inline]
    pub fn identity(&self) -> Uuid {
        self.meta.identity
    }

    /// Current metadata snapshot (what the registry should store).
    #[inline]
    pub fn meta(&self) -> StreamMeta {
        self.meta
    }

    /// Ordinal of the resident block within the stream.
    #[inline]
    pub fn current_index(&self) -> u32 {
        self.block.index
    }

    /// Logical byte length.
    #[inline]
    pub fn len(&self) -> u64 {
        self.meta.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meta.length == 0
    }

    /// Number of blocks in the chain.
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.meta.count
    }

    /// Additively adjust the logical length, returning the new value.
    pub fn add_len(&mut self, delta: i64) -> u64 {
        self.meta.length = self.meta.length.saturating_add_signed(delta);
        self.meta.length
    }

    /// Read access to the resident block's payload.
    #[inline]
    pub fn data(&self) -> &[u8; DATA_SIZE] {
        &self.block.data
    }

    /// Mutable access to the resident block's payload; marks it dirty.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8; DATA_SIZE] {
        self.dirty = true;
        &mut self.block.data
    }

    /// Write the resident block through if dirty (or when enforced).
    pub fn save(&mut self, blocks: &mut BlockManager, enforce: bool) -> Result<()> {
        if self.dirty || enforce {
            blocks.save_block(self.block.position, &self.block)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Advance the cursor one block.  Returns false at the chain end.
    pub fn next(&mut self, blocks: &mut BlockManager) -> Result<bool> {
        if self.block.next == NIL_LINK {
            return Ok(false);
        }
        self.save(blocks, false)?;
        self.block = blocks.load_block(self.block.next as u32)?;
        Ok(true)
    }

    /// Step the cursor one block back.  Returns false at the chain start.
    pub fn previous(&mut self, blocks: &mut BlockManager) -> Result<bool> {
        if self.block.previous == NIL_LINK {
            return Ok(false);
        }
        self.save(blocks, false)?;
        self.block = blocks.load_block(self.block.previous as u32)?;
        Ok(true)
    }

    /// Move the cursor to block ordinal `to`, walking the chain in either
    /// direction.  Returns the ordinal actually landed on (the cursor stops
    /// at the chain boundary when `to` is unreachable).
    pub fn wind(&mut self, blocks: &mut BlockManager, to: u32) -> Result<u32> {
        while self.block.index < to {
            if !self.next(blocks)? {
                break;
            }
        }
        while self.block.index > to {
            if !self.previous(blocks)? {
                break;
            }
        }
        Ok(self.block.index)
    }

    /// Append one block to the chain.  Only legal with the cursor on the
    /// last block; the new block's ordinal equals the pre-extend count and
    /// the cursor moves onto it.
    pub fn extend(&mut self, blocks: &mut BlockManager) -> Result<()> {
        if self.block.next != NIL_LINK {
            return Err(Error::OutOfBounds {
                index: self.block.index,
                count: self.meta.count,
            });
        }
        let mut fresh = blocks.new_block()?;
        fresh.previous = self.block.position as i32;
        fresh.index = self.meta.count;
        fresh.stream = self.meta.identity;

        self.block.next = fresh.position as i32;
        self.dirty = true;
        self.save(blocks, true)?;

        self.block = fresh;
        self.dirty = true;
        self.meta.count += 1;
        self.meta.end = self.block.position as i32;
        Ok(())
    }

    /// Shrink the stream to `length` bytes.
    ///
    /// The block containing the new end keeps its leading bytes and is
    /// zeroed after them; every following block is detached and recycled.
    /// Growing is not supported — a `length` at or above the current one is
    /// a no-op.
    pub fn truncate(&mut self, blocks: &mut BlockManager, length: u64) -> Result<u64> {
        if length >= self.meta.length {
            return Ok(self.meta.length);
        }
        let target = (length / DATA_SIZE as u64) as u32;
        let landed = self.wind(blocks, target)?;
        if landed != target {
            return Err(Error::OutOfBounds {
                index: target,
                count: self.meta.count,
            });
        }

        let intra = (length % DATA_SIZE as u64) as usize;
        self.block.data[intra..].fill(0);
        self.dirty = true;

        let mut dropped = Vec::new();
        let mut link = self.block.next;
        while link != NIL_LINK {
            let b = blocks.load_block(link as u32)?;
            dropped.push(b.position);
            link = b.next;
        }

        self.block.next = NIL_LINK;
        self.save(blocks, true)?;
        blocks.recycle(dropped);

        self.meta.end = self.block.position as i32;
        self.meta.count = target + 1;
        self.meta.length = length;
        Ok(length)
    }
}
