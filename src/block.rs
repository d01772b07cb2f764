//! Block record — the fixed-size unit every container is built from.
//!
//! # On-disk layout
//!
//! Each block occupies exactly [`BLOCK_SIZE`] (4096) bytes of the host
//! file: one sealed envelope (see `crypto`).  The plaintext inside is 4056
//! bytes, all integers big-endian:
//!
//! ```text
//! Offset  Size  Field
//!    0      4   previous  i32   position of prior block in chain, −1 none
//!    4      4   next      i32   position of next block in chain, −1 none
//!    8      4   index     u32   ordinal of this block within its stream
//!   12     16   stream          UUID of the owning stream
//!   28     20   digest          SHA-1 of the `data` field
//!   48   4008   data            payload
//! ```
//!
//! The digest is an integrity cross-check *in addition to* the envelope's
//! Poly1305 tag: it survives re-encryption and pins the payload to the
//! chain header it was written with.
//!
//! `position` (the block's index in the host file) is not serialized — it
//! is implied by the file offset `position * 4096`.

use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::crypto::SEAL_OVERHEAD;

/// Size of one sealed block on disk.
pub const BLOCK_SIZE: usize = 4096;

/// Plaintext bytes inside one envelope.
pub const PLAIN_SIZE: usize = BLOCK_SIZE - SEAL_OVERHEAD;

/// Chain-header bytes at the front of the plaintext.
pub const HEADER_SIZE: usize = 48;

/// Payload bytes per block.
pub const DATA_SIZE: usize = PLAIN_SIZE - HEADER_SIZE;

/// Link value for "no neighbour".
pub const NIL_LINK: i32 = -1;

/// One decrypted block.
#[derive(Debug, Clone)]
pub struct Block {
    /// Index of this block in the host file (offset = position × 4096).
    pub position: u32,
    /// Position of the previous block in the chain, or −1.
    pub previous: i32,
    /// Position of the next block in the chain, or −1.
    pub next:     i32,
    /// Ordinal of this block within its stream, 0-based.
    pub index:    u32,
    /// Identity of the owning stream.
    pub stream:   Uuid,
    /// Payload.
    pub data:     Box<[u8; DATA_SIZE]>,
}

impl Block {
    /// A fresh zeroed block at `position`, not yet linked to any chain.
    pub fn new(position: u32) -> Self {
        Self {
            position,
            previous: NIL_LINK,
            next:     NIL_LINK,
            index:    0,
            stream:   Uuid::nil(),
            data:     Box::new([0u8; DATA_SIZE]),
        }
    }

    /// SHA-1 of the current payload.
    pub fn compute_digest(&self) -> [u8; 20] {
        let mut h = Sha1::new();
        h.update(&self.data[..]);
        h.finalize().into()
    }

    /// Serialize to the 4056-byte plaintext, embedding a fresh digest.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PLAIN_SIZE);
        buf.extend_from_slice(&self.previous.to_be_bytes());
        buf.extend_from_slice(&self.next.to_be_bytes());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(self.stream.as_bytes());
        buf.extend_from_slice(&self.compute_digest());
        buf.extend_from_slice(&self.data[..]);
        debug_assert_eq!(buf.len(), PLAIN_SIZE);
        buf
    }

    /// Parse a 4056-byte plaintext read from `position`.
    ///
    /// Returns the block and the digest *as stored*; the block manager
    /// compares it against [`Block::compute_digest`].
    pub fn unpack(position: u32, plain: &[u8]) -> Option<(Self, [u8; 20])> {
        if plain.len() != PLAIN_SIZE {
            return None;
        }
        let previous = i32::from_be_bytes(plain[0..4].try_into().unwrap());
        let next     = i32::from_be_bytes(plain[4..8].try_into().unwrap());
        let index    = u32::from_be_bytes(plain[8..12].try_into().unwrap());
        let stream   = Uuid::from_bytes(plain[12..28].try_into().unwrap());
        let digest: [u8; 20] = plain[28..48].try_into().unwrap();
        let mut data = Box::new([0u8; DATA_SIZE]);
        data.copy_from_slice(&plain[HEADER_SIZE..]);

        Some((
            Self { position, previous, next, index, stream, data },
            digest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_line_up() {
        assert_eq!(PLAIN_SIZE, 4056);
        assert_eq!(DATA_SIZE, 4008);
        assert_eq!(HEADER_SIZE + DATA_SIZE, PLAIN_SIZE);
        assert_eq!(PLAIN_SIZE + SEAL_OVERHEAD, BLOCK_SIZE);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut b = Block::new(9);
        b.previous = 4;
        b.next = 12;
        b.index = 3;
        b.stream = Uuid::new_v4();
        b.data[..5].copy_from_slice(b"hello");

        let plain = b.pack();
        let (back, stored) = Block::unpack(9, &plain).unwrap();
        assert_eq!(back.previous, 4);
        assert_eq!(back.next, 12);
        assert_eq!(back.index, 3);
        assert_eq!(back.stream, b.stream);
        assert_eq!(&back.data[..5], b"hello");
        assert_eq!(stored, back.compute_digest());
    }

    #[test]
    fn unpack_rejects_short_input() {
        assert!(Block::unpack(0, &[0u8; 100]).is_none());
    }
}
