//! Caller header — the human-facing identity at the top of block 0.
//!
//! # Layout (344 bytes, big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic     = "archive7"
//!    8      1   variant   = 'a'
//!    9      2   major     u16
//!   11      2   minor     u16
//!   13      1   kind      i8
//!   14      1   role      i8
//!   15      1   usage     i8
//!   16     16   identity  container UUID
//!   32     16   owner     UUID
//!   48     16   domain    UUID
//!   64     16   node      UUID
//!   80      8   created   i64 seconds since epoch
//!   88    256   title     UTF-8, NUL-padded
//! ```
//!
//! The header occupies the leading bytes of the metadata block's
//! caller-opaque area; the engine itself never interprets it beyond the
//! magic/variant gate (`InvalidFormat`).

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 344;
pub const MAGIC: &[u8; 8] = b"archive7";
pub const VARIANT: u8 = b'a';
pub const VERSION: (u16, u16) = (1, 0);

const TITLE_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub major:    u16,
    pub minor:    u16,
    pub kind:     i8,
    pub role:     i8,
    pub usage:    i8,
    pub identity: Uuid,
    pub owner:    Uuid,
    pub domain:   Uuid,
    pub node:     Uuid,
    pub created:  i64,
    pub title:    String,
}

impl Header {
    /// A header for a freshly created container.
    pub fn new(owner: Uuid, domain: Uuid, node: Uuid, title: &str) -> Result<Self> {
        if title.len() > TITLE_LIMIT {
            return Err(Error::InvalidName {
                field: "title",
                limit: TITLE_LIMIT,
            });
        }
        Ok(Self {
            major:    VERSION.0,
            minor:    VERSION.1,
            kind:     0,
            role:     0,
            usage:    0,
            identity: Uuid::new_v4(),
            owner,
            domain,
            node,
            created:  Utc::now().timestamp(),
            title:    title.to_string(),
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.push(VARIANT);
        buf.extend_from_slice(&self.major.to_be_bytes());
        buf.extend_from_slice(&self.minor.to_be_bytes());
        buf.push(self.kind as u8);
        buf.push(self.role as u8);
        buf.push(self.usage as u8);
        buf.extend_from_slice(self.identity.as_bytes());
        buf.extend_from_slice(self.owner.as_bytes());
        buf.extend_from_slice(self.domain.as_bytes());
        buf.extend_from_slice(self.node.as_bytes());
        buf.extend_from_slice(&self.created.to_be_bytes());
        let mut title = [0u8; TITLE_LIMIT];
        let n = self.title.len().min(TITLE_LIMIT);
        title[..n].copy_from_slice(&self.title.as_bytes()[..n]);
        buf.extend_from_slice(&title);
        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf
    }

    /// Parse and gate on magic + variant (`InvalidFormat` on mismatch).
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE || &buf[0..8] != MAGIC || buf[8] != VARIANT {
            return Err(Error::InvalidFormat);
        }
        let title_end = buf[88..344]
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |p| p + 1);
        Ok(Self {
            major:    u16::from_be_bytes(buf[9..11].try_into().unwrap()),
            minor:    u16::from_be_bytes(buf[11..13].try_into().unwrap()),
            kind:     buf[13] as i8,
            role:     buf[14] as i8,
            usage:    buf[15] as i8,
            identity: Uuid::from_bytes(buf[16..32].try_into().unwrap()),
            owner:    Uuid::from_bytes(buf[32..48].try_into().unwrap()),
            domain:   Uuid::from_bytes(buf[48..64].try_into().unwrap()),
            node:     Uuid::from_bytes(buf[64..80].try_into().unwrap()),
            created:  i64::from_be_bytes(buf[80..88].try_into().unwrap()),
            title:    String::from_utf8_lossy(&buf[88..88 + title_end]).into_owned(),
        })
    }
}
