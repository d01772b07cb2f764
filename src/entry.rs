//! Filesystem entries — files, links, and directories.
//!
//! # Entry record (396 bytes, big-endian, fixed widths)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   type      b'f' file, b'l' link, b'd' dir
//!    1     16   id        entry UUID
//!   17     16   parent    parent directory UUID
//!   33     16   owner     link target id (LINK); otherwise nil
//!   49     16   stream    data stream UUID (FILE); nil until first open
//!   65      8   created   i64 seconds since epoch
//!   73      8   modified  i64 seconds since epoch
//!   81      8   length    u64 payload bytes
//!   89      1   deleted   0 or 1
//!   90    256   name      UTF-8, NUL-padded
//!  346     32   user      NUL-padded
//!  378     16   group     NUL-padded
//!  394      2   perms     u16, clamped to 0..0o777
//! ```
//!
//! The path registry keys entries by `uuid5(parent, name)`, which is what
//! enforces name uniqueness per directory.  Its 17-byte value is the
//! [`PathRecord`] below; the listing registry stores bare child UUIDs.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Packed size of one entry record.
pub const ENTRY_RECORD_SIZE: usize = 396;

/// Packed size of one path-registry value.
pub const PATH_RECORD_SIZE: usize = 17;

pub const NAME_LIMIT: usize = 256;
pub const USER_LIMIT: usize = 32;
pub const GROUP_LIMIT: usize = 16;

/// Highest representable permission mode.
pub const PERMS_MASK: u16 = 0o777;

// ── EntryType ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Link,
    Dir,
}

impl EntryType {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            EntryType::File => b'f',
            EntryType::Link => b'l',
            EntryType::Dir => b'd',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'f' => Ok(EntryType::File),
            b'l' => Ok(EntryType::Link),
            b'd' => Ok(EntryType::Dir),
            _ => Err(Error::UnknownEntryType { tag }),
        }
    }
}

// ── Path key ─────────────────────────────────────────────────────────────────

/// The path registry key: a v5 UUID of the name within its parent's
/// namespace.  Two entries of the same name under one directory collide
/// here by construction.
#[inline]
pub fn path_key(parent: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&parent, name.as_bytes())
}

// ── Entry ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind:     EntryType,
    pub id:       Uuid,
    pub parent:   Uuid,
    pub owner:    Uuid,
    pub stream:   Uuid,
    pub created:  i64,
    pub modified: i64,
    pub length:   u64,
    pub deleted:  bool,
    pub name:     String,
    pub user:     String,
    pub group:    String,
    pub perms:    u16,
}

impl Entry {
    /// A fresh entry of `kind` named `name` under `parent`, stamped now.
    ///
    /// Directories default to mode 0o755, everything else to 0o644.
    pub fn blank(kind: EntryType, name: &str, parent: Uuid) -> Result<Self> {
        let now = Utc::now().timestamp();
        let entry = Self {
            kind,
            id: Uuid::new_v4(),
            parent,
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            length: 0,
            deleted: false,
            name: name.to_string(),
            user: String::new(),
            group: String::new(),
            perms: if kind == EntryType::Dir { 0o755 } else { 0o644 },
        };
        entry.check_limits()?;
        Ok(entry)
    }

    /// The root directory: nil id, nil parent, name `/`.
    pub fn root() -> Self {
        let now = Utc::now().timestamp();
        Self {
            kind: EntryType::Dir,
            id: Uuid::nil(),
            parent: Uuid::nil(),
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            length: 0,
            deleted: false,
            name: "/".to_string(),
            user: String::new(),
            group: String::new(),
            perms: 0o755,
        }
    }

    /// The path-registry key of this entry under its current parent/name.
    #[inline]
    pub fn path_key(&self) -> Uuid {
        path_key(self.parent, &self.name)
    }

    /// Verify the variable-width fields fit their on-disk slots.
    pub fn check_limits(&self) -> Result<()> {
        if self.name.len() > NAME_LIMIT || self.name.is_empty() {
            return Err(Error::InvalidName {
                field: "name",
                limit: NAME_LIMIT,
            });
        }
        if self.user.len() > USER_LIMIT {
            return Err(Error::InvalidName {
                field: "user",
                limit: USER_LIMIT,
            });
        }
        if self.group.len() > GROUP_LIMIT {
            return Err(Error::InvalidName {
                field: "group",
                limit: GROUP_LIMIT,
            });
        }
        Ok(())
    }

    /// Serialize to the fixed 396-byte record.  Permissions are clamped to
    /// the octal mask here, matching what a later unpack reports.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ENTRY_RECORD_SIZE];
        buf[0] = self.kind.tag();
        buf[1..17].copy_from_slice(self.id.as_bytes());
        buf[17..33].copy_from_slice(self.parent.as_bytes());
        buf[33..49].copy_from_slice(self.owner.as_bytes());
        buf[49..65].copy_from_slice(self.stream.as_bytes());
        buf[65..73].copy_from_slice(&self.created.to_be_bytes());
        buf[73..81].copy_from_slice(&self.modified.to_be_bytes());
        buf[81..89].copy_from_slice(&self.length.to_be_bytes());
        buf[89] = self.deleted as u8;
        buf[90..90 + self.name.len().min(NAME_LIMIT)]
            .copy_from_slice(&self.name.as_bytes()[..self.name.len().min(NAME_LIMIT)]);
        buf[346..346 + self.user.len().min(USER_LIMIT)]
            .copy_from_slice(&self.user.as_bytes()[..self.user.len().min(USER_LIMIT)]);
        buf[378..378 + self.group.len().min(GROUP_LIMIT)]
            .copy_from_slice(&self.group.as_bytes()[..self.group.len().min(GROUP_LIMIT)]);
        buf[394..396].copy_from_slice(&(self.perms & PERMS_MASK).to_be_bytes());
        buf
    }

    /// Parse a 396-byte record; trailing NULs are trimmed from the string
    /// fields.
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() != ENTRY_RECORD_SIZE {
            return Err(Error::TreeCorrupt {
                detail: format!("entry record of {} bytes", buf.len()),
            });
        }
        let kind = EntryType::from_tag(buf[0])?;
        let trim = |bytes: &[u8]| -> String {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        };
        Ok(Self {
            kind,
            id:       Uuid::from_bytes(buf[1..17].try_into().unwrap()),
            parent:   Uuid::from_bytes(buf[17..33].try_into().unwrap()),
            owner:    Uuid::from_bytes(buf[33..49].try_into().unwrap()),
            stream:   Uuid::from_bytes(buf[49..65].try_into().unwrap()),
            created:  i64::from_be_bytes(buf[65..73].try_into().unwrap()),
            modified: i64::from_be_bytes(buf[73..81].try_into().unwrap()),
            length:   u64::from_be_bytes(buf[81..89].try_into().unwrap()),
            deleted:  buf[89] != 0,
            name:     trim(&buf[90..346]),
            user:     trim(&buf[346..378]),
            group:    trim(&buf[378..394]),
            perms:    u16::from_be_bytes(buf[394..396].try_into().unwrap()),
        })
    }
}

// ── PathRecord ───────────────────────────────────────────────────────────────

/// The 17-byte path-registry value: entry type tag plus entry id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRecord {
    pub kind: EntryType,
    pub id:   Uuid,
}

impl PathRecord {
    pub fn pack(&self) -> [u8; PATH_RECORD_SIZE] {
        let mut buf = [0u8; PATH_RECORD_SIZE];
        buf[0] = self.kind.tag();
        buf[1..17].copy_from_slice(self.id.as_bytes());
        buf
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() != PATH_RECORD_SIZE {
            return Err(Error::TreeCorrupt {
                detail: format!("path record of {} bytes", buf.len()),
            });
        }
        Ok(Self {
            kind: EntryType::from_tag(buf[0])?,
            id:   Uuid::from_bytes(buf[1..17].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn record_width_is_fixed() {
        let e = Entry::root();
        assert_eq!(e.pack().len(), ENTRY_RECORD_SIZE);
    }

    #[test]
    fn same_name_same_parent_collides_in_path_key() {
        let parent = Uuid::new_v4();
        assert_eq!(path_key(parent, "a"), path_key(parent, "a"));
        assert_ne!(path_key(parent, "a"), path_key(parent, "b"));
        assert_ne!(path_key(parent, "a"), path_key(Uuid::new_v4(), "a"));
    }

    #[test]
    fn limits_are_enforced() {
        assert!(Entry::blank(EntryType::File, &"x".repeat(257), Uuid::nil()).is_err());
        assert!(Entry::blank(EntryType::File, "", Uuid::nil()).is_err());
        let mut e = Entry::blank(EntryType::File, "ok", Uuid::nil()).unwrap();
        e.user = "u".repeat(33);
        assert!(e.check_limits().is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = Entry::root().pack();
        buf[0] = b'q';
        assert!(matches!(
            Entry::unpack(&buf),
            Err(Error::UnknownEntryType { tag: b'q' })
        ));
    }

    proptest! {
        #[test]
        fn pack_unpack_round_trips(
            name in "[a-zA-Z0-9._-]{1,64}",
            user in "[a-z]{0,32}",
            group in "[a-z]{0,16}",
            created in any::<i64>(),
            modified in any::<i64>(),
            length in any::<u64>(),
            deleted in any::<bool>(),
            perms in any::<u16>(),
        ) {
            let mut e = Entry::blank(EntryType::File, &name, Uuid::new_v4()).unwrap();
            e.owner = Uuid::new_v4();
            e.stream = Uuid::new_v4();
            e.created = created;
            e.modified = modified;
            e.length = length;
            e.deleted = deleted;
            e.user = user;
            e.group = group;
            e.perms = perms;

            let back = Entry::unpack(&e.pack()).unwrap();
            let mut expected = e.clone();
            expected.perms &= PERMS_MASK;
            prop_assert_eq!(back, expected);
        }
    }

    #[test]
    fn path_record_round_trip() {
        let rec = PathRecord {
            kind: EntryType::Link,
            id:   Uuid::new_v4(),
        };
        assert_eq!(PathRecord::unpack(&rec.pack()).unwrap(), rec);
    }
}
