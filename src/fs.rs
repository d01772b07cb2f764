//! Filesystem overlay — entries, paths, and listings over the stream store.
//!
//! Three index trees persist the hierarchy, each in its own reserved
//! stream:
//!
//! - **entries** (simple): entry UUID → packed [`Entry`] record.
//! - **paths** (simple): `uuid5(parent, name)` → `(type, id)`.  One key per
//!   (directory, name) pair, so sibling name collisions are impossible.
//! - **listings** (multi): directory UUID → set of child UUIDs.  An absent
//!   key is an empty directory.
//!
//! The overlay owns the open-descriptor table; simultaneous descriptors on
//! one entry are refused (`FileAlreadyOpen`).  Every operation here is a
//! plain `&mut self` call — serialization is the facade's concern.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use crate::btree::Btree;
use crate::entry::{
    path_key, Entry, EntryType, PathRecord, ENTRY_RECORD_SIZE, PATH_RECORD_SIZE,
};
use crate::error::{Error, Result};
use crate::file::{FileMode, VirtualFile};
use crate::streams::{
    StreamManager, SPECIAL_ENTRIES, SPECIAL_LISTINGS, SPECIAL_PATHS,
};

const ENTRY_REC: usize = 16 + ENTRY_RECORD_SIZE;
const PATH_REC: usize = 16 + PATH_RECORD_SIZE;
const LISTING_REC: usize = 32;

// ── Delete modes ─────────────────────────────────────────────────────────────

/// How much of an entry `delete_entry` takes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Flag the entry deleted; everything stays on disk.
    Soft,
    /// Flag the entry deleted and free its data stream.
    Hard,
    /// Remove the entry and every reference to it.
    Erase,
}

// ── Field patch ──────────────────────────────────────────────────────────────

/// Optional field updates for [`FileSystem::update_entry`].  Unset fields
/// are left as they are; permissions are clamped to the octal mask.
#[derive(Debug, Default, Clone)]
pub struct EntryPatch {
    pub owner:    Option<Uuid>,
    pub stream:   Option<Uuid>,
    pub modified: Option<i64>,
    pub length:   Option<u64>,
    pub deleted:  Option<bool>,
    pub user:     Option<String>,
    pub group:    Option<String>,
    pub perms:    Option<u16>,
}

// ── Open descriptors ─────────────────────────────────────────────────────────

struct OpenFile {
    stream:   crate::stream::Stream,
    position: u64,
    mode:     FileMode,
}

// ── Traversal state ──────────────────────────────────────────────────────────

/// Depth-first pre-order walk, advanced one entry per [`hierarchy_step`]
/// call so a caller can interleave it with other operations.
///
/// [`hierarchy_step`]: FileSystem::hierarchy_step
pub struct Traverse {
    pending: Vec<Visit>,
}

impl Traverse {
    /// Begin a walk at `root`; `root_path` is the path prefix its parent
    /// directory would carry (`"/"` for the root directory).
    pub fn start(root: Uuid, root_path: &str) -> Self {
        Self {
            pending: vec![Visit {
                id:          root,
                parent_path: root_path.to_string(),
            }],
        }
    }
}

struct Visit {
    id:          Uuid,
    parent_path: String,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

// ── FileSystem ───────────────────────────────────────────────────────────────

pub struct FileSystem {
    store:       StreamManager,
    entries:     Btree,
    paths:       Btree,
    listings:    Btree,
    descriptors: HashMap<Uuid, OpenFile>,
}

impl FileSystem {
    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a container and seed the root directory in every registry.
    pub fn format<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let mut store = StreamManager::create(path, secret)?;

        let entries = {
            let (blocks, stream) = store.special_parts(SPECIAL_ENTRIES)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::create(&mut file, 16, ENTRY_REC)?
        };
        let paths = {
            let (blocks, stream) = store.special_parts(SPECIAL_PATHS)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::create(&mut file, 16, PATH_REC)?
        };
        let listings = {
            let (blocks, stream) = store.special_parts(SPECIAL_LISTINGS)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::create(&mut file, LISTING_REC, LISTING_REC)?
        };

        let mut fs = Self {
            store,
            entries,
            paths,
            listings,
            descriptors: HashMap::new(),
        };
        let root = Entry::root();
        fs.entry_insert(&root)?;
        fs.path_insert(
            root.path_key(),
            PathRecord {
                kind: EntryType::Dir,
                id:   root.id,
            },
        )?;
        fs.store.save()?;
        debug!("filesystem formatted");
        Ok(fs)
    }

    /// Mount an existing container.
    pub fn mount<P: AsRef<Path>>(path: P, secret: &[u8; 32]) -> Result<Self> {
        let mut store = StreamManager::mount(path, secret)?;
        let entries = {
            let (blocks, stream) = store.special_parts(SPECIAL_ENTRIES)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::mount(&mut file, 16, ENTRY_REC)?
        };
        let paths = {
            let (blocks, stream) = store.special_parts(SPECIAL_PATHS)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::mount(&mut file, 16, PATH_REC)?
        };
        let listings = {
            let (blocks, stream) = store.special_parts(SPECIAL_LISTINGS)?;
            let mut file = VirtualFile::new(blocks, stream);
            Btree::mount(&mut file, LISTING_REC, LISTING_REC)?
        };
        Ok(Self {
            store,
            entries,
            paths,
            listings,
            descriptors: HashMap::new(),
        })
    }

    /// Close every descriptor, flush all state, fsync, release the lock.
    pub fn close(mut self) -> Result<()> {
        let open_ids: Vec<Uuid> = self.descriptors.keys().copied().collect();
        for id in open_ids {
            self.release(id)?;
        }
        self.store.close()
    }

    /// Flush all reserved streams and the metadata block.  Called by the
    /// facade after each top-level mutation so recovery never sees a torn
    /// index.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.store.save()
    }

    /// The caller-opaque header bytes of the metadata block.
    pub fn header_bytes(&self) -> &[u8] {
        self.store.meta_area()
    }

    /// Replace the leading header bytes and persist the metadata block.
    pub fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        self.store.meta_area_mut()[..bytes.len()].copy_from_slice(bytes);
        self.store.save()
    }

    // ── Registry plumbing ────────────────────────────────────────────────

    fn entry_get(&mut self, id: Uuid) -> Result<Entry> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_ENTRIES)?;
        let mut file = VirtualFile::new(blocks, stream);
        let rec = self.entries.get(&mut file, id.as_bytes()).map_err(|e| match e {
            Error::RecordNotFound => Error::PathExistsNot { id },
            other => other,
        })?;
        Entry::unpack(&rec[16..])
    }

    fn entry_insert(&mut self, entry: &Entry) -> Result<()> {
        entry.check_limits()?;
        let mut rec = Vec::with_capacity(ENTRY_REC);
        rec.extend_from_slice(entry.id.as_bytes());
        rec.extend_from_slice(&entry.pack());
        let (blocks, stream) = self.store.special_parts(SPECIAL_ENTRIES)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.entries.insert(&mut file, &rec)
    }

    fn entry_update(&mut self, entry: &Entry) -> Result<()> {
        entry.check_limits()?;
        let (blocks, stream) = self.store.special_parts(SPECIAL_ENTRIES)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.entries
            .update(&mut file, entry.id.as_bytes(), &entry.pack())
            .map_err(|e| match e {
                Error::RecordNotFound => Error::PathExistsNot { id: entry.id },
                other => other,
            })
    }

    fn entry_delete(&mut self, id: Uuid) -> Result<()> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_ENTRIES)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.entries.delete(&mut file, id.as_bytes()).map_err(|e| match e {
            Error::RecordNotFound => Error::PathExistsNot { id },
            other => other,
        })
    }

    fn path_get(&mut self, key: Uuid) -> Result<PathRecord> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_PATHS)?;
        let mut file = VirtualFile::new(blocks, stream);
        let rec = self.paths.get(&mut file, key.as_bytes())?;
        PathRecord::unpack(&rec[16..])
    }

    fn path_insert(&mut self, key: Uuid, record: PathRecord) -> Result<()> {
        let mut rec = Vec::with_capacity(PATH_REC);
        rec.extend_from_slice(key.as_bytes());
        rec.extend_from_slice(&record.pack());
        let (blocks, stream) = self.store.special_parts(SPECIAL_PATHS)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.paths.insert(&mut file, &rec)
    }

    fn path_delete(&mut self, key: Uuid) -> Result<()> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_PATHS)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.paths.delete(&mut file, key.as_bytes())
    }

    fn listing_rec(parent: Uuid, child: Uuid) -> [u8; LISTING_REC] {
        let mut rec = [0u8; LISTING_REC];
        rec[..16].copy_from_slice(parent.as_bytes());
        rec[16..].copy_from_slice(child.as_bytes());
        rec
    }

    fn listing_add(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        let rec = Self::listing_rec(parent, child);
        let (blocks, stream) = self.store.special_parts(SPECIAL_LISTINGS)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.listings.insert(&mut file, &rec)
    }

    fn listing_remove(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        let rec = Self::listing_rec(parent, child);
        let (blocks, stream) = self.store.special_parts(SPECIAL_LISTINGS)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.listings.delete(&mut file, &rec)
    }

    fn listing_members(&mut self, parent: Uuid) -> Result<Vec<Uuid>> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_LISTINGS)?;
        let mut file = VirtualFile::new(blocks, stream);
        let recs = self.listings.traverse(&mut file, parent.as_bytes())?;
        Ok(recs
            .iter()
            .map(|r| Uuid::from_bytes(r[16..32].try_into().unwrap()))
            .collect())
    }

    fn listing_drop(&mut self, parent: Uuid) -> Result<usize> {
        let (blocks, stream) = self.store.special_parts(SPECIAL_LISTINGS)?;
        let mut file = VirtualFile::new(blocks, stream);
        self.listings.delete_prefix(&mut file, parent.as_bytes())
    }

    // ── Path resolution ──────────────────────────────────────────────────

    /// Resolve an absolute path to its final `(type, id)` record.
    ///
    /// Links in intermediate components are always followed; the final
    /// component is followed only when `follow_final` is set.  A missing
    /// component is the soft `InvalidPath` (the facade rewrites it).
    pub fn resolve(&mut self, path: &str, follow_final: bool) -> Result<PathRecord> {
        if !path.starts_with('/') {
            return Err(Error::NotAbsolutePath {
                path: path.to_string(),
            });
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = PathRecord {
            kind: EntryType::Dir,
            id:   Uuid::nil(),
        };
        let total = parts.len();
        for (i, part) in parts.into_iter().enumerate() {
            let key = path_key(current.id, part);
            let mut record = self.path_get(key).map_err(|e| match e {
                Error::RecordNotFound => Error::InvalidPath {
                    path: path.to_string(),
                },
                other => other,
            })?;
            let last = i + 1 == total;
            if record.kind == EntryType::Link && (!last || follow_final) {
                let link = self.entry_get(record.id)?;
                let target = self.entry_get(link.owner).map_err(|_| Error::LinkTargetError {
                    target: link.owner,
                })?;
                record = PathRecord {
                    kind: target.kind,
                    id:   target.id,
                };
            }
            current = record;
        }
        Ok(current)
    }

    // ── Entry CRUD ───────────────────────────────────────────────────────

    /// Require `id` to be an existing, non-deleted directory.
    fn require_dir(&mut self, id: Uuid) -> Result<Entry> {
        let entry = self.entry_get(id)?;
        if entry.kind != EntryType::Dir {
            return Err(Error::NotADir { id });
        }
        if entry.deleted {
            return Err(Error::EntryDeleted { id });
        }
        Ok(entry)
    }

    /// Shared insertion: path-collision check, then all three registries.
    fn attach(&mut self, entry: Entry) -> Result<Uuid> {
        match self.path_get(entry.path_key()) {
            Ok(_) => {
                return Err(Error::PathExistsAlready {
                    name: entry.name.clone(),
                })
            }
            Err(Error::RecordNotFound) => {}
            Err(other) => return Err(other),
        }
        self.entry_insert(&entry)?;
        self.path_insert(
            entry.path_key(),
            PathRecord {
                kind: entry.kind,
                id:   entry.id,
            },
        )?;
        self.listing_add(entry.parent, entry.id)?;
        Ok(entry.id)
    }

    /// Create a directory under `parent`.
    pub fn create_dir(&mut self, parent: Uuid, name: &str) -> Result<Uuid> {
        self.require_dir(parent)?;
        let entry = Entry::blank(EntryType::Dir, name, parent)?;
        self.attach(entry)
    }

    /// Create a file entry under `parent`.  The data stream stays nil until
    /// the first open.
    pub fn create_file(&mut self, parent: Uuid, name: &str) -> Result<Uuid> {
        self.require_dir(parent)?;
        let entry = Entry::blank(EntryType::File, name, parent)?;
        self.attach(entry)
    }

    /// Create a link under `parent` pointing at entry `target`.
    pub fn create_link(&mut self, parent: Uuid, name: &str, target: Uuid) -> Result<Uuid> {
        self.require_dir(parent)?;
        let target_entry = self
            .entry_get(target)
            .map_err(|_| Error::LinkTargetError { target })?;
        if target_entry.kind == EntryType::Link {
            return Err(Error::LinkToLink);
        }
        let mut entry = Entry::blank(EntryType::Link, name, parent)?;
        entry.owner = target_entry.id;
        self.attach(entry)
    }

    /// Apply a field patch to an existing entry, returning the new state.
    pub fn update_entry(&mut self, id: Uuid, patch: EntryPatch) -> Result<Entry> {
        let mut entry = self.entry_get(id)?;
        if let Some(owner) = patch.owner {
            entry.owner = owner;
        }
        if let Some(stream) = patch.stream {
            entry.stream = stream;
        }
        if let Some(modified) = patch.modified {
            entry.modified = modified;
        }
        if let Some(length) = patch.length {
            entry.length = length;
        }
        if let Some(deleted) = patch.deleted {
            entry.deleted = deleted;
        }
        if let Some(user) = patch.user {
            entry.user = user;
        }
        if let Some(group) = patch.group {
            entry.group = group;
        }
        if let Some(perms) = patch.perms {
            entry.perms = perms & crate::entry::PERMS_MASK;
        }
        self.entry_update(&entry)?;
        Ok(entry)
    }

    /// Public lookup by id.
    pub fn entry(&mut self, id: Uuid) -> Result<Entry> {
        self.entry_get(id)
    }

    /// Remove an entry at the requested depth.  A directory must be empty
    /// regardless of mode.
    pub fn delete_entry(&mut self, id: Uuid, mode: DeleteMode) -> Result<()> {
        let mut entry = self.entry_get(id)?;
        if entry.kind == EntryType::Dir && !self.listing_members(id)?.is_empty() {
            return Err(Error::FilesInDir { id });
        }
        match mode {
            DeleteMode::Soft => {
                entry.deleted = true;
                entry.modified = Utc::now().timestamp();
                self.entry_update(&entry)
            }
            DeleteMode::Hard => {
                entry.deleted = true;
                entry.modified = Utc::now().timestamp();
                if entry.kind == EntryType::File && !entry.stream.is_nil() {
                    self.store.del_stream(entry.stream)?;
                    entry.stream = Uuid::nil();
                    entry.length = 0;
                }
                self.entry_update(&entry)
            }
            DeleteMode::Erase => {
                if entry.kind == EntryType::File && !entry.stream.is_nil() {
                    self.store.del_stream(entry.stream)?;
                }
                self.listing_remove(entry.parent, id)?;
                if entry.kind == EntryType::Dir {
                    self.listing_drop(id)?;
                }
                self.path_delete(entry.path_key())?;
                self.entry_delete(id)
            }
        }
    }

    /// Reparent an entry into another directory.
    pub fn change_parent(&mut self, id: Uuid, new_parent: Uuid) -> Result<Entry> {
        let mut entry = self.entry_get(id)?;
        self.require_dir(new_parent)?;

        let new_key = path_key(new_parent, &entry.name);
        match self.path_get(new_key) {
            Ok(_) => {
                return Err(Error::PathExistsAlready {
                    name: entry.name.clone(),
                })
            }
            Err(Error::RecordNotFound) => {}
            Err(other) => return Err(other),
        }

        self.listing_remove(entry.parent, id)?;
        self.listing_add(new_parent, id)?;
        self.path_delete(entry.path_key())?;
        self.path_insert(
            new_key,
            PathRecord {
                kind: entry.kind,
                id,
            },
        )?;
        entry.parent = new_parent;
        entry.modified = Utc::now().timestamp();
        self.entry_update(&entry)?;
        Ok(entry)
    }

    /// Rename an entry within its directory.
    pub fn change_name(&mut self, id: Uuid, new_name: &str) -> Result<Entry> {
        let mut entry = self.entry_get(id)?;
        let new_key = path_key(entry.parent, new_name);
        match self.path_get(new_key) {
            Ok(_) => {
                return Err(Error::PathExistsAlready {
                    name: new_name.to_string(),
                })
            }
            Err(Error::RecordNotFound) => {}
            Err(other) => return Err(other),
        }
        self.path_delete(entry.path_key())?;
        self.path_insert(
            new_key,
            PathRecord {
                kind: entry.kind,
                id,
            },
        )?;
        entry.name = new_name.to_string();
        entry.modified = Utc::now().timestamp();
        self.entry_update(&entry)?;
        Ok(entry)
    }

    // ── File descriptors ─────────────────────────────────────────────────

    /// Open a file entry, allocating its data stream on first use.
    pub fn open(&mut self, id: Uuid, mode: FileMode) -> Result<()> {
        if self.descriptors.contains_key(&id) {
            return Err(Error::FileAlreadyOpen { id });
        }
        let mut entry = self.entry_get(id)?;
        if entry.kind != EntryType::File {
            return Err(Error::NotAFile { id });
        }
        if entry.deleted {
            return Err(Error::EntryDeleted { id });
        }

        let mut stream = if entry.stream.is_nil() {
            let stream = self.store.new_stream()?;
            entry.stream = stream.identity();
            self.entry_update(&entry)?;
            stream
        } else {
            self.store.open_stream(entry.stream)?
        };
        if mode.truncates() {
            stream.truncate(&mut self.store.blocks, 0)?;
        }
        let position = if mode.append() { stream.len() } else { 0 };
        self.descriptors.insert(
            id,
            OpenFile {
                stream,
                position,
                mode,
            },
        );
        Ok(())
    }

    /// Pop and finish a descriptor: flush, sync entry length/modified,
    /// upsert the stream registry record.
    pub fn release(&mut self, id: Uuid) -> Result<()> {
        let of = self.descriptors.remove(&id).ok_or(Error::NotOpen)?;
        let written = of.mode.writable();
        let length = of.stream.len();
        self.store.close_stream(of.stream)?;
        if written {
            let mut entry = self.entry_get(id)?;
            entry.length = length;
            entry.modified = Utc::now().timestamp();
            self.entry_update(&entry)?;
        }
        Ok(())
    }

    fn descriptor(&mut self, id: Uuid) -> Result<&mut OpenFile> {
        self.descriptors.get_mut(&id).ok_or(Error::NotOpen)
    }

    pub fn fd_read(&mut self, id: Uuid, buf: &mut [u8]) -> Result<usize> {
        let of = self.descriptors.get_mut(&id).ok_or(Error::NotOpen)?;
        if !of.mode.readable() {
            return Err(Error::InvalidMode {
                mode: "descriptor is write-only".to_string(),
            });
        }
        let mut file = VirtualFile::new(&mut self.store.blocks, &mut of.stream);
        file.set_position(of.position);
        let n = file.read(buf)?;
        of.position = file.position();
        Ok(n)
    }

    pub fn fd_write(&mut self, id: Uuid, buf: &[u8]) -> Result<usize> {
        let of = self.descriptors.get_mut(&id).ok_or(Error::NotOpen)?;
        if !of.mode.writable() {
            return Err(Error::InvalidMode {
                mode: "descriptor is read-only".to_string(),
            });
        }
        let mut file = if of.mode.append() {
            VirtualFile::appending(&mut self.store.blocks, &mut of.stream)
        } else {
            VirtualFile::new(&mut self.store.blocks, &mut of.stream)
        };
        file.set_position(of.position);
        let n = file.write(buf)?;
        of.position = file.position();
        Ok(n)
    }

    pub fn fd_seek(&mut self, id: Uuid, pos: SeekFrom) -> Result<u64> {
        let of = self.descriptors.get_mut(&id).ok_or(Error::NotOpen)?;
        let mut file = VirtualFile::new(&mut self.store.blocks, &mut of.stream);
        file.set_position(of.position);
        let landed = file.seek(pos)?;
        of.position = landed;
        Ok(landed)
    }

    pub fn fd_truncate(&mut self, id: Uuid, size: Option<u64>) -> Result<u64> {
        let of = self.descriptors.get_mut(&id).ok_or(Error::NotOpen)?;
        if !of.mode.writable() {
            return Err(Error::InvalidMode {
                mode: "descriptor is read-only".to_string(),
            });
        }
        let mut file = VirtualFile::new(&mut self.store.blocks, &mut of.stream);
        file.set_position(of.position);
        let len = file.truncate(size)?;
        of.position = file.position();
        Ok(len)
    }

    pub fn fd_flush(&mut self, id: Uuid) -> Result<()> {
        let of = self.descriptors.get_mut(&id).ok_or(Error::NotOpen)?;
        of.stream.save(&mut self.store.blocks, true)
    }

    pub fn fd_len(&mut self, id: Uuid) -> Result<u64> {
        Ok(self.descriptor(id)?.stream.len())
    }

    // ── Whole-payload convenience ────────────────────────────────────────

    /// Read the complete payload of a file entry.
    pub fn read_all(&mut self, id: Uuid) -> Result<Vec<u8>> {
        self.open(id, FileMode::parse("r")?)?;
        let result = (|| {
            let len = self.fd_len(id)? as usize;
            let mut out = vec![0u8; len];
            let mut done = 0;
            while done < len {
                let n = self.fd_read(id, &mut out[done..])?;
                if n == 0 {
                    break;
                }
                done += n;
            }
            out.truncate(done);
            Ok(out)
        })();
        self.release(id)?;
        result
    }

    /// Replace the complete payload of a file entry.
    pub fn write_all(&mut self, id: Uuid, data: &[u8]) -> Result<()> {
        self.open(id, FileMode::parse("w")?)?;
        let result = (|| {
            let mut done = 0;
            while done < data.len() {
                done += self.fd_write(id, &data[done..])?;
            }
            self.fd_flush(id)
        })();
        self.release(id)?;
        result
    }

    // ── Hierarchy traversal ──────────────────────────────────────────────

    /// Advance the walk one entry.  Directories yield themselves before
    /// their children; a listing member with no entry record yields a
    /// synthetic `<error>` entry instead of aborting the walk.
    pub fn hierarchy_step(&mut self, state: &mut Traverse) -> Result<Option<(Entry, String)>> {
        let Some(visit) = state.pending.pop() else {
            return Ok(None);
        };
        let entry = match self.entry_get(visit.id) {
            Ok(entry) => entry,
            Err(Error::PathExistsNot { id }) => {
                let mut ghost = Entry::blank(EntryType::File, "<error>", Uuid::nil())?;
                ghost.id = id;
                ghost.deleted = true;
                let path = join_path(&visit.parent_path, "<error>");
                return Ok(Some((ghost, path)));
            }
            Err(other) => return Err(other),
        };
        let path = if entry.id.is_nil() {
            "/".to_string()
        } else {
            join_path(&visit.parent_path, &entry.name)
        };
        if entry.kind == EntryType::Dir {
            let children = self.listing_members(entry.id)?;
            for child in children.into_iter().rev() {
                state.pending.push(Visit {
                    id:          child,
                    parent_path: path.clone(),
                });
            }
        }
        Ok(Some((entry, path)))
    }
}
