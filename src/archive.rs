//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use archive7::{Archive, SetupOptions};
//!
//! let secret = [0u8; 32];
//! let mut ar = Archive::setup("vault.a7", &secret, SetupOptions::default())?;
//! ar.mkdir("/docs")?;
//! ar.mkfile("/docs/readme.txt", b"Hello, world!")?;
//! assert_eq!(ar.load("/docs/readme.txt")?, b"Hello, world!");
//! ar.close()?;
//! # Ok::<(), archive7::Error>(())
//! ```
//!
//! Every public call locks one internal mutex around the whole filesystem,
//! so operations on an archive are totally ordered and each one is durable
//! (checkpointed) before it returns.  [`FileObject`] handles and the
//! [`Search`] iterator share the same mutex and take it per call — a search
//! step never runs concurrently with a mutation.
//!
//! The soft resolution miss `InvalidPath` never escapes this layer; it is
//! rewritten to `ArchiveNotFound` carrying the offending path.

use std::collections::BTreeSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::entry::{Entry, EntryType};
use crate::error::{Error, Result};
use crate::file::FileMode;
use crate::fs::{DeleteMode, EntryPatch, FileSystem, Traverse};
use crate::header::Header;
use crate::query::Query;

type Shared = Arc<Mutex<Option<FileSystem>>>;

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, Option<FileSystem>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn with_fs<T>(shared: &Shared, op: impl FnOnce(&mut FileSystem) -> Result<T>) -> Result<T> {
    let mut guard = lock(shared);
    let fs = guard.as_mut().ok_or(Error::NotOpen)?;
    op(fs)
}

/// Rewrite the soft resolution miss into the caller-facing error.
fn found<T>(result: Result<T>, path: &str) -> Result<T> {
    result.map_err(|e| match e {
        Error::InvalidPath { .. } => Error::ArchiveNotFound {
            path: path.to_string(),
        },
        other => other,
    })
}

/// Split `/a/b/c` into `("/a/b", "c")`.
fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::NotAbsolutePath {
            path: path.to_string(),
        });
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
        });
    }
    let idx = trimmed.rfind('/').ok_or_else(|| Error::NotAbsolutePath {
        path: path.to_string(),
    })?;
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Ok((parent, &trimmed[idx + 1..]))
}

// ── SetupOptions ─────────────────────────────────────────────────────────────

/// Identity fields written into a new container's header.
#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub owner:  Uuid,
    pub domain: Uuid,
    pub node:   Uuid,
    pub title:  String,
    pub kind:   i8,
    pub role:   i8,
    pub usage:  i8,
    /// Mode applied by [`Archive::remove`] when none is given.
    pub delete_mode: DeleteMode,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            owner:  Uuid::nil(),
            domain: Uuid::nil(),
            node:   Uuid::nil(),
            title:  String::new(),
            kind:   0,
            role:   0,
            usage:  0,
            delete_mode: DeleteMode::Erase,
        }
    }
}

// ── Archive ──────────────────────────────────────────────────────────────────

pub struct Archive {
    inner:       Shared,
    header:      Header,
    delete_mode: DeleteMode,
    path:        PathBuf,
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────

    /// Create a new container at `path` under a 32-byte secret.
    pub fn setup<P: AsRef<Path>>(path: P, secret: &[u8; 32], opts: SetupOptions) -> Result<Self> {
        let mut fs = FileSystem::format(path.as_ref(), secret)?;
        let mut header = Header::new(opts.owner, opts.domain, opts.node, &opts.title)?;
        header.kind = opts.kind;
        header.role = opts.role;
        header.usage = opts.usage;
        fs.write_header(&header.pack())?;
        Ok(Self {
            inner:       Arc::new(Mutex::new(Some(fs))),
            header,
            delete_mode: opts.delete_mode,
            path:        path.as_ref().to_owned(),
        })
    }

    /// Open an existing container; fails with `InvalidFormat` if block 0
    /// does not carry the expected magic.
    pub fn open<P: AsRef<Path>>(
        path: P,
        secret: &[u8; 32],
        delete_mode: DeleteMode,
    ) -> Result<Self> {
        let fs = FileSystem::mount(path.as_ref(), secret)?;
        let header = Header::unpack(fs.header_bytes())?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Some(fs))),
            header,
            delete_mode,
            path: path.as_ref().to_owned(),
        })
    }

    /// Close every descriptor, flush all state, fsync, release the host
    /// lock.  Idempotent; outstanding [`FileObject`]s turn inert.
    pub fn close(&mut self) -> Result<()> {
        let fs = lock(&self.inner).take();
        match fs {
            Some(fs) => fs.close(),
            None => Ok(()),
        }
    }

    // ── Metadata ─────────────────────────────────────────────────────────

    /// The container's human-facing header.
    pub fn stats(&self) -> Header {
        self.header.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Hierarchy ────────────────────────────────────────────────────────

    /// Create a directory; the parent path must already exist.
    pub fn mkdir(&mut self, path: &str) -> Result<Uuid> {
        let (parent, name) = split_parent(path)?;
        let result = with_fs(&self.inner, |fs| {
            let dir = fs.resolve(parent, true)?;
            let id = fs.create_dir(dir.id, name)?;
            fs.checkpoint()?;
            Ok(id)
        });
        found(result, path)
    }

    /// Create a file and write its initial payload.
    pub fn mkfile(&mut self, path: &str, data: &[u8]) -> Result<Uuid> {
        let (parent, name) = split_parent(path)?;
        let result = with_fs(&self.inner, |fs| {
            let dir = fs.resolve(parent, true)?;
            let id = fs.create_file(dir.id, name)?;
            if !data.is_empty() {
                fs.write_all(id, data)?;
            }
            fs.checkpoint()?;
            Ok(id)
        });
        found(result, path)
    }

    /// Create a link at `path` pointing to the entry at `target_path`.
    /// The target is taken as-is — linking to a link is refused.
    pub fn link(&mut self, path: &str, target_path: &str) -> Result<Uuid> {
        let (parent, name) = split_parent(path)?;
        let result = with_fs(&self.inner, |fs| {
            let target = found(fs.resolve(target_path, false), target_path)?;
            let dir = fs.resolve(parent, true)?;
            let id = fs.create_link(dir.id, name, target.id)?;
            fs.checkpoint()?;
            Ok(id)
        });
        found(result, path)
    }

    fn kind_of(&self, path: &str) -> Result<Option<EntryType>> {
        let result = with_fs(&self.inner, |fs| match fs.resolve(path, false) {
            Ok(rec) => Ok(Some(rec.kind)),
            Err(Error::InvalidPath { .. }) => Ok(None),
            Err(other) => Err(other),
        });
        result
    }

    pub fn isdir(&self, path: &str) -> Result<bool> {
        Ok(self.kind_of(path)? == Some(EntryType::Dir))
    }

    pub fn isfile(&self, path: &str) -> Result<bool> {
        Ok(self.kind_of(path)? == Some(EntryType::File))
    }

    pub fn islink(&self, path: &str) -> Result<bool> {
        Ok(self.kind_of(path)? == Some(EntryType::Link))
    }

    /// Rename an entry in place.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, false)?;
            fs.change_name(rec.id, new_name)?;
            fs.checkpoint()
        });
        found(result, path)
    }

    /// Move an entry under another directory.
    pub fn move_entry(&mut self, path: &str, new_parent_path: &str) -> Result<()> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, false)?;
            let parent = found(fs.resolve(new_parent_path, true), new_parent_path)?;
            fs.change_parent(rec.id, parent.id)?;
            fs.checkpoint()
        });
        found(result, path)
    }

    /// Update ownership and permission fields of an entry.
    pub fn chmod(
        &mut self,
        path: &str,
        perms: Option<u16>,
        user: Option<&str>,
        group: Option<&str>,
    ) -> Result<()> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, false)?;
            fs.update_entry(
                rec.id,
                EntryPatch {
                    perms,
                    user: user.map(str::to_string),
                    group: group.map(str::to_string),
                    ..EntryPatch::default()
                },
            )?;
            fs.checkpoint()
        });
        found(result, path)
    }

    /// Delete the entry at `path`, defaulting to the archive's delete mode.
    pub fn remove(&mut self, path: &str, mode: Option<DeleteMode>) -> Result<()> {
        let mode = mode.unwrap_or(self.delete_mode);
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, false)?;
            fs.delete_entry(rec.id, mode)?;
            fs.checkpoint()
        });
        found(result, path)
    }

    /// The entry record at `path` (the link itself, not its target).
    pub fn info(&self, path: &str) -> Result<Entry> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, false)?;
            fs.entry(rec.id)
        });
        found(result, path)
    }

    // ── Payload I/O ──────────────────────────────────────────────────────

    /// Read a file's complete payload, following a final link.
    pub fn load(&mut self, path: &str) -> Result<Vec<u8>> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, true)?;
            if rec.kind != EntryType::File {
                return Err(Error::NotAFile { id: rec.id });
            }
            fs.read_all(rec.id)
        });
        found(result, path)
    }

    /// Replace a file's payload; `modified` overrides the timestamp the
    /// write would otherwise stamp.
    pub fn save(&mut self, path: &str, data: &[u8], modified: Option<i64>) -> Result<()> {
        let result = with_fs(&self.inner, |fs| {
            let rec = fs.resolve(path, true)?;
            if rec.kind != EntryType::File {
                return Err(Error::NotAFile { id: rec.id });
            }
            fs.write_all(rec.id, data)?;
            if modified.is_some() {
                fs.update_entry(
                    rec.id,
                    EntryPatch {
                        modified,
                        ..EntryPatch::default()
                    },
                )?;
            }
            fs.checkpoint()
        });
        found(result, path)
    }

    /// Open a file for streaming access.  Modes that create (`w`, `a`,
    /// `x`) build the entry when the path is missing; `x` additionally
    /// requires it to be missing.
    pub fn open_file(&mut self, path: &str, mode: &str) -> Result<FileObject> {
        let mode = FileMode::parse(mode)?;
        let result = with_fs(&self.inner, |fs| {
            let id = match fs.resolve(path, true) {
                Ok(rec) => {
                    if mode.exclusive() {
                        return Err(Error::PathExistsAlready {
                            name: path.to_string(),
                        });
                    }
                    if rec.kind != EntryType::File {
                        return Err(Error::NotAFile { id: rec.id });
                    }
                    rec.id
                }
                Err(Error::InvalidPath { .. }) if mode.creates() => {
                    let (parent, name) = split_parent(path)?;
                    let dir = fs.resolve(parent, true)?;
                    fs.create_file(dir.id, name)?
                }
                Err(other) => return Err(other),
            };
            fs.open(id, mode)?;
            Ok(id)
        });
        let id = found(result, path)?;
        Ok(FileObject {
            inner:  Arc::clone(&self.inner),
            id,
            closed: false,
        })
    }

    // ── Search ───────────────────────────────────────────────────────────

    /// Paths of every entry matching the query, walking the whole
    /// hierarchy.
    pub fn glob(&self, query: &Query) -> Result<BTreeSet<String>> {
        with_fs(&self.inner, |fs| {
            let mut walk = Traverse::start(Uuid::nil(), "/");
            let mut hits = BTreeSet::new();
            while let Some((entry, path)) = fs.hierarchy_step(&mut walk)? {
                if query.matches(&entry) {
                    hits.insert(path);
                }
            }
            Ok(hits)
        })
    }

    /// Lazily walk the hierarchy, yielding matching entries one step at a
    /// time.  The archive lock is taken per step, so other operations
    /// interleave between items; a closed archive surfaces as an error on
    /// the next step.
    pub fn search(&self, query: Query) -> Search {
        Search {
            inner: Arc::clone(&self.inner),
            walk:  Traverse::start(Uuid::nil(), "/"),
            query,
            done:  false,
        }
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ── FileObject ───────────────────────────────────────────────────────────────

/// An open file descriptor.  Each call locks the archive for its duration;
/// dropping without [`close`](FileObject::close) releases best-effort.
pub struct FileObject {
    inner:  Shared,
    id:     Uuid,
    closed: bool,
}

impl FileObject {
    /// Entry id this descriptor is bound to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current payload length.
    pub fn len(&self) -> Result<u64> {
        with_fs(&self.inner, |fs| fs.fd_len(self.id))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink to `size` bytes, or to the current position when `None`.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        with_fs(&self.inner, |fs| fs.fd_truncate(self.id, size))
    }

    /// Flush, sync entry metadata, and release the descriptor.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        with_fs(&self.inner, |fs| {
            fs.release(self.id)?;
            fs.checkpoint()
        })
    }
}

fn to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl Read for FileObject {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_fs(&self.inner, |fs| fs.fd_read(self.id, buf)).map_err(to_io)
    }
}

impl Write for FileObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_fs(&self.inner, |fs| fs.fd_write(self.id, buf)).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        with_fs(&self.inner, |fs| fs.fd_flush(self.id)).map_err(to_io)
    }
}

impl Seek for FileObject {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        with_fs(&self.inner, |fs| fs.fd_seek(self.id, pos)).map_err(to_io)
    }
}

impl Drop for FileObject {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

// ── Search ───────────────────────────────────────────────────────────────────

/// Iterator over query matches, one hierarchy step per lock acquisition.
pub struct Search {
    inner: Shared,
    walk:  Traverse,
    query: Query,
    done:  bool,
}

impl Iterator for Search {
    type Item = Result<(Entry, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let step = with_fs(&self.inner, |fs| fs.hierarchy_step(&mut self.walk));
            match step {
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Ok(Some((entry, path))) => {
                    if self.query.matches(&entry) {
                        return Some(Ok((entry, path)));
                    }
                }
            }
        }
    }
}
