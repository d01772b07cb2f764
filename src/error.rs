//! Crate-wide error type.
//!
//! Every layer raises through [`Error`]; the variants are grouped the same
//! way the engine is layered (block integrity, storage manager, index
//! trees, filesystem overlay, facade).  Corruption variants are fatal: once
//! one is returned the handle must not be written through again.

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // ── Block integrity (fatal) ──────────────────────────────────────────
    /// A block's `previous`/`next` pointer references its own position.
    #[error("Block {position} references itself in its chain header")]
    HeaderReference { position: u32 },
    /// The stored SHA-1 digest does not match the block payload.
    #[error("Block {position} digest mismatch: stored {stored}, computed {computed}")]
    DigestMismatch {
        position: u32,
        stored:   String,
        computed: String,
    },
    /// The authenticated envelope failed to open — wrong secret or
    /// tampered ciphertext.
    #[error("Block {position} failed authentication — wrong secret or corrupted data")]
    CorruptBlock { position: u32 },

    // ── Storage manager ──────────────────────────────────────────────────
    /// Host file length is not a multiple of the block size.
    #[error("Archive length {length} is not a multiple of {block_size} bytes")]
    UnevenArchive { length: u64, block_size: usize },
    /// A block write returned before the full envelope was on disk.
    #[error("Short write at block {position}: {written} of {expected} bytes")]
    FailedFullWrite {
        position: u32,
        written:  usize,
        expected: usize,
    },
    /// `save_block` was handed a block whose position differs from the
    /// target index.
    #[error("Block position {actual} does not match save target {expected}")]
    IndexPositionMismatch { expected: u32, actual: u32 },
    /// Block index beyond the end of the archive, or a chain operation
    /// attempted from the wrong block.
    #[error("Block index {index} is out of bounds (count {count})")]
    OutOfBounds { index: u32, count: u32 },
    /// A reserved stream record carries the wrong identity (fatal).
    #[error("Reserved stream slot {slot} carries identity {found}")]
    CorruptStreamIdentifier { slot: usize, found: Uuid },
    /// The stream is already resident in the open set.
    #[error("Stream {identity} is already open")]
    AlreadyOpen { identity: Uuid },
    /// No stream with this identity exists in the registry.
    #[error("No stream registered under identity {identity}")]
    NoStreamIdentity { identity: Uuid },
    /// Reserved-stream index outside `0..SPECIAL_STREAM_COUNT`.
    #[error("Reserved stream index {index} out of range (0..{limit})")]
    SpecialStreamBoundary { index: usize, limit: usize },
    /// Access through a handle that was already closed.
    #[error("Handle is not open")]
    NotOpen,

    // ── Index trees ──────────────────────────────────────────────────────
    /// Insertion of a key (or set member) that is already present.
    #[error("Key already exists in index")]
    KeyAlreadyExists,
    /// Lookup, update, or delete of a key that is not present.
    #[error("Record not found in index")]
    RecordNotFound,
    /// A tree page failed structural validation (fatal).
    #[error("Corrupt index tree: {detail}")]
    TreeCorrupt { detail: String },

    // ── Filesystem overlay ───────────────────────────────────────────────
    #[error("Path is not absolute: {path}")]
    NotAbsolutePath { path: String },
    /// Soft resolution miss — the facade converts this to `ArchiveNotFound`.
    #[error("No entry at path: {path}")]
    InvalidPath { path: String },
    #[error("An entry named {name:?} already exists in this directory")]
    PathExistsAlready { name: String },
    #[error("Link target {target} does not exist")]
    LinkTargetError { target: Uuid },
    #[error("Cannot create a link to another link")]
    LinkToLink,
    #[error("Unknown entry type tag {tag:#04x}")]
    UnknownEntryType { tag: u8 },
    #[error("No entry registered under id {id}")]
    PathExistsNot { id: Uuid },
    #[error("Directory {id} is not empty")]
    FilesInDir { id: Uuid },
    #[error("Entry {id} is not a directory")]
    NotADir { id: Uuid },
    #[error("Entry {id} is not a file")]
    NotAFile { id: Uuid },
    #[error("File {id} is already open")]
    FileAlreadyOpen { id: Uuid },
    #[error("Entry {id} is marked deleted")]
    EntryDeleted { id: Uuid },
    /// `name`/`user`/`group` exceeded its fixed on-disk width.
    #[error("Field {field} exceeds {limit} bytes")]
    InvalidName { field: &'static str, limit: usize },

    // ── Facade ───────────────────────────────────────────────────────────
    /// The metadata block does not carry the Archive7 magic/variant.
    #[error("Not an Archive7 container (bad magic or variant)")]
    InvalidFormat,
    #[error("Archive path not found: {path}")]
    ArchiveNotFound { path: String },
    #[error("Invalid search operand: {operand:?}")]
    OperandInvalid { operand: String },
    #[error("Invalid file mode: {mode:?}")]
    InvalidMode { mode: String },

    // ── Ambient ──────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
