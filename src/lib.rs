//! # archive7 — encrypted single-file virtual filesystem
//!
//! Format guarantees (frozen in variant 'a'):
//! - The host file is a whole number of 4096-byte blocks; nothing else
//! - Every block is one XSalsa20-Poly1305 envelope under the container's
//!   32-byte secret; a fresh nonce is drawn on every write
//! - Block plaintext carries its chain links, stream identity, and a
//!   mandatory SHA-1 payload digest; corrupt blocks abort reads
//! - Block 0 is the metadata block: caller header (magic `archive7`) plus
//!   the five reserved stream records
//! - All persistent integers are big-endian; never negotiated
//! - Streams are doubly-linked block chains; deleted chains are recycled
//!   through the trash pool before the file ever grows
//! - The entry/path/listing registries are B+Trees paged at one block
//!   payload (4008 bytes) inside reserved streams
//!
//! Operations on one [`Archive`] are totally ordered behind a single lock
//! and durable when they return.  A second process opening the same
//! container fails at the exclusive advisory file lock.

pub mod archive;
pub mod block;
pub mod blocks;
pub mod btree;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod file;
pub mod fs;
pub mod header;
pub mod query;
pub mod stream;
pub mod streams;

// Flat re-exports for the most common types.
pub use archive::{Archive, FileObject, Search, SetupOptions};
pub use block::{Block, BLOCK_SIZE, DATA_SIZE};
pub use crypto::{derive_key, CryptoError};
pub use entry::{Entry, EntryType};
pub use error::{Error, Result};
pub use file::FileMode;
pub use fs::{DeleteMode, EntryPatch, FileSystem};
pub use header::Header;
pub use query::{Operand, Query};
