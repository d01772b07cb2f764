//! On-disk B+Tree over fixed-width records.
//!
//! Pages are exactly [`PAGE_SIZE`] (4008) bytes and travel through any
//! `Read + Write + Seek` file object — in production a
//! [`VirtualFile`](crate::file::VirtualFile) over a container stream, in
//! tests a plain `Cursor<Vec<u8>>`.  Page `n` lives at byte offset
//! `n × 4008`; pages are allocated densely and never reclaimed (the whole
//! stream is recycled when its tree is dropped).
//!
//! # Page layouts (big-endian)
//!
//! ```text
//! meta (page 0):  magic "A7BT" | seek_len u16 | rec_len u16 | root u32 | pages u32
//! node ('N'):     kind u8 | count u16 | child0 u32 | (key[seek_len] child u32) × count
//! leaf ('L'):     kind u8 | count u16 | next u32   | record[rec_len] × count
//! ```
//!
//! A record is `seek_len` comparable bytes followed by the value remainder
//! (`rec_len − seek_len` bytes, possibly zero).  The *Simple* trees use a
//! 16-byte key plus a fixed value; the *Multi* (set) tree stores
//! `key(16) ‖ member(16)` records with `seek_len == rec_len`, so members of
//! one key order as a contiguous run and [`Btree::traverse`] is a prefix
//! scan along the leaf chain.
//!
//! Inserts split leaves and nodes; deletes are lazy — pages may underflow
//! and even empty out, which routing tolerates because inner separators
//! remain valid bounds.  Every mutating call persists the touched pages and
//! the meta page before returning, so each call is a self-contained
//! transaction against the stream.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::block::DATA_SIZE;
use crate::error::{Error, Result};

/// Bytes per tree page — one container block payload.
pub const PAGE_SIZE: usize = DATA_SIZE;

const META_MAGIC: &[u8; 4] = b"A7BT";
const KIND_NODE: u8 = b'N';
const KIND_LEAF: u8 = b'L';
const NODE_HDR: usize = 7; // kind + count + child0
const LEAF_HDR: usize = 7; // kind + count + next

/// Sentinel for "no page" in leaf chain links.
const NO_PAGE: u32 = u32::MAX;

enum Page {
    Node { keys: Vec<Vec<u8>>, children: Vec<u32> },
    Leaf { next: u32, recs: Vec<Vec<u8>> },
}

pub struct Btree {
    seek_len: usize,
    rec_len:  usize,
    root:     u32,
    pages:    u32,
    leaf_cap: usize,
    node_cap: usize,
}

impl Btree {
    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Initialize a fresh tree: meta page plus one empty leaf.
    pub fn create<F: Read + Write + Seek>(
        file: &mut F,
        seek_len: usize,
        rec_len: usize,
    ) -> Result<Self> {
        let mut tree = Self::shape(seek_len, rec_len)?;
        tree.root = 1;
        tree.pages = 2;
        tree.save_meta(file)?;
        tree.store(
            file,
            1,
            &Page::Leaf {
                next: NO_PAGE,
                recs: Vec::new(),
            },
        )?;
        Ok(tree)
    }

    /// Attach to an existing tree, validating its meta page against the
    /// expected record shape.
    pub fn mount<F: Read + Write + Seek>(
        file: &mut F,
        seek_len: usize,
        rec_len: usize,
    ) -> Result<Self> {
        let mut tree = Self::shape(seek_len, rec_len)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        if &buf[0..4] != META_MAGIC {
            return Err(Error::TreeCorrupt {
                detail: "bad meta magic".into(),
            });
        }
        let stored_seek = u16::from_be_bytes(buf[4..6].try_into().unwrap()) as usize;
        let stored_rec = u16::from_be_bytes(buf[6..8].try_into().unwrap()) as usize;
        if stored_seek != seek_len || stored_rec != rec_len {
            return Err(Error::TreeCorrupt {
                detail: format!(
                    "record shape mismatch: stored {stored_seek}/{stored_rec}, expected {seek_len}/{rec_len}"
                ),
            });
        }
        tree.root = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        tree.pages = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        if tree.root == 0 || tree.root >= tree.pages {
            return Err(Error::TreeCorrupt {
                detail: format!("root page {} out of range", tree.root),
            });
        }
        Ok(tree)
    }

    fn shape(seek_len: usize, rec_len: usize) -> Result<Self> {
        let leaf_cap = (PAGE_SIZE - LEAF_HDR) / rec_len;
        let node_cap = (PAGE_SIZE - NODE_HDR) / (seek_len + 4);
        if seek_len == 0 || seek_len > rec_len || leaf_cap < 1 || node_cap < 3 {
            return Err(Error::TreeCorrupt {
                detail: format!("unusable record shape {seek_len}/{rec_len}"),
            });
        }
        Ok(Self {
            seek_len,
            rec_len,
            root: 0,
            pages: 0,
            leaf_cap,
            node_cap,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Fetch the record whose seek bytes equal `key` (zero-padded when
    /// shorter than the tree's seek width).
    pub fn get<F: Read + Write + Seek>(&self, file: &mut F, key: &[u8]) -> Result<Vec<u8>> {
        let probe = self.probe(key);
        let (leaf_no, _) = self.descend(file, &probe)?;
        let (recs, _) = self.leaf(file, leaf_no)?;
        let pos = recs.partition_point(|r| r[..self.seek_len] < probe[..]);
        if pos < recs.len() && recs[pos][..key.len()] == *key {
            return Ok(recs[pos].clone());
        }
        Err(Error::RecordNotFound)
    }

    /// All records whose leading bytes equal `prefix`, in ascending record
    /// order (stable while the tree is unchanged).
    pub fn traverse<F: Read + Write + Seek>(
        &self,
        file: &mut F,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let probe = self.probe(prefix);
        let (mut leaf_no, _) = self.descend(file, &probe)?;
        let mut out = Vec::new();
        loop {
            let (recs, next) = self.leaf(file, leaf_no)?;
            for rec in recs {
                match rec[..prefix.len()].cmp(prefix) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Equal => out.push(rec),
                    std::cmp::Ordering::Greater => return Ok(out),
                }
            }
            if next == NO_PAGE {
                return Ok(out);
            }
            leaf_no = next;
        }
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Insert a full record.  A record with the same seek bytes already
    /// present → `KeyAlreadyExists`.
    pub fn insert<F: Read + Write + Seek>(&mut self, file: &mut F, rec: &[u8]) -> Result<()> {
        debug_assert_eq!(rec.len(), self.rec_len);
        let seek = &rec[..self.seek_len];
        let (leaf_no, path) = self.descend(file, seek)?;
        let (mut recs, next) = self.leaf(file, leaf_no)?;

        let pos = recs.partition_point(|r| r[..self.seek_len] < *seek);
        if pos < recs.len() && recs[pos][..self.seek_len] == *seek {
            return Err(Error::KeyAlreadyExists);
        }
        recs.insert(pos, rec.to_vec());

        if recs.len() <= self.leaf_cap {
            return self.store(file, leaf_no, &Page::Leaf { next, recs });
        }

        // Leaf overflow: split, promote the right half's first seek.
        let mid = recs.len() / 2;
        let right_recs = recs.split_off(mid);
        let sep = right_recs[0][..self.seek_len].to_vec();
        let right_no = self.alloc();
        self.store(file, right_no, &Page::Leaf { next, recs: right_recs })?;
        self.store(file, leaf_no, &Page::Leaf { next: right_no, recs })?;
        self.insert_separator(file, path, leaf_no, sep, right_no)?;
        self.save_meta(file)
    }

    /// Replace the value remainder of the record keyed by `key`.
    pub fn update<F: Read + Write + Seek>(
        &mut self,
        file: &mut F,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        debug_assert_eq!(key.len() + value.len(), self.rec_len);
        let probe = self.probe(key);
        let (leaf_no, _) = self.descend(file, &probe)?;
        let (mut recs, next) = self.leaf(file, leaf_no)?;
        let pos = recs.partition_point(|r| r[..self.seek_len] < probe[..]);
        if pos >= recs.len() || recs[pos][..key.len()] != *key {
            return Err(Error::RecordNotFound);
        }
        recs[pos][key.len()..].copy_from_slice(value);
        self.store(file, leaf_no, &Page::Leaf { next, recs })
    }

    /// Remove the record whose seek bytes equal `key` → `RecordNotFound`
    /// when absent.  Pages are left underfull (lazy deletion).
    pub fn delete<F: Read + Write + Seek>(&mut self, file: &mut F, key: &[u8]) -> Result<()> {
        let probe = self.probe(key);
        let (leaf_no, _) = self.descend(file, &probe)?;
        let (mut recs, next) = self.leaf(file, leaf_no)?;
        let pos = recs.partition_point(|r| r[..self.seek_len] < probe[..]);
        if pos >= recs.len() || recs[pos][..key.len()] != *key {
            return Err(Error::RecordNotFound);
        }
        recs.remove(pos);
        self.store(file, leaf_no, &Page::Leaf { next, recs })
    }

    /// Remove every record whose leading bytes equal `prefix`; returns how
    /// many were dropped (zero is not an error).
    pub fn delete_prefix<F: Read + Write + Seek>(
        &mut self,
        file: &mut F,
        prefix: &[u8],
    ) -> Result<usize> {
        let probe = self.probe(prefix);
        let (mut leaf_no, _) = self.descend(file, &probe)?;
        let mut dropped = 0usize;
        loop {
            let (mut recs, next) = self.leaf(file, leaf_no)?;
            let before = recs.len();
            let mut past_range = false;
            recs.retain(|r| match r[..prefix.len()].cmp(prefix) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => false,
                std::cmp::Ordering::Greater => {
                    past_range = true;
                    true
                }
            });
            if recs.len() != before {
                dropped += before - recs.len();
                self.store(file, leaf_no, &Page::Leaf { next, recs })?;
            }
            if past_range || next == NO_PAGE {
                return Ok(dropped);
            }
            leaf_no = next;
        }
    }

    // ── Descent and split plumbing ───────────────────────────────────────

    /// Zero-pad a short probe to the seek width.
    fn probe(&self, key: &[u8]) -> Vec<u8> {
        debug_assert!(key.len() <= self.seek_len);
        let mut p = vec![0u8; self.seek_len];
        p[..key.len()].copy_from_slice(key);
        p
    }

    /// Walk from the root to the leaf that owns `seek`, recording the
    /// (page, child-index) path for later separator insertion.
    fn descend<F: Read + Write + Seek>(
        &self,
        file: &mut F,
        seek: &[u8],
    ) -> Result<(u32, Vec<(u32, usize)>)> {
        let mut no = self.root;
        let mut path = Vec::new();
        loop {
            match self.load(file, no)? {
                Page::Node { keys, children } => {
                    let idx = keys.partition_point(|k| k[..] <= *seek);
                    path.push((no, idx));
                    no = children[idx];
                }
                Page::Leaf { .. } => return Ok((no, path)),
            }
        }
    }

    /// Bubble a separator up the recorded path, splitting nodes as needed
    /// and growing a new root at the top.
    fn insert_separator<F: Read + Write + Seek>(
        &mut self,
        file: &mut F,
        mut path: Vec<(u32, usize)>,
        mut left_no: u32,
        mut sep: Vec<u8>,
        mut right_no: u32,
    ) -> Result<()> {
        loop {
            let Some((node_no, child_idx)) = path.pop() else {
                let new_root = self.alloc();
                self.store(
                    file,
                    new_root,
                    &Page::Node {
                        keys: vec![sep],
                        children: vec![left_no, right_no],
                    },
                )?;
                self.root = new_root;
                return Ok(());
            };

            let Page::Node { mut keys, mut children } = self.load(file, node_no)? else {
                return Err(Error::TreeCorrupt {
                    detail: format!("leaf page {node_no} on inner path"),
                });
            };
            keys.insert(child_idx, sep);
            children.insert(child_idx + 1, right_no);

            if keys.len() <= self.node_cap {
                return self.store(file, node_no, &Page::Node { keys, children });
            }

            // Node overflow: promote the middle key.
            let mid = keys.len() / 2;
            let up = keys[mid].clone();
            let right_keys = keys.split_off(mid + 1);
            keys.pop();
            let right_children = children.split_off(mid + 1);

            let new_right = self.alloc();
            self.store(
                file,
                new_right,
                &Page::Node {
                    keys: right_keys,
                    children: right_children,
                },
            )?;
            self.store(file, node_no, &Page::Node { keys, children })?;

            sep = up;
            left_no = node_no;
            right_no = new_right;
        }
    }

    fn alloc(&mut self) -> u32 {
        let no = self.pages;
        self.pages += 1;
        no
    }

    // ── Page I/O ─────────────────────────────────────────────────────────

    fn leaf<F: Read + Write + Seek>(&self, file: &mut F, no: u32) -> Result<(Vec<Vec<u8>>, u32)> {
        match self.load(file, no)? {
            Page::Leaf { next, recs } => Ok((recs, next)),
            Page::Node { .. } => Err(Error::TreeCorrupt {
                detail: format!("expected leaf at page {no}"),
            }),
        }
    }

    fn load<F: Read + Write + Seek>(&self, file: &mut F, no: u32) -> Result<Page> {
        let mut buf = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(no as u64 * PAGE_SIZE as u64))?;
        file.read_exact(&mut buf)?;

        match buf[0] {
            KIND_NODE => {
                let count = u16::from_be_bytes(buf[1..3].try_into().unwrap()) as usize;
                if count > self.node_cap {
                    return Err(Error::TreeCorrupt {
                        detail: format!("node page {no} claims {count} keys"),
                    });
                }
                let mut children = Vec::with_capacity(count + 1);
                children.push(u32::from_be_bytes(buf[3..7].try_into().unwrap()));
                let mut keys = Vec::with_capacity(count);
                let step = self.seek_len + 4;
                for i in 0..count {
                    let at = NODE_HDR + i * step;
                    keys.push(buf[at..at + self.seek_len].to_vec());
                    children.push(u32::from_be_bytes(
                        buf[at + self.seek_len..at + step].try_into().unwrap(),
                    ));
                }
                Ok(Page::Node { keys, children })
            }
            KIND_LEAF => {
                let count = u16::from_be_bytes(buf[1..3].try_into().unwrap()) as usize;
                if count > self.leaf_cap {
                    return Err(Error::TreeCorrupt {
                        detail: format!("leaf page {no} claims {count} records"),
                    });
                }
                let next = u32::from_be_bytes(buf[3..7].try_into().unwrap());
                let mut recs = Vec::with_capacity(count);
                for i in 0..count {
                    let at = LEAF_HDR + i * self.rec_len;
                    recs.push(buf[at..at + self.rec_len].to_vec());
                }
                Ok(Page::Leaf { next, recs })
            }
            kind => Err(Error::TreeCorrupt {
                detail: format!("unknown page kind {kind:#04x} at page {no}"),
            }),
        }
    }

    fn store<F: Read + Write + Seek>(&self, file: &mut F, no: u32, page: &Page) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        match page {
            Page::Node { keys, children } => {
                debug_assert!(keys.len() <= self.node_cap);
                debug_assert_eq!(children.len(), keys.len() + 1);
                buf[0] = KIND_NODE;
                buf[1..3].copy_from_slice(&(keys.len() as u16).to_be_bytes());
                buf[3..7].copy_from_slice(&children[0].to_be_bytes());
                let step = self.seek_len + 4;
                for (i, key) in keys.iter().enumerate() {
                    let at = NODE_HDR + i * step;
                    buf[at..at + self.seek_len].copy_from_slice(key);
                    buf[at + self.seek_len..at + step]
                        .copy_from_slice(&children[i + 1].to_be_bytes());
                }
            }
            Page::Leaf { next, recs } => {
                debug_assert!(recs.len() <= self.leaf_cap);
                buf[0] = KIND_LEAF;
                buf[1..3].copy_from_slice(&(recs.len() as u16).to_be_bytes());
                buf[3..7].copy_from_slice(&next.to_be_bytes());
                for (i, rec) in recs.iter().enumerate() {
                    let at = LEAF_HDR + i * self.rec_len;
                    buf[at..at + self.rec_len].copy_from_slice(rec);
                }
            }
        }
        file.seek(SeekFrom::Start(no as u64 * PAGE_SIZE as u64))?;
        file.write_all(&buf)?;
        Ok(())
    }

    fn save_meta<F: Read + Write + Seek>(&self, file: &mut F) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(META_MAGIC);
        buf[4..6].copy_from_slice(&(self.seek_len as u16).to_be_bytes());
        buf[6..8].copy_from_slice(&(self.rec_len as u16).to_be_bytes());
        buf[8..12].copy_from_slice(&self.root.to_be_bytes());
        buf[12..16].copy_from_slice(&self.pages.to_be_bytes());
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rec16(key: u32, val: u8) -> Vec<u8> {
        // 16-byte key (big-endian u32 in the tail) + 16-byte value
        let mut r = vec![0u8; 32];
        r[12..16].copy_from_slice(&key.to_be_bytes());
        r[16] = val;
        r
    }

    #[test]
    fn insert_get_update_delete() {
        let mut file = Cursor::new(Vec::new());
        let mut tree = Btree::create(&mut file, 16, 32).unwrap();

        for k in 0..100u32 {
            tree.insert(&mut file, &rec16(k, (k % 7) as u8)).unwrap();
        }
        assert!(matches!(
            tree.insert(&mut file, &rec16(42, 0)),
            Err(Error::KeyAlreadyExists)
        ));

        let got = tree.get(&mut file, &rec16(42, 0)[..16]).unwrap();
        assert_eq!(got[16], 0);

        let mut new_val = vec![0u8; 16];
        new_val[0] = 0xee;
        tree.update(&mut file, &rec16(42, 0)[..16], &new_val).unwrap();
        assert_eq!(tree.get(&mut file, &rec16(42, 0)[..16]).unwrap()[16], 0xee);

        tree.delete(&mut file, &rec16(42, 0)[..16]).unwrap();
        assert!(matches!(
            tree.get(&mut file, &rec16(42, 0)[..16]),
            Err(Error::RecordNotFound)
        ));
        assert!(matches!(
            tree.delete(&mut file, &rec16(42, 0)[..16]),
            Err(Error::RecordNotFound)
        ));
    }

    #[test]
    fn survives_many_splits_and_remount() {
        let mut file = Cursor::new(Vec::new());
        let mut tree = Btree::create(&mut file, 16, 32).unwrap();

        // Far beyond one leaf (cap = 4001/32 = 125) and one node level;
        // a multiplicative scramble keeps keys unique while exercising
        // mid-leaf splits.
        let n = 3000u32;
        for i in 0..n {
            let k = i.wrapping_mul(2_654_435_761);
            tree.insert(&mut file, &rec16(k, 1)).unwrap();
        }
        let reopened = Btree::mount(&mut file, 16, 32).unwrap();
        for i in 0..n {
            let k = i.wrapping_mul(2_654_435_761);
            let mut key = vec![0u8; 16];
            key[12..16].copy_from_slice(&k.to_be_bytes());
            assert!(reopened.get(&mut file, &key).is_ok(), "key {k} lost");
        }
    }

    #[test]
    fn multi_prefix_traverse_and_delete() {
        let mut file = Cursor::new(Vec::new());
        // Set semantics: the whole 32-byte composite is the seek.
        let mut tree = Btree::create(&mut file, 32, 32).unwrap();

        let set_key = |set: u8| {
            let mut k = vec![0u8; 16];
            k[0] = set;
            k
        };
        let member = |set: u8, m: u16| {
            let mut r = set_key(set);
            r.extend_from_slice(&{
                let mut v = vec![0u8; 16];
                v[14..16].copy_from_slice(&m.to_be_bytes());
                v
            });
            r
        };

        for m in 0..300u16 {
            tree.insert(&mut file, &member(1, m)).unwrap();
        }
        for m in 0..5u16 {
            tree.insert(&mut file, &member(2, m)).unwrap();
        }
        // Duplicate member of a set is rejected.
        assert!(matches!(
            tree.insert(&mut file, &member(2, 3)),
            Err(Error::KeyAlreadyExists)
        ));

        let ones = tree.traverse(&mut file, &set_key(1)).unwrap();
        assert_eq!(ones.len(), 300);
        // Ascending member order, stable across identical calls.
        assert!(ones.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tree.traverse(&mut file, &set_key(1)).unwrap(), ones);

        tree.delete(&mut file, &member(1, 7)).unwrap();
        assert_eq!(tree.traverse(&mut file, &set_key(1)).unwrap().len(), 299);

        assert_eq!(tree.delete_prefix(&mut file, &set_key(1)).unwrap(), 299);
        assert!(tree.traverse(&mut file, &set_key(1)).unwrap().is_empty());
        assert_eq!(tree.traverse(&mut file, &set_key(2)).unwrap().len(), 5);

        // Absent key traverses to an empty set, not an error.
        assert!(tree.traverse(&mut file, &set_key(9)).unwrap().is_empty());
    }
}
