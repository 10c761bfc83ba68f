//! Node layout, trailer accessor, key codec, intra-node search, insertion,
//! and the consistency checker.
//!
//! A node is one page: a single growable byte buffer holding a header,
//! a string pool of key fragments, and a tail of fixed-size entry slots
//! (payload + trailer) that grows toward the front of the buffer as
//! entries are added. See the module-level layout diagram in the crate
//! root docs.

use std::cmp::Ordering;

use crate::error::{BtreeError, BtreeResult, CorruptTag};
use crate::packing::{fetch, store};

/// On-disk alignment granularity. Entry sizes are expressed in units of
/// this many bytes.
pub const SIZE_UNITS: usize = 8;

/// `magic(4) version(2) nodetype(1) level(1) extsz(1) pad(1)`.
pub const HEADER_SIZE: usize = 10;

/// `entdx(4) entsz(2) level(1) pad(1) koff0(4) ksiz0(4) koff1(4) ksiz1(4)`.
pub const TRAILER_SIZE: usize = 24;

/// Minimum size of a non-empty node: enough to hold a header and a
/// single trailer. Note this does not account for a nonzero `extsz` —
/// a node with extension data can legitimately be smaller than this
/// and still be well-formed before any entries are appended.
pub const MIN_NODE_BYTES: usize = HEADER_SIZE + TRAILER_SIZE;

/// Distinctive 28-bit tag identifying a valid node buffer.
pub const BTREE_MAGIC: u32 = 0x0ABCDE1;

/// On-disk format version. Starts at 1.
pub const FORMAT_VERSION: u16 = 1;

const MAGIC_OFF: usize = 0;
const VERSION_OFF: usize = 4;
const NODETYPE_OFF: usize = 6;
const LEVEL_OFF: usize = 7;
const EXTSZ_OFF: usize = 8;

const ENTDX_OFF: usize = 0;
const ENTSZ_OFF: usize = 4;
const TLEVEL_OFF: usize = 6;
const KOFF0_OFF: usize = 8;
const KSIZ0_OFF: usize = 12;
const KOFF1_OFF: usize = 16;
const KSIZ1_OFF: usize = 20;

/// The fixed prefix of every node buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub nodetype: u8,
    pub level: u8,
    pub extsz: u8,
}

impl Header {
    pub fn read(buf: &[u8]) -> Option<Header> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Header {
            magic: fetch(buf, MAGIC_OFF, 4),
            version: fetch(buf, VERSION_OFF, 2) as u16,
            nodetype: buf[NODETYPE_OFF],
            level: buf[LEVEL_OFF],
            extsz: buf[EXTSZ_OFF],
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        store(buf, MAGIC_OFF, 4, self.magic);
        store(buf, VERSION_OFF, 2, self.version as u32);
        buf[NODETYPE_OFF] = self.nodetype;
        buf[LEVEL_OFF] = self.level;
        buf[EXTSZ_OFF] = self.extsz;
        buf[9] = 0;
    }
}

/// A decoded view of one entry's trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trailer {
    pub entdx: u32,
    pub entsz: u16,
    pub level: u8,
    pub koff0: u32,
    pub ksiz0: u32,
    pub koff1: u32,
    pub ksiz1: u32,
}

impl Trailer {
    fn read(buf: &[u8], at: usize) -> Trailer {
        Trailer {
            entdx: fetch(buf, at + ENTDX_OFF, 4),
            entsz: fetch(buf, at + ENTSZ_OFF, 2) as u16,
            level: buf[at + TLEVEL_OFF],
            koff0: fetch(buf, at + KOFF0_OFF, 4),
            ksiz0: fetch(buf, at + KSIZ0_OFF, 4),
            koff1: fetch(buf, at + KOFF1_OFF, 4),
            ksiz1: fetch(buf, at + KSIZ1_OFF, 4),
        }
    }

    fn write(&self, buf: &mut [u8], at: usize) {
        store(buf, at + ENTDX_OFF, 4, self.entdx);
        store(buf, at + ENTSZ_OFF, 2, self.entsz as u32);
        buf[at + TLEVEL_OFF] = self.level;
        buf[at + TLEVEL_OFF + 1] = 0;
        store(buf, at + KOFF0_OFF, 4, self.koff0);
        store(buf, at + KSIZ0_OFF, 4, self.ksiz0);
        store(buf, at + KOFF1_OFF, 4, self.koff1);
        store(buf, at + KSIZ1_OFF, 4, self.ksiz1);
    }
}

fn round_up(n: usize, unit: usize) -> usize {
    (n + unit - 1) / unit * unit
}

fn ordering_sign(o: Ordering) -> i32 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Encode a search outcome as `2*index + (found ? 1 : 0)`, letting
/// callers distinguish hit from miss while reusing one integer.
pub fn encode_result(index: usize, found: bool) -> i64 {
    2 * index as i64 + if found { 1 } else { 0 }
}

/// Decode a value produced by [`encode_result`] into `(index, found)`.
pub fn decode_result(res: i64) -> (usize, bool) {
    ((res / 2) as usize, res % 2 == 1)
}

/// One page of the B-tree: a growable buffer plus the bookkeeping needed
/// to talk to the resident cache and the pluggable I/O backend.
///
/// Node handles are ephemeral: don't hold one across a call that may
/// trigger cache eviction (split, or another `get_node` past the cache's
/// capacity). Refetch by id instead.
pub struct Node {
    pub node_id: u32,
    pub buf: Vec<u8>,
    pub parent: u32,
    pub clean: usize,
    pub freelow: usize,
    pub corrupt: Option<CorruptTag>,
    pub iodata: Option<Box<dyn std::any::Any + Send>>,
}

impl Node {
    pub fn new(node_id: u32) -> Node {
        Node {
            node_id,
            buf: Vec::new(),
            parent: 0,
            clean: 0,
            freelow: 0,
            corrupt: None,
            iodata: None,
        }
    }

    /// Initialise an empty node. The caller is responsible for being
    /// sure the node doesn't already hold useful information.
    pub fn init_node(&mut self, level: u8, nodetype: u8, extsz: u8) -> BtreeResult<()> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        let bytes = HEADER_SIZE + extsz as usize * SIZE_UNITS;
        self.clean = 0;
        self.buf.clear();
        self.buf.resize(bytes, 0);
        Header {
            magic: BTREE_MAGIC,
            version: FORMAT_VERSION,
            nodetype,
            level,
            extsz,
        }
        .write(&mut self.buf);
        self.freelow = bytes;
        Ok(())
    }

    /// Number of entries in the node, or an error if corrupt.
    pub fn nent(&self) -> BtreeResult<i64> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        if self.buf.len() < MIN_NODE_BYTES {
            return Ok(0);
        }
        let t = Trailer::read(&self.buf, self.buf.len() - TRAILER_SIZE);
        Ok(t.entdx as i64 + 1)
    }

    /// Size in bytes of entries within the node, trailer included.
    pub fn entry_size(&self) -> BtreeResult<usize> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        if self.buf.len() < MIN_NODE_BYTES {
            return Ok(0);
        }
        let t = Trailer::read(&self.buf, self.buf.len() - TRAILER_SIZE);
        Ok(t.entsz as usize * SIZE_UNITS)
    }

    /// Size in bytes of payloads within the node (entry size minus the
    /// trailer), padded up to `SIZE_UNITS`.
    pub fn payload_size(&self) -> BtreeResult<usize> {
        let ans = self.entry_size()?;
        Ok(ans.saturating_sub(TRAILER_SIZE))
    }

    /// Node level (leaves are at level 0).
    pub fn level(&self) -> BtreeResult<u8> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        match Header::read(&self.buf) {
            Some(h) => Ok(h.level),
            None => Err(BtreeError::InvalidArgument("buffer too small for a header")),
        }
    }

    /// Find the trailer of entry `i`, returning its byte offset alongside
    /// the decoded fields. `Ok(None)` means "no such entry" — not
    /// corruption. Any structural problem marks the node corrupt and
    /// returns `Err`.
    pub fn seek_trailer(&mut self, i: u32) -> BtreeResult<Option<(usize, Trailer)>> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        if self.buf.len() < MIN_NODE_BYTES {
            return Err(BtreeError::InvalidArgument("node has no entries"));
        }
        let last_off = self.buf.len() - TRAILER_SIZE;
        let last_t = Trailer::read(&self.buf, last_off);
        let last = last_t.entdx;
        let entry_size = last_t.entsz as usize * SIZE_UNITS;
        if entry_size < TRAILER_SIZE {
            self.corrupt = Some(CorruptTag::TrailerEntrySizeTooSmall);
            return Err(BtreeError::Corrupt(CorruptTag::TrailerEntrySizeTooSmall));
        }
        let overrun = match entry_size.checked_mul(last as usize + 1) {
            Some(v) => v >= self.buf.len(),
            None => true,
        };
        if overrun {
            self.corrupt = Some(CorruptTag::TrailerEntriesOverrunBuffer);
            return Err(BtreeError::Corrupt(CorruptTag::TrailerEntriesOverrunBuffer));
        }
        if i > last {
            return Ok(None);
        }
        let target_off = self.buf.len() - entry_size * (last - i) as usize - TRAILER_SIZE;
        let t = Trailer::read(&self.buf, target_off);
        if t.entdx != i {
            self.corrupt = Some(CorruptTag::TrailerIndexMismatch);
            return Err(BtreeError::Corrupt(CorruptTag::TrailerIndexMismatch));
        }
        Ok(Some((target_off, t)))
    }

    /// Fetch a copy of entry `i`'s payload, which must be exactly
    /// `payload_bytes` long. `Ok(None)` means no such entry; a size
    /// mismatch marks the node corrupt.
    pub fn entry_payload(&mut self, payload_bytes: usize, i: u32) -> BtreeResult<Option<Vec<u8>>> {
        let entry_bytes = payload_bytes + TRAILER_SIZE;
        let (trailer_off, t) = match self.seek_trailer(i)? {
            Some(x) => x,
            None => return Ok(None),
        };
        if t.entsz as usize * SIZE_UNITS != entry_bytes {
            self.corrupt = Some(CorruptTag::EntrySizeMismatch);
            return Err(BtreeError::Corrupt(CorruptTag::EntrySizeMismatch));
        }
        let start = trailer_off + TRAILER_SIZE - entry_bytes;
        Ok(Some(self.buf[start..start + payload_bytes].to_vec()))
    }

    fn append_fragment(&mut self, dst: &mut Vec<u8>, koff: u32, ksiz: u32) -> BtreeResult<()> {
        let koff = koff as usize;
        let ksiz = ksiz as usize;
        if koff > self.buf.len() || ksiz > self.buf.len() - koff {
            self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
            return Err(BtreeError::Corrupt(CorruptTag::KeyFragmentOutOfRange));
        }
        dst.extend_from_slice(&self.buf[koff..koff + ksiz]);
        Ok(())
    }

    /// Append the key of entry `i` to `dst`.
    pub fn key_append(&mut self, dst: &mut Vec<u8>, i: u32) -> BtreeResult<()> {
        let (_, t) = match self.seek_trailer(i)? {
            Some(x) => x,
            None => return Err(BtreeError::InvalidArgument("no such entry")),
        };
        self.append_fragment(dst, t.koff0, t.ksiz0)?;
        self.append_fragment(dst, t.koff1, t.ksiz1)
    }

    /// Fetch the key of entry `i` as a fresh buffer.
    pub fn key_fetch(&mut self, i: u32) -> BtreeResult<Vec<u8>> {
        let mut dst = Vec::new();
        self.key_append(&mut dst, i)?;
        Ok(dst)
    }

    /// Lexicographically compare `key` against the key stored in entry
    /// `i`, without materialising the stored key. Returns a sentinel far
    /// from zero (and marks the node corrupt) if the trailer can't be
    /// read or a fragment offset is out of range.
    pub fn compare(&mut self, key: &[u8], i: u32) -> i32 {
        let (_, t) = match self.seek_trailer(i) {
            Ok(Some(x)) => x,
            _ => return 999,
        };

        let koff = t.koff0 as usize;
        let ksiz = t.ksiz0 as usize;
        if koff > self.buf.len() || ksiz > self.buf.len() - koff {
            self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
            return 999;
        }
        let frag = &self.buf[koff..koff + ksiz];
        let cmplen = key.len().min(ksiz);
        let res = key[..cmplen].cmp(&frag[..cmplen]);
        if res != Ordering::Equal || key.len() == ksiz {
            return ordering_sign(res);
        }
        if key.len() < ksiz {
            return -1;
        }

        // size > ksiz: compare the remainder against fragment 1.
        let key = &key[cmplen..];
        let koff = t.koff1 as usize;
        let ksiz = t.ksiz1 as usize;
        if koff > self.buf.len() || ksiz > self.buf.len() - koff {
            self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
            return 999;
        }
        let frag = &self.buf[koff..koff + ksiz];
        let cmplen = key.len().min(ksiz);
        let res = key[..cmplen].cmp(&frag[..cmplen]);
        if res != Ordering::Equal {
            return ordering_sign(res);
        }
        if key.len() < ksiz {
            -1
        } else {
            (key.len() > ksiz) as i32
        }
    }

    /// Binary search the node for `key`. Returns
    /// `encode_result(index, found)`, or an error if the node is (or
    /// becomes) corrupt, or if the search bounds cross without
    /// converging — a condition that should be unreachable in a
    /// well-formed node, reported as an error rather than a process
    /// abort.
    pub fn search(&mut self, key: &[u8]) -> BtreeResult<i64> {
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }
        let n = self.nent()?;
        let (mut i, mut j) = (0i64, n);
        while i < j {
            let mid = (i + j) >> 1;
            let res = self.compare(key, mid as u32);
            if res == 0 {
                return Ok(encode_result(mid as usize, true));
            }
            if res < 0 {
                j = mid;
            } else {
                i = mid + 1;
            }
        }
        if i != j {
            return Err(BtreeError::SearchBoundsViolation);
        }
        Ok(encode_result(i as usize, false))
    }

    /// Prefix reuse is reserved but unimplemented: this always reports
    /// nothing reusable, so every insert stores a single key fragment.
    fn scan_reusable(&self, _key: &[u8], _i: u32) -> (u32, u32) {
        (0, 0)
    }

    /// Insert a new entry at index `i`. The caller is responsible for
    /// providing the correct index and for triggering a split when the
    /// node grows past the tree's soft threshold.
    ///
    /// `payload` must be the same size (after rounding to `SIZE_UNITS`)
    /// as every other entry already in the node.
    pub fn insert_entry(&mut self, i: u32, key: &[u8], payload: &[u8]) -> BtreeResult<i64> {
        if self.freelow == 0 {
            self.check_node(false)?;
        }
        if self.corrupt.is_some() {
            return Err(BtreeError::AlreadyCorrupt);
        }

        let pb = round_up(payload.len(), SIZE_UNITS);
        let k = pb + TRAILER_SIZE;
        let n = self.nent()?;
        if i as i64 > n {
            return Err(BtreeError::InvalidArgument("insertion index beyond entry count"));
        }

        let org = if n == 0 {
            self.buf.len()
        } else {
            let (trailer0_off, t0) = match self.seek_trailer(0)? {
                Some(x) => x,
                None => return Err(BtreeError::InvalidArgument("node reports entries but has none")),
            };
            let existing_k = t0.entsz as usize * SIZE_UNITS;
            if existing_k != k {
                self.corrupt = Some(CorruptTag::EntrySizeMismatch);
                return Err(BtreeError::Corrupt(CorruptTag::EntrySizeMismatch));
            }
            trailer0_off + TRAILER_SIZE - existing_k
        };

        let (reuse0, reuse1) = self.scan_reusable(key, i);
        let new_trailer = if reuse1 != 0 {
            Trailer {
                entdx: i,
                entsz: (k / SIZE_UNITS) as u16,
                level: self.level()?,
                koff0: reuse0,
                ksiz0: reuse1,
                koff1: self.freelow as u32,
                ksiz1: key.len() as u32 - reuse1,
            }
        } else {
            Trailer {
                entdx: i,
                entsz: (k / SIZE_UNITS) as u16,
                level: self.level()?,
                koff0: self.freelow as u32,
                ksiz0: key.len() as u32,
                koff1: 0,
                ksiz1: 0,
            }
        };

        if key.len() as u32 != reuse1 && self.clean > self.freelow {
            self.clean = self.freelow;
        }

        let n = n as usize;
        let i = i as usize;
        let minnewsize = round_up(
            (n + 1) * k + self.freelow + key.len() - reuse1 as usize,
            SIZE_UNITS,
        );
        let pre = i * k;
        let post = (n - i) * k;

        let to = if minnewsize <= self.buf.len() {
            let to0 = org - k;
            if self.clean > to0 {
                self.clean = to0;
            }
            self.buf.copy_within(org..org + pre, to0);
            to0 + pre
        } else {
            let new_entries_start = minnewsize - (pre + k + post);
            let mut new_buf = vec![0u8; minnewsize];
            new_buf[0..org].copy_from_slice(&self.buf[0..org]);
            for b in &mut new_buf[org..new_entries_start] {
                *b = 0x33;
            }
            new_buf[new_entries_start + pre + k..new_entries_start + pre + k + post]
                .copy_from_slice(&self.buf[org + pre..org + pre + post]);
            new_buf[new_entries_start..new_entries_start + pre]
                .copy_from_slice(&self.buf[org..org + pre]);
            if self.clean > org {
                self.clean = org;
            }
            self.buf = new_buf;
            new_entries_start + pre
        };

        for b in &mut self.buf[to..to + k] {
            *b = 0;
        }
        self.buf[to..to + payload.len()].copy_from_slice(payload);
        new_trailer.write(&mut self.buf, to + pb);

        let mut toff = to + pb;
        for j in i..=n {
            store(&mut self.buf, toff + ENTDX_OFF, 4, j as u32);
            toff += k;
        }

        let reused = reuse1 as usize;
        self.buf[self.freelow..self.freelow + key.len() - reused]
            .copy_from_slice(&key[reuse0 as usize..]);
        self.freelow += key.len() - reused;

        Ok((n + 1) as i64)
    }

    /// Validate header and all trailers, recompute `freelow`, and toggle
    /// `corrupt` as appropriate. Returns the value `corrupt` held before
    /// this call, on success — letting a caller distinguish a prior fault
    /// from one just detected.
    ///
    /// `picky` additionally validates inter-entry key ordering; that mode
    /// isn't implemented, so requesting it returns an error rather than
    /// aborting the process.
    pub fn check_node(&mut self, picky: bool) -> BtreeResult<Option<CorruptTag>> {
        let saved_corrupt = self.corrupt;
        self.corrupt = None;

        if self.buf.is_empty() {
            self.freelow = 0;
            return Ok(None);
        }
        let hdr = match Header::read(&self.buf) {
            Some(h) => h,
            None => {
                self.corrupt = Some(CorruptTag::HeaderBadMagicOrVersion);
                return Err(BtreeError::Corrupt(CorruptTag::HeaderBadMagicOrVersion));
            }
        };
        if hdr.magic != BTREE_MAGIC || hdr.version != FORMAT_VERSION {
            self.corrupt = Some(CorruptTag::HeaderBadMagicOrVersion);
            return Err(BtreeError::Corrupt(CorruptTag::HeaderBadMagicOrVersion));
        }
        let lev = hdr.level;
        let strbase = HEADER_SIZE + hdr.extsz as usize * SIZE_UNITS;
        if strbase > self.buf.len() {
            self.corrupt = Some(CorruptTag::ExtensionAreaOverrunsBuffer);
            return Err(BtreeError::Corrupt(CorruptTag::ExtensionAreaOverrunsBuffer));
        }
        if strbase == self.buf.len() {
            self.freelow = strbase;
            return Ok(saved_corrupt);
        }

        let nent = self.nent()?;
        let mut freelow: usize = 0;
        let mut freemax: usize = 0;
        let mut entsz_expected: usize = 0;
        for idx in 0..nent {
            let i = idx as u32;
            let (toff, t) = match self.seek_trailer(i)? {
                Some(x) => x,
                None => return Err(BtreeError::InvalidArgument("entry vanished during check")),
            };
            if idx == 0 {
                freemax = toff;
                entsz_expected = t.entsz as usize;
            }
            if t.entsz as usize != entsz_expected {
                self.corrupt = Some(CorruptTag::InconsistentEntrySize);
                return Err(BtreeError::Corrupt(CorruptTag::InconsistentEntrySize));
            }
            if t.level != lev {
                self.corrupt = Some(CorruptTag::InconsistentEntryLevel);
                return Err(BtreeError::Corrupt(CorruptTag::InconsistentEntryLevel));
            }
            for &(koff, ksiz) in &[(t.koff0, t.ksiz0), (t.koff1, t.ksiz1)] {
                let koff = koff as usize;
                let ksiz = ksiz as usize;
                if koff < strbase && ksiz != 0 {
                    self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
                    return Err(BtreeError::Corrupt(CorruptTag::KeyFragmentOutOfRange));
                }
                if koff > freemax {
                    self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
                    return Err(BtreeError::Corrupt(CorruptTag::KeyFragmentOutOfRange));
                }
                if ksiz > freemax - koff {
                    self.corrupt = Some(CorruptTag::KeyFragmentOutOfRange);
                    return Err(BtreeError::Corrupt(CorruptTag::KeyFragmentOutOfRange));
                }
                if koff + ksiz > freelow {
                    freelow = koff + ksiz;
                }
            }
        }

        if picky {
            return Err(BtreeError::Unimplemented);
        }
        self.freelow = freelow;
        Ok(saved_corrupt)
    }
}

#[cfg(test)]
fn leaf(level: u8) -> Node {
    let mut n = Node::new(1);
    n.init_node(level, b'L', 0).unwrap();
    n
}

#[test]
fn init_node_sets_header_fields() {
    let n = leaf(0);
    let h = Header::read(&n.buf).unwrap();
    assert_eq!(BTREE_MAGIC, h.magic);
    assert_eq!(FORMAT_VERSION, h.version);
    assert_eq!(b'L', h.nodetype);
    assert_eq!(0, h.level);
    assert_eq!(HEADER_SIZE, n.freelow);
}

#[test]
fn insert_then_lookup_single_entry() {
    let mut n = leaf(0);
    let res = n.insert_entry(0, b"apple", &1u32.to_be_bytes()).unwrap();
    assert_eq!(1, res);
    assert_eq!(1, n.nent().unwrap());
    assert_eq!(encode_result(0, true), n.search(b"apple").unwrap());
    assert_eq!(encode_result(1, false), n.search(b"banana").unwrap());
}

#[test]
fn sorted_fill_five_keys() {
    let mut n = leaf(0);
    for (idx, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        n.insert_entry(idx as u32, k.as_bytes(), &(idx as u32).to_be_bytes())
            .unwrap();
    }
    assert_eq!(5, n.nent().unwrap());
    assert_eq!(None, n.check_node(false).unwrap());
    for (idx, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        assert_eq!(encode_result(idx, true), n.search(k.as_bytes()).unwrap());
    }
}

#[test]
fn insert_at_front_shifts_existing_entries() {
    let mut n = leaf(0);
    n.insert_entry(0, b"m", &1u32.to_be_bytes()).unwrap();
    n.insert_entry(0, b"a", &2u32.to_be_bytes()).unwrap();
    assert_eq!(encode_result(0, true), n.search(b"a").unwrap());
    assert_eq!(encode_result(1, true), n.search(b"m").unwrap());
    assert_eq!(b"a".to_vec(), n.key_fetch(0).unwrap());
    assert_eq!(b"m".to_vec(), n.key_fetch(1).unwrap());
}

#[test]
fn keys_of_length_zero_and_one() {
    let mut n = leaf(0);
    n.insert_entry(0, b"", &1u32.to_be_bytes()).unwrap();
    n.insert_entry(1, b"z", &2u32.to_be_bytes()).unwrap();
    assert_eq!(encode_result(0, true), n.search(b"").unwrap());
    assert_eq!(encode_result(1, true), n.search(b"z").unwrap());
}

#[test]
fn prefix_keys_compare_correctly() {
    let mut n = leaf(0);
    n.insert_entry(0, b"car", &1u32.to_be_bytes()).unwrap();
    n.insert_entry(1, b"carpet", &2u32.to_be_bytes()).unwrap();
    assert_eq!(encode_result(0, true), n.search(b"car").unwrap());
    assert_eq!(encode_result(1, true), n.search(b"carpet").unwrap());
    assert_eq!(encode_result(1, false), n.search(b"care").unwrap());
}

#[test]
fn payload_size_off_unit_boundary_gets_padded() {
    let mut n = leaf(0);
    n.insert_entry(0, b"x", &[1u8, 2, 3]).unwrap();
    assert_eq!(SIZE_UNITS, n.payload_size().unwrap());
}

#[test]
fn long_key_forces_buffer_growth() {
    let mut n = leaf(0);
    let long_key = vec![b'k'; 10_000];
    n.insert_entry(0, &long_key, &1u32.to_be_bytes()).unwrap();
    assert_eq!(encode_result(0, true), n.search(&long_key).unwrap());
}

#[test]
fn corrupted_entdx_is_detected_and_sticky() {
    let mut n = leaf(0);
    for (idx, k) in ["a", "b", "c"].iter().enumerate() {
        n.insert_entry(idx as u32, k.as_bytes(), &(idx as u32).to_be_bytes())
            .unwrap();
    }
    // Zero out the entdx field of the last (index-2) trailer.
    let off = n.buf.len() - TRAILER_SIZE;
    store(&mut n.buf, off + ENTDX_OFF, 4, 0);
    let err = n.seek_trailer(2).unwrap_err();
    assert!(matches!(err, BtreeError::Corrupt(CorruptTag::TrailerIndexMismatch)));
    assert!(n.corrupt.is_some());
    assert!(n.search(b"c").is_err());
}

#[test]
fn mismatched_payload_size_is_a_caller_error() {
    let mut n = leaf(0);
    n.insert_entry(0, b"a", &1u32.to_be_bytes()).unwrap();
    let err = n.insert_entry(1, b"b", &[0u8; 1]).unwrap_err();
    assert!(matches!(err, BtreeError::Corrupt(CorruptTag::EntrySizeMismatch)));
}
