//! The tree handle: lookup, insert, and split, wired up to the resident
//! cache and an optional backing store.

use log::info;

use crate::cache::Cache;
use crate::error::{BtreeError, BtreeResult, CorruptTag};
use crate::internal::{InternalPayload, INTERNAL_PAYLOAD_SIZE};
use crate::io::IoBackend;
use crate::node::{decode_result, Node};

/// Tunables for a `BTree`. `payload_bytes` is fixed for the lifetime of
/// a tree: every leaf entry in it must carry a payload of this size.
#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    /// Soft entry-count threshold that triggers a split.
    pub full: u32,
    /// Size in bytes of every leaf payload this tree stores.
    pub payload_bytes: usize,
    /// When set, the tree flushes its entire resident cache after an
    /// operation that leaves it holding more nodes than this. There's no
    /// partial LRU eviction — flushing is coarse but keeps memory use
    /// bounded for callers who ask for it.
    pub cache_capacity: Option<usize>,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        BTreeConfig {
            full: 20,
            payload_bytes: 4,
            cache_capacity: None,
        }
    }
}

/// A single-writer B-tree over a pluggable backing store.
///
/// Not `Sync`: the design assumes one logical thread of control per
/// tree, with no locking anywhere in the node or cache layers.
pub struct BTree {
    cache: Cache,
    io: Option<Box<dyn IoBackend>>,
    errors: u64,
    next_node_id: u32,
    full: u32,
    next_split: u32,
    missed_split: u32,
    payload_bytes: usize,
    cache_capacity: Option<usize>,
}

impl BTree {
    /// Create a tree with no backing store — entries live only as long
    /// as the resident cache does.
    pub fn new(config: BTreeConfig) -> BtreeResult<Self> {
        let mut tree = BTree {
            cache: Cache::new(),
            io: None,
            errors: 0,
            next_node_id: 2,
            full: config.full,
            next_split: 0,
            missed_split: 0,
            payload_bytes: config.payload_bytes,
            cache_capacity: config.cache_capacity,
        };
        {
            let root = tree.cache.get_node(1, None, &mut tree.errors)?;
            root.init_node(0, b'L', 0)?;
        }
        Ok(tree)
    }

    /// Open (or create) a tree backed by `io`. If the backend has no
    /// existing root, a fresh empty leaf root is written.
    pub fn open(io: Box<dyn IoBackend>, config: BTreeConfig) -> BtreeResult<Self> {
        let mut tree = BTree {
            cache: Cache::new(),
            io: Some(io),
            errors: 0,
            next_node_id: 2,
            full: config.full,
            next_split: 0,
            missed_split: 0,
            payload_bytes: config.payload_bytes,
            cache_capacity: config.cache_capacity,
        };
        let needs_init = {
            let root = tree.cache.get_node(1, tree.io.as_deref_mut(), &mut tree.errors)?;
            root.buf.is_empty()
        };
        if needs_init {
            let root = tree.cache.get_node(1, tree.io.as_deref_mut(), &mut tree.errors)?;
            root.init_node(0, b'L', 0)?;
        }
        Ok(tree)
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    fn io_mut(&mut self) -> Option<&mut dyn IoBackend> {
        self.io.as_deref_mut()
    }

    /// Flush the resident cache once it grows past the configured
    /// capacity. A cache with no backend has nowhere to persist an
    /// evicted node's content, so `cache_capacity` is a no-op for a tree
    /// built with [`BTree::new`] — honoring it there would silently
    /// destroy the tree's only copy of its own data, including the root.
    fn maybe_compact(&mut self) {
        if self.io.is_none() {
            return;
        }
        if let Some(cap) = self.cache_capacity {
            if self.cache.len() > cap {
                let mut io = self.io.take();
                self.cache.evict_all(io.as_deref_mut(), &mut self.errors);
                self.io = io;
            }
        }
    }

    /// Walk from the root to the leaf that would hold `key`, returning
    /// the leaf's node id and the encoded search result within it.
    fn descend(&mut self, key: &[u8]) -> BtreeResult<(u32, i64)> {
        let mut node_id = 1u32;
        let (mut level, mut res) = {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            if node.corrupt.is_some() {
                return Err(BtreeError::AlreadyCorrupt);
            }
            (node.level()?, node.search(key)?)
        };
        while level > 0 {
            let (idx, _found) = decode_result(res);
            let entdx = idx.saturating_sub(1) as u32;
            let link = {
                let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
                let raw = node.entry_payload(INTERNAL_PAYLOAD_SIZE, entdx)?;
                let raw = match raw {
                    Some(b) => b,
                    None => {
                        return Err(BtreeError::InvalidArgument(
                            "internal node missing expected entry",
                        ))
                    }
                };
                match InternalPayload::decode(&raw) {
                    Some(l) => l,
                    None => {
                        node.corrupt = Some(CorruptTag::InternalPayloadBadMagic);
                        return Err(BtreeError::Corrupt(CorruptTag::InternalPayloadBadMagic));
                    }
                }
            };
            let child_id = link.child;
            let child_level = {
                let child = self.cache.get_node(child_id, self.io_mut(), &mut self.errors)?;
                if child.corrupt.is_some() {
                    return Err(BtreeError::AlreadyCorrupt);
                }
                child.level()?
            };
            if child_level as i32 != level as i32 - 1 {
                self.errors += 1;
                if let Some(parent) = self.cache.get_resident(node_id) {
                    parent.corrupt = Some(CorruptTag::LevelMismatchOnDescent);
                }
                return Err(BtreeError::Corrupt(CorruptTag::LevelMismatchOnDescent));
            }
            {
                let child = self.cache.get_node(child_id, self.io_mut(), &mut self.errors)?;
                child.parent = node_id;
            }
            node_id = child_id;
            level = child_level;
            res = {
                let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
                node.search(key)?
            };
        }
        Ok((node_id, res))
    }

    /// Search for `key`. Returns the leaf node id holding (or that would
    /// hold) it, the index within that leaf, and whether it was found.
    pub fn lookup(&mut self, key: &[u8]) -> BtreeResult<(u32, usize, bool)> {
        let (leaf_id, res) = self.descend(key)?;
        let (idx, found) = decode_result(res);
        let result = (leaf_id, idx, found);
        self.maybe_compact();
        Ok(result)
    }

    /// Fetch the payload stored for `key`, or `None` if it isn't
    /// present.
    pub fn get(&mut self, key: &[u8]) -> BtreeResult<Option<Vec<u8>>> {
        let (leaf_id, idx, found) = self.lookup(key)?;
        if !found {
            return Ok(None);
        }
        let raw = {
            let leaf = self.cache.get_node(leaf_id, self.io_mut(), &mut self.errors)?;
            let padded = leaf.payload_size()?;
            leaf.entry_payload(padded, idx as u32)?
        };
        Ok(raw.map(|mut v| {
            v.truncate(self.payload_bytes);
            v
        }))
    }

    /// Insert `key` with `payload`, splitting nodes along the way as
    /// needed. Fails with `DuplicateKey` if `key` is already present.
    pub fn insert(&mut self, key: &[u8], payload: &[u8]) -> BtreeResult<()> {
        if payload.len() != self.payload_bytes {
            return Err(BtreeError::InvalidArgument("payload size doesn't match tree's configured size"));
        }
        let (leaf_id, res) = self.descend(key)?;
        let (index, found) = decode_result(res);
        if found {
            return Err(BtreeError::DuplicateKey);
        }
        let mut pending = {
            let leaf = self.cache.get_node(leaf_id, self.io_mut(), &mut self.errors)?;
            let count = leaf.insert_entry(index as u32, key, payload)?;
            (count as u32 > self.full).then_some(leaf_id)
        };
        while let Some(id) = pending.take() {
            self.split(id)?;
            if self.next_split != 0 {
                let parent_id = self.next_split;
                self.next_split = 0;
                let parent_count = {
                    let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
                    parent.nent()?
                };
                if parent_count as u32 > self.full {
                    pending = Some(parent_id);
                }
            }
        }
        self.maybe_compact();
        Ok(())
    }

    /// Add a level to the tree: the current root's content moves into a
    /// freshly allocated child, and the root is re-initialised as an
    /// internal node pointing at it. Returns the new child's node id,
    /// which is where the original root's entries now live.
    fn grow_a_level(&mut self, root_id: u32) -> BtreeResult<u32> {
        let level = {
            let root = self.cache.get_node(root_id, self.io_mut(), &mut self.errors)?;
            root.level()?
        };
        let child_id = self.next_node_id;
        self.next_node_id += 1;
        let old_buf = {
            let root = self.cache.get_node(root_id, self.io_mut(), &mut self.errors)?;
            root.clean = 0;
            std::mem::take(&mut root.buf)
        };
        {
            let child = self.cache.get_node(child_id, self.io_mut(), &mut self.errors)?;
            child.buf = old_buf;
            child.clean = 0;
            child.parent = root_id;
            child.check_node(false)?;
        }
        {
            let root = self.cache.get_node(root_id, self.io_mut(), &mut self.errors)?;
            root.init_node(level + 1, b'R', 0)?;
            let link = InternalPayload::new(child_id);
            root.insert_entry(0, &[], &link.encode())?;
        }
        info!("grew a level over node {} (new root level {})", child_id, level + 1);
        Ok(child_id)
    }

    /// Split `node_id` into two siblings and link the new one into its
    /// parent, promoting the root if `node_id` is the root. On any
    /// failure the node(s) involved may be left marked corrupt and the
    /// tree's error counter is incremented.
    pub fn split(&mut self, node_id: u32) -> BtreeResult<()> {
        let result = self.split_inner(node_id);
        if result.is_err() {
            self.errors += 1;
        }
        result
    }

    fn split_inner(&mut self, mut node_id: u32) -> BtreeResult<()> {
        let n = {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.nent()?
        };
        if n < 2 {
            return Err(BtreeError::InvalidArgument("node too small to split"));
        }
        if node_id == 1 {
            node_id = self.grow_a_level(node_id)?;
        }
        let parent_id = {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.parent
        };
        let parent_nent = {
            let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
            parent.nent()?
        };
        if parent_nent < 1 {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.corrupt = Some(CorruptTag::SplitParentMalformed);
            return Err(BtreeError::Corrupt(CorruptTag::SplitParentMalformed));
        }
        let parent_payload_size = {
            let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
            parent.payload_size()?
        };
        if parent_payload_size != INTERNAL_PAYLOAD_SIZE {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.corrupt = Some(CorruptTag::SplitParentMalformed);
            return Err(BtreeError::Corrupt(CorruptTag::SplitParentMalformed));
        }
        let pb = {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.payload_size()?
        };
        let level = {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.level()?
        };

        // `left` never enters the resident cache: it's a purely temporary
        // holding area for the left half's content, swapped into `node`'s
        // buffer at commit time below. Keeping it a plain `Node` (never
        // passed to `cache.get_node`) means it never triggers `btopen`,
        // burns no node id, and needs no `btclose` to release it — the
        // same reason the original keeps `a[0]` as a stack-local struct
        // with no hashtable entry. It takes `node_id` as its id, since
        // that's what it's replacing `node`'s content with.
        let mut left = Node::new(node_id);
        left.init_node(level, 0, 0)?;
        left.parent = parent_id;

        let right_id = self.next_node_id;
        self.next_node_id += 1;
        {
            let right = self.cache.get_node(right_id, self.io_mut(), &mut self.errors)?;
            right.init_node(level, 0, 0)?;
            right.parent = parent_id;
        }

        let n = n as usize;
        let half = n / 2;
        info!("splitting {} entries of node {}, child of {}", n, node_id, parent_id);
        for i in 0..n {
            let (key, payload) = {
                let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
                let key = node.key_fetch(i as u32)?;
                let payload = node
                    .entry_payload(pb, i as u32)?
                    .ok_or(BtreeError::InvalidArgument("entry vanished while splitting"))?;
                (key, payload)
            };
            if i < half {
                left.insert_entry(i as u32, &key, &payload)?;
            } else {
                let right = self.cache.get_node(right_id, self.io_mut(), &mut self.errors)?;
                right.insert_entry((i - half) as u32, &key, &payload)?;
            }
        }

        let splitting_key = {
            let right = self.cache.get_node(right_id, self.io_mut(), &mut self.errors)?;
            right.key_fetch(0)?
        };
        let search_res = {
            let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
            parent.search(&splitting_key)?
        };
        let (insert_at, found) = decode_result(search_res);
        if found {
            return Err(BtreeError::DuplicateKey);
        }

        {
            let left_link = if insert_at == 0 {
                None
            } else {
                let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
                parent
                    .entry_payload(INTERNAL_PAYLOAD_SIZE, (insert_at - 1) as u32)?
                    .as_deref()
                    .and_then(InternalPayload::decode)
            };
            if !matches!(left_link, Some(l) if l.child == node_id) {
                let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
                parent.corrupt = Some(CorruptTag::SplitLeftLinkMismatch);
                let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
                node.corrupt = Some(CorruptTag::SplitLeftLinkMismatch);
                return Err(BtreeError::Corrupt(CorruptTag::SplitLeftLinkMismatch));
            }
        }

        if self.next_split == node_id {
            self.next_split = 0;
        }
        let link = InternalPayload::new(right_id);
        let parent_count = {
            let parent = self.cache.get_node(parent_id, self.io_mut(), &mut self.errors)?;
            parent.insert_entry(insert_at as u32, &splitting_key, &link.encode())?
        };
        if parent_count as u32 > self.full {
            self.missed_split = self.next_split;
            self.next_split = parent_id;
        }

        // Commit: node keeps its id but now holds the left half's
        // content. This happens last, after everything that could still
        // fail has already succeeded. `left` is simply dropped afterward —
        // it was never resident in the cache, so there's nothing to close
        // or discard.
        {
            let node = self.cache.get_node(node_id, self.io_mut(), &mut self.errors)?;
            node.buf = std::mem::take(&mut left.buf);
            node.clean = 0;
            node.check_node(false)?;
        }
        Ok(())
    }

    /// Shut the tree down: flush and close every resident node, then
    /// release the backend. Returns the backend handle (if any) so a
    /// caller can hand it to `BTree::open` again — releasing it here
    /// closes the tree's resources without necessarily erasing the
    /// store it backs onto, the same way closing a file descriptor
    /// doesn't delete the file. Returns an error if the tree
    /// accumulated any corruption or backend failures over its
    /// lifetime.
    pub fn destroy(mut self) -> BtreeResult<Option<Box<dyn IoBackend>>> {
        let mut io = self.io.take();
        self.cache.evict_all(io.as_deref_mut(), &mut self.errors);
        if let Some(backend) = io.as_deref_mut() {
            backend.btdestroy()?;
        }
        if self.errors != 0 {
            return Err(BtreeError::Backend("tree accumulated errors over its lifetime"));
        }
        Ok(io)
    }
}

#[cfg(test)]
use crate::io::MemoryBackend;

#[test]
fn empty_lookup_is_a_miss_at_zero() {
    let mut tree = BTree::new(BTreeConfig::default()).unwrap();
    let (_, idx, found) = tree.lookup(b"foo").unwrap();
    assert_eq!(0, idx);
    assert!(!found);
}

#[test]
fn single_insert_then_lookup() {
    let mut tree = BTree::new(BTreeConfig::default()).unwrap();
    tree.insert(b"apple", &1u32.to_be_bytes()).unwrap();
    let (_, idx, found) = tree.lookup(b"apple").unwrap();
    assert!(found);
    assert_eq!(0, idx);
    let (_, idx, found) = tree.lookup(b"banana").unwrap();
    assert!(!found);
    assert_eq!(1, idx);
    assert_eq!(Some(1u32.to_be_bytes().to_vec()), tree.get(b"apple").unwrap());
}

#[test]
fn sorted_fill_of_five_keys() {
    let mut tree = BTree::new(BTreeConfig::default()).unwrap();
    for (i, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        tree.insert(k.as_bytes(), &(i as u32).to_be_bytes()).unwrap();
    }
    for (i, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        assert_eq!(
            Some((i as u32).to_be_bytes().to_vec()),
            tree.get(k.as_bytes()).unwrap()
        );
    }
}

#[test]
fn inserting_a_duplicate_key_fails() {
    let mut tree = BTree::new(BTreeConfig::default()).unwrap();
    tree.insert(b"a", &1u32.to_be_bytes()).unwrap();
    let err = tree.insert(b"a", &2u32.to_be_bytes()).unwrap_err();
    assert!(matches!(err, BtreeError::DuplicateKey));
}

#[test]
fn root_split_keeps_every_key_reachable() {
    let mut config = BTreeConfig::default();
    config.full = 3;
    let mut tree = BTree::new(config).unwrap();
    for k in ["01", "02", "03", "04"] {
        tree.insert(k.as_bytes(), &1u32.to_be_bytes()).unwrap();
    }
    for k in ["01", "02", "03", "04"] {
        let (_, _, found) = tree.lookup(k.as_bytes()).unwrap();
        assert!(found, "key {} should be reachable after split", k);
    }
    let (_, _, root_found) = tree.lookup(b"\0").unwrap();
    assert!(!root_found);
}

#[test]
fn backend_round_trip_of_one_hundred_keys() {
    let backend = MemoryBackend::new();
    let mut tree = BTree::open(Box::new(backend), BTreeConfig::default()).unwrap();
    for i in 0..100u32 {
        let key = format!("key-{:04}", i);
        tree.insert(key.as_bytes(), &i.to_be_bytes()).unwrap();
    }
    let backend = tree.destroy().unwrap().expect("backend survives destroy");

    let mut reopened = BTree::open(backend, BTreeConfig::default()).unwrap();
    for i in 0..100u32 {
        let key = format!("key-{:04}", i);
        assert_eq!(
            Some(i.to_be_bytes().to_vec()),
            reopened.get(key.as_bytes()).unwrap(),
            "key {} should survive the round trip",
            key
        );
    }
}

#[test]
fn cache_capacity_is_ignored_without_a_backend() {
    // A backend-less tree has nowhere to write an evicted node back to;
    // honoring cache_capacity here would silently drop the root (and
    // every other resident node) with no error raised. `full: 3` forces
    // a split partway through, so the cache holds more than one node
    // and a capacity of 1 would otherwise trigger a flush.
    let config = BTreeConfig {
        full: 3,
        cache_capacity: Some(1),
        ..BTreeConfig::default()
    };
    let mut tree = BTree::new(config).unwrap();
    for k in ["01", "02", "03", "04", "05"] {
        tree.insert(k.as_bytes(), &1u32.to_be_bytes()).unwrap();
    }
    for k in ["01", "02", "03", "04", "05"] {
        let (_, _, found) = tree.lookup(k.as_bytes()).unwrap();
        assert!(found, "key {} should survive past the configured cache capacity", k);
    }
    assert_eq!(0, tree.errors());
}

#[test]
fn cache_capacity_flushes_when_a_backend_is_present() {
    let backend = MemoryBackend::new();
    let config = BTreeConfig {
        full: 3,
        cache_capacity: Some(1),
        ..BTreeConfig::default()
    };
    let mut tree = BTree::open(Box::new(backend), config).unwrap();
    for k in ["01", "02", "03", "04", "05"] {
        tree.insert(k.as_bytes(), &1u32.to_be_bytes()).unwrap();
    }
    for k in ["01", "02", "03", "04", "05"] {
        let (_, _, found) = tree.lookup(k.as_bytes()).unwrap();
        assert!(found, "key {} should be found via a cache fault-in from the backend", k);
    }
    assert_eq!(0, tree.errors());
}
