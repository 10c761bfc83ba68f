//! The resident node cache.
//!
//! Nodes are faulted in from the backing store on first reference and
//! stay resident until explicitly evicted. Eviction finalizes a node:
//! write it back (unless it's corrupt), close it with the backend, and
//! drop its buffer. There's no LRU or capacity limit here — the tree
//! evicts deliberately (e.g. after a split completes) rather than the
//! cache reclaiming space behind the caller's back.
//!
//! Node handles borrowed from the cache are ephemeral: don't hold one
//! across a call that might evict it. Re-fetch by id instead.

use std::collections::HashMap;

use log::warn;

use crate::error::BtreeResult;
use crate::io::{IoBackend, MAX_NODE_BYTES};
use crate::node::Node;

#[cfg(test)]
use crate::io::MemoryBackend;

#[derive(Default)]
pub struct Cache {
    nodes: HashMap<u32, Node>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            nodes: HashMap::new(),
        }
    }

    /// Fetch the node with the given id, faulting it in from `io` (if
    /// any) the first time it's referenced. A read or consistency
    /// failure during fault-in bumps `*errors` but still returns the
    /// (now corrupt-flagged) node rather than an error, matching
    /// `get_node`'s contract elsewhere in this crate: corruption is
    /// reported through the node, not through the accessor.
    pub fn get_node(
        &mut self,
        node_id: u32,
        mut io: Option<&mut dyn IoBackend>,
        errors: &mut u64,
    ) -> BtreeResult<&mut Node> {
        if !self.nodes.contains_key(&node_id) {
            let mut node = Node::new(node_id);
            if let Some(backend) = io.as_deref_mut() {
                if backend.btopen(&mut node).is_err() {
                    *errors += 1;
                } else if backend.btread(&mut node, MAX_NODE_BYTES).is_err() {
                    *errors += 1;
                } else {
                    node.clean = node.buf.len();
                    if node.check_node(false).is_err() {
                        *errors += 1;
                    }
                }
            }
            self.nodes.insert(node_id, node);
        }
        Ok(self.nodes.get_mut(&node_id).expect("just inserted"))
    }

    /// Access a node that is already resident, without faulting it in.
    pub fn get_resident(&mut self, node_id: u32) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Finalize and drop one node: write it back through `io` unless
    /// it's corrupt, close it, and remove it from the cache. A backend
    /// failure here bumps `*errors` but is not itself an error return —
    /// eviction runs in places (cache pressure, tree teardown) that have
    /// nowhere better to propagate a single node's failure to.
    pub fn evict(&mut self, node_id: u32, mut io: Option<&mut dyn IoBackend>, errors: &mut u64) {
        if let Some(mut node) = self.nodes.remove(&node_id) {
            if let Some(backend) = io.as_deref_mut() {
                let write_ok = if node.corrupt.is_none() {
                    backend.btwrite(&mut node).is_ok()
                } else {
                    false
                };
                node.clean = node.buf.len();
                let close_ok = backend.btclose(&mut node).is_ok();
                if !write_ok || !close_ok {
                    *errors += 1;
                    warn!("node {} failed to finalize cleanly", node_id);
                }
            }
        }
    }

    /// Evict every resident node, in preparation for destroying the
    /// tree.
    pub fn evict_all(&mut self, mut io: Option<&mut dyn IoBackend>, errors: &mut u64) {
        let ids: Vec<u32> = self.nodes.keys().copied().collect();
        for id in ids {
            self.evict(id, io.as_deref_mut(), errors);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[test]
fn fresh_node_is_empty_without_backend() {
    let mut cache = Cache::new();
    let mut errors = 0;
    let node = cache.get_node(1, None, &mut errors).unwrap();
    assert!(node.buf.is_empty());
    assert_eq!(0, errors);
}

#[test]
fn evict_writes_back_clean_node() {
    let mut cache = Cache::new();
    let mut backend = MemoryBackend::new();
    let mut errors = 0;
    {
        let node = cache.get_node(1, Some(&mut backend), &mut errors).unwrap();
        node.init_node(0, b'L', 0).unwrap();
    }
    cache.evict(1, Some(&mut backend), &mut errors);
    assert_eq!(0, errors);
    assert!(cache.get_resident(1).is_none());

    let mut reloaded = Cache::new();
    let node = reloaded.get_node(1, Some(&mut backend), &mut errors).unwrap();
    assert!(!node.buf.is_empty());
}

#[test]
fn evict_of_corrupt_node_bumps_errors() {
    let mut cache = Cache::new();
    let mut backend = MemoryBackend::new();
    let mut errors = 0;
    {
        let node = cache.get_node(1, Some(&mut backend), &mut errors).unwrap();
        node.init_node(0, b'L', 0).unwrap();
        node.corrupt = Some(crate::error::CorruptTag::HeaderBadMagicOrVersion);
    }
    cache.evict(1, Some(&mut backend), &mut errors);
    assert_eq!(1, errors);
}
