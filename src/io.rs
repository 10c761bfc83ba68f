//! The pluggable backing-store contract.
//!
//! `BTree` never touches a file, socket, or any other storage medium
//! directly. It talks only to an `IoBackend`, which owns the decision of
//! where node bytes actually live. Swapping backends (in-memory, a
//! single flat file, a directory of per-node files, something
//! networked) never requires touching `node`, `tree`, or `cache`.

use crate::error::BtreeResult;
use crate::node::Node;

/// Upper bound on how many bytes a single node is allowed to occupy in
/// one read.
pub const MAX_NODE_BYTES: usize = 1 << 20;

/// A byte-oriented backing store for B-tree nodes.
///
/// Implementors decide how `node.iodata` is populated in `open` and
/// interpreted in the other four calls; the engine treats it as opaque.
pub trait IoBackend: Send {
    /// Prepare `node` for reading and writing. Called once, the first
    /// time a node id is faulted into the resident cache.
    fn btopen(&mut self, node: &mut Node) -> BtreeResult<()>;

    /// Read up to `limit` bytes of the node's persisted content into
    /// `node.buf`. Reading a node id that has never been written should
    /// succeed with an empty buffer, not an error.
    fn btread(&mut self, node: &mut Node, limit: usize) -> BtreeResult<()>;

    /// Persist the current contents of `node.buf`.
    fn btwrite(&mut self, node: &mut Node) -> BtreeResult<()>;

    /// Release any resources `btopen` acquired. Called when a node is
    /// evicted from the resident cache, after a final `btwrite` if the
    /// node isn't corrupt.
    fn btclose(&mut self, node: &mut Node) -> BtreeResult<()>;

    /// Tear down the backend itself. Called once, when the owning
    /// `BTree` is destroyed.
    fn btdestroy(&mut self) -> BtreeResult<()>;
}

/// An in-memory backend, useful for tests and for trees that don't need
/// to survive process restarts.
#[derive(Default)]
pub struct MemoryBackend {
    pages: std::collections::HashMap<u32, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }
}

impl IoBackend for MemoryBackend {
    fn btopen(&mut self, _node: &mut Node) -> BtreeResult<()> {
        Ok(())
    }

    fn btread(&mut self, node: &mut Node, limit: usize) -> BtreeResult<()> {
        if let Some(bytes) = self.pages.get(&node.node_id) {
            let n = bytes.len().min(limit);
            node.buf = bytes[..n].to_vec();
        }
        Ok(())
    }

    fn btwrite(&mut self, node: &mut Node) -> BtreeResult<()> {
        self.pages.insert(node.node_id, node.buf.clone());
        Ok(())
    }

    fn btclose(&mut self, _node: &mut Node) -> BtreeResult<()> {
        Ok(())
    }

    fn btdestroy(&mut self) -> BtreeResult<()> {
        // Releasing the backend handle doesn't erase the store it backs
        // onto — a real file-backed implementation would close file
        // descriptors here, not delete the files. The in-memory pages
        // are left intact so a fresh tree can reopen the same backend.
        Ok(())
    }
}

#[test]
fn write_then_read_round_trips() {
    let mut be = MemoryBackend::new();
    let mut node = Node::new(7);
    node.init_node(0, b'L', 0).unwrap();
    be.btwrite(&mut node).unwrap();

    let mut reread = Node::new(7);
    be.btread(&mut reread, MAX_NODE_BYTES).unwrap();
    assert_eq!(node.buf, reread.buf);
}

#[test]
fn reading_unknown_node_leaves_buffer_empty() {
    let mut be = MemoryBackend::new();
    let mut node = Node::new(99);
    be.btread(&mut node, MAX_NODE_BYTES).unwrap();
    assert!(node.buf.is_empty());
}
