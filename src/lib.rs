//! A single-writer, paged B-tree engine over a pluggable byte-oriented
//! backing store.
//!
//! Variable-length byte keys map to fixed-size payload records. The
//! tree is a classical B-tree: internal nodes route by child pointer,
//! leaf nodes hold application payload. Every node is one
//! self-describing, byte-packed page (see [`node`] for the exact
//! layout) that can live anywhere an [`io::IoBackend`] chooses to put
//! it.
//!
//! ```
//! use pagedtree::{BTree, BTreeConfig};
//!
//! let mut config = BTreeConfig::default();
//! config.payload_bytes = 4;
//! let mut tree = BTree::new(config).unwrap();
//! tree.insert(b"hello", &1u32.to_be_bytes()).unwrap();
//! assert_eq!(Some(1u32.to_be_bytes().to_vec()), tree.get(b"hello").unwrap());
//! ```
//!
//! This initial version supports insert and lookup only: no deletion,
//! no multi-writer concurrency, no transactional rollback. See each
//! module's docs for the invariants it upholds.

pub mod cache;
pub mod error;
pub mod internal;
pub mod io;
pub mod node;
mod packing;
pub mod tree;

pub use error::{BtreeError, BtreeResult, CorruptTag};
pub use io::{IoBackend, MemoryBackend};
pub use tree::{BTree, BTreeConfig};
