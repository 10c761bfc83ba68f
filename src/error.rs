//! Error and corruption-diagnostic types for the B-tree engine.
//!
//! The original C implementation this engine is modeled on stashes the
//! source line number that detected a fault into `node->corrupt`. We keep
//! the same "sticky, nonzero, fatal for further operations" property but
//! replace the line number with a named detection site, which survives
//! refactoring and reads sensibly in logs.

use thiserror::Error;

/// Names the site that first detected a node's corruption.
///
/// A node's `corrupt` field holds `None` while healthy and `Some(tag)`
/// once any of these checks fails. The tag is sticky: once set, every
/// later operation on that node must short-circuit rather than attempt
/// to reason about the node's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptTag {
    /// `seek_trailer`: reported entry size is smaller than one trailer.
    TrailerEntrySizeTooSmall,
    /// `seek_trailer`: entries as reported wouldn't fit behind the header.
    TrailerEntriesOverrunBuffer,
    /// `seek_trailer`: the trailer found at the computed address has the
    /// wrong `entdx`.
    TrailerIndexMismatch,
    /// `key_append`/`compare`: a key fragment offset or length falls
    /// outside the buffer.
    KeyFragmentOutOfRange,
    /// An entry's reported `entsz` doesn't match the expected payload
    /// size for its node.
    EntrySizeMismatch,
    /// Tree-walk descent: a child's level isn't exactly one less than
    /// its parent's.
    LevelMismatchOnDescent,
    /// An internal entry's payload doesn't carry `INTERNAL_MAGIC`.
    InternalPayloadBadMagic,
    /// `check_node`: header magic or version didn't match.
    HeaderBadMagicOrVersion,
    /// `check_node`: the extension area doesn't fit in the buffer.
    ExtensionAreaOverrunsBuffer,
    /// `check_node`: an entry's `entsz` disagrees with entry 0's.
    InconsistentEntrySize,
    /// `check_node`: an entry's `level` disagrees with the header's.
    InconsistentEntryLevel,
    /// Split: the parent has no entries, or its payload size isn't the
    /// internal-link record size.
    SplitParentMalformed,
    /// Split: the entry expected to link to the left half doesn't.
    SplitLeftLinkMismatch,
}

/// The three error categories from the design's error-handling section:
/// caller mistakes, structural corruption, and backend failures.
#[derive(Error, Debug)]
pub enum BtreeError {
    /// A caller-supplied index, payload size, or key was invalid. Does
    /// not mark any node corrupt.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Insertion would create a duplicate key where the caller expected
    /// a fresh separator (e.g. during split).
    #[error("duplicate key where a miss was required")]
    DuplicateKey,

    /// Structural corruption was detected; the node carrying `tag` is now
    /// permanently short-circuited.
    #[error("node corrupt: {0:?}")]
    Corrupt(CorruptTag),

    /// An operation was attempted on a node already marked corrupt.
    #[error("node already corrupt")]
    AlreadyCorrupt,

    /// The resident cache or a buffer grow exceeded available memory.
    #[error("allocation failed: {0}")]
    OutOfMemory(&'static str),

    /// The pluggable I/O backend reported failure.
    #[error("backend I/O error: {0}")]
    Backend(&'static str),

    /// `check_node(picky = true)` was requested; key-order validation in
    /// picky mode is not implemented. Callers should not set `picky`.
    #[error("picky consistency checking is not implemented")]
    Unimplemented,

    /// A binary search's bounds crossed without converging — treated as
    /// a returned error rather than aborting the process.
    #[error("search bounds violation")]
    SearchBoundsViolation,
}

pub type BtreeResult<T> = Result<T, BtreeError>;
