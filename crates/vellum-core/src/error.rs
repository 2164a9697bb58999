//! Error taxonomy and visitor control flow.

use crate::id::Id;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocError>;

/// Engine errors.
///
/// The `No*Sibling` and `NotInRope` variants are expected during normal
/// boundary navigation ("no character to the left of the first one") and
/// are meant to be matched and branched on. A merge failure carrying
/// `ParentNotFound` means the operation was quarantined, not that the
/// document is corrupt. `Corrupt` is only produced by the validators.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("parent or target {0} not found")]
    ParentNotFound(Id),
    #[error("id {0} not in rope")]
    NotInRope(Id),
    #[error("invalid offset {offset} at {id:?}")]
    InvalidOffset { id: Option<Id>, offset: i64 },
    #[error("index {ix} out of bounds for size {size}")]
    OutOfBounds { ix: usize, size: usize },
    #[error("no left visible sibling for {0}")]
    NoLeftVisSibling(Id),
    #[error("no right visible sibling for {0}")]
    NoRightVisSibling(Id),
    #[error("no left total sibling for {0}")]
    NoLeftTotSibling(Id),
    #[error("no right total sibling for {0}")]
    NoRightTotSibling(Id),
    #[error("no left sibling at address for {0}")]
    NoLeftSiblingAt(Id),
    #[error("no right sibling at address for {0}")]
    NoRightSiblingAt(Id),
    #[error("no visible text in run {0}")]
    NoVisibleText(Id),
    #[error("text is not well-formed UTF-16")]
    InvalidUtf16,
    #[error("empty text")]
    EmptyText,
    #[error("cannot split run {0} between surrogate halves")]
    SurrogateSplit(Id),
    #[error("nested bundle operations are not supported")]
    NestedMulti,
    #[error("nested snapshot operations are not supported")]
    NestedSnapshot,
    #[error("bundle with id {id} already merged with {have} members, got {got}")]
    MultiLengthMismatch { id: Id, have: usize, got: usize },
    #[error("unknown id {0} for a required id field")]
    UnknownRequiredId(Id),
    #[error("scrub cursor is not initialized")]
    ScrubNotInitialized,
    #[error("scrub index {0} out of range")]
    ScrubOutOfRange(i64),
    #[error("document is empty")]
    EmptyDocument,
    #[error("wire format: {0}")]
    Wire(#[from] crate::wire::WireError),
    #[error("structural invariant violated: {0}")]
    Corrupt(String),
}

/// Visitor verdict for traversals that may end early.
///
/// Early exit is a result, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}
