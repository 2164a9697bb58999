//! Character-level CRDT engine for collaborative text editing.
//!
//! Replicas apply local edits, exchange operations over any channel (in
//! any order), and converge to identical state without coordination. The
//! engine is built from:
//!
//! - [`Id`] — `(author, seq)` identifiers ordered by `(seq, author)`,
//!   minted from a per-document Lamport clock.
//! - The fugue tree ([`node`]) — conflict-resolution tree of text runs
//!   giving concurrent inserts a deterministic, interleaving-free order.
//! - The rope ([`rope`]) — a weight-balanced AVL index over the same
//!   runs, translating positions to identifiers and back in both the
//!   visible and the total (tombstones included) coordinate space.
//! - The operation log ([`oplog`]) — idempotent merge bookkeeping plus a
//!   quarantine for operations whose causal dependencies are missing.
//! - Character history ([`history`]) — per-unit marker trees making
//!   concurrent delete/undelete last-writer-wins by Lamport order.
//! - Content addresses ([`address`]) — causal cuts supporting filtered
//!   reconstruction, rewind/undo/redo, and history scrubbing.
//!
//! A [`Doc`] is single-threaded and synchronous; callers serialize
//! access to one instance. Operations interchange as tagged JSON arrays
//! ([`wire`]).
//!
//! ```
//! use vellum_core::Doc;
//!
//! let mut a = Doc::new_seeded("alice");
//! a.insert(0, "Hello World!").unwrap();
//! a.delete(5, 6).unwrap();
//! assert_eq!(a.text(), "Hello!\n");
//!
//! // Another replica applies the same history in any causal order and
//! // converges.
//! let mut b = Doc::new("bob");
//! for op in a.to_ops() {
//!     b.merge_op(&op).unwrap();
//! }
//! assert_eq!(b.text(), a.text());
//! ```

pub mod address;
pub mod doc;
pub mod error;
pub mod filter;
pub mod history;
pub mod id;
pub mod node;
pub mod op;
pub mod oplog;
pub mod rope;
pub mod scrub;
pub mod undo;
pub mod utf16;
pub mod wire;

pub use address::ContentAddress;
pub use doc::{random_author, Doc};
pub use error::{DocError, Result, Visit};
pub use filter::Filtered;
pub use history::{CharHistory, Marker};
pub use id::{Id, Side};
pub use node::{FugueNode, FugueRef, NodeArena, TotSpan, VisSpan};
pub use op::{
    DeleteOp, FormatOp, InsertOp, MultiOp, Op, RewindOp, SerializedDoc, ShowOp, SnapshotOp,
};
pub use oplog::{FailedOps, OpLog};
pub use rope::{Rope, RopeIndex, RopeRef};
pub use scrub::ScrubStep;
pub use undo::UndoState;
pub use wire::WireError;
