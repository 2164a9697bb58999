//! The closed operation set.
//!
//! Every state change a replica can make or receive is one of these
//! variants, dispatched exhaustively by the merge engine. The set is
//! closed and versioned by the wire format (tags in `wire.rs`), so a sum
//! type is the right shape; adding a kind is a wire-format change.

use serde_json::{Map, Value};

use crate::address::ContentAddress;
use crate::id::{Id, Side};
use crate::utf16::utf16_len;

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOp {
    pub id: Id,
    pub text: String,
    pub parent_id: Id,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOp {
    pub id: Id,
    pub target_id: Id,
    pub span: i64,
}

/// Un-tombstones a span: the inverse of [`DeleteOp`] on the undo side.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowOp {
    pub id: Id,
    pub target_id: Id,
    pub span: i64,
}

/// Formatting payloads are owned by the external formatting layer; the
/// core logs, clocks, addresses and trims them without interpreting the
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOp {
    pub id: Id,
    pub start_id: Id,
    pub end_id: Id,
    pub payload: Map<String, Value>,
}

/// Atomic bundle. Members are still individually addressable and
/// individually mergeable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiOp {
    pub ops: Vec<Op>,
}

/// Causal-cut bulk tombstone rewrite; `undo_address` reverses it.
#[derive(Debug, Clone, PartialEq)]
pub struct RewindOp {
    pub id: Id,
    pub address: ContentAddress,
    pub undo_address: ContentAddress,
}

/// Full-state bootstrap/compaction payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOp {
    pub id: Id,
    pub document: SerializedDoc,
}

/// A serialized document: versioned list of operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedDoc {
    /// `None` marks the legacy pre-versioning format.
    pub version: Option<String>,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Insert(InsertOp),
    Delete(DeleteOp),
    Show(ShowOp),
    Format(FormatOp),
    Multi(MultiOp),
    Rewind(RewindOp),
    Snapshot(SnapshotOp),
}

impl Op {
    /// The operation's identifier; for a bundle, the smallest member id.
    pub fn id(&self) -> Id {
        match self {
            Op::Insert(op) => op.id.clone(),
            Op::Delete(op) => op.id.clone(),
            Op::Show(op) => op.id.clone(),
            Op::Format(op) => op.id.clone(),
            Op::Rewind(op) => op.id.clone(),
            Op::Snapshot(op) => op.id.clone(),
            Op::Multi(op) => op
                .ops
                .iter()
                .map(Op::id)
                .min()
                .unwrap_or_else(Id::none),
        }
    }

    /// Largest identifier the operation occupies. An insert owns one id
    /// per code unit; a bundle spans its members.
    pub fn max_id(&self) -> Id {
        match self {
            Op::Insert(op) => op.id.offset(utf16_len(&op.text) as i64 - 1),
            Op::Multi(op) => op
                .ops
                .iter()
                .map(Op::max_id)
                .max()
                .unwrap_or_else(Id::none),
            _ => self.id(),
        }
    }
}

impl MultiOp {
    /// Add an operation, flattening nested bundles.
    pub fn append(&mut self, op: Op) {
        match op {
            Op::Multi(m) => self.ops.extend(m.ops),
            other => self.ops.push(other),
        }
    }

    /// Collapse to the single member, the bundle, or nothing.
    pub fn flatten(mut self) -> Option<Op> {
        match self.ops.len() {
            0 => None,
            1 => self.ops.pop(),
            _ => Some(Op::Multi(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_id_is_smallest_member() {
        let mut m = MultiOp::default();
        m.append(Op::Delete(DeleteOp {
            id: Id::new("b", 7),
            target_id: Id::new("a", 0),
            span: 1,
        }));
        m.append(Op::Delete(DeleteOp {
            id: Id::new("a", 7),
            target_id: Id::new("a", 1),
            span: 1,
        }));
        assert_eq!(Op::Multi(m).id(), Id::new("a", 7));
    }

    #[test]
    fn insert_occupies_one_id_per_unit() {
        let op = Op::Insert(InsertOp {
            id: Id::new("a", 10),
            text: "héllo".to_string(),
            parent_id: Id::none(),
            side: Side::Root,
        });
        assert_eq!(op.max_id(), Id::new("a", 14));
    }

    #[test]
    fn flatten_collapses() {
        let mut m = MultiOp::default();
        assert_eq!(m.clone().flatten(), None);
        m.append(Op::Show(ShowOp {
            id: Id::new("a", 1),
            target_id: Id::new("a", 0),
            span: 1,
        }));
        assert!(matches!(m.clone().flatten(), Some(Op::Show(_))));
        m.append(Op::Show(ShowOp {
            id: Id::new("a", 2),
            target_id: Id::new("a", 0),
            span: 1,
        }));
        assert!(matches!(m.flatten(), Some(Op::Multi(_))));
    }
}
