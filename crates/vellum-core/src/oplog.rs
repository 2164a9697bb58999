//! The operation log and the failed-operation quarantine.
//!
//! Ops are logged per author, keyed by the seq of the op's own id. Since
//! the clock advances by text length, an insert occupies the whole id
//! range of its units, so a unit id resolves to its insert with one floor
//! search. The log also tracks the running per-author max id, which is
//! the document's full content address.

use std::collections::HashMap;

use copse::AvlMap;

use crate::id::Id;
use crate::op::Op;

#[derive(Debug, Clone, Default)]
pub struct OpLog {
    authors: HashMap<String, AvlMap<i64, Op>>,
    max_ids: HashMap<String, i64>,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.authors.values().map(AvlMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.values().all(AvlMap::is_empty)
    }

    /// Running per-author high-water marks.
    pub fn max_ids(&self) -> &HashMap<String, i64> {
        &self.max_ids
    }

    pub fn author_ops(&self) -> impl Iterator<Item = (&String, &AvlMap<i64, Op>)> {
        self.authors.iter()
    }

    pub fn put(&mut self, op: &Op) {
        // A bundle subsumes members that were merged individually.
        if let Op::Multi(m) = op {
            for member in &m.ops {
                self.remove(member);
            }
        }

        let id = op.id();
        self.authors
            .entry(id.author.clone())
            .or_default()
            .insert(id.seq, op.clone());

        let max = op.max_id();
        let entry = self.max_ids.entry(max.author).or_insert(i64::MIN);
        *entry = (*entry).max(max.seq);
    }

    /// Drop a partially recorded op. For a bundle, drops any members that
    /// made it into the log individually.
    pub fn remove(&mut self, op: &Op) {
        if let Op::Multi(m) = op {
            for member in &m.ops {
                self.remove(member);
            }
            return;
        }
        let id = op.id();
        if let Some(tree) = self.authors.get_mut(&id.author) {
            tree.remove(&id.seq);
        }
    }

    /// Op whose own id is exactly `id`.
    pub fn get_exact(&self, id: &Id) -> Option<&Op> {
        let tree = self.authors.get(&id.author)?;
        let op = tree.get(&id.seq)?;
        (op.id() == *id).then_some(op)
    }

    /// Op whose id range contains `id` (a unit id inside an insert
    /// resolves to that insert).
    pub fn get(&self, id: &Id) -> Option<&Op> {
        let tree = self.authors.get(&id.author)?;
        let h = tree.left_sib(&id.seq)?;
        let op = tree.value(h);
        if op.id() == *id || id.seq <= op.max_id().seq {
            Some(op)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    /// Greatest op id strictly below `id` for the same author.
    pub fn next_smallest(&self, id: &Id) -> Option<Id> {
        if id.seq <= 0 {
            return None;
        }
        let tree = self.authors.get(&id.author)?;
        let h = tree.left_sib(&(id.seq - 1))?;
        Some(tree.value(h).id())
    }

    /// All ops sorted by `(seq, author)`.
    pub fn sorted_ops(&self) -> Vec<Op> {
        let mut out: Vec<Op> = Vec::with_capacity(self.len());
        for tree in self.authors.values() {
            out.extend(tree.iter().map(|(_, op)| op.clone()));
        }
        out.sort_by_key(Op::id);
        out
    }

    pub fn clear(&mut self) {
        self.authors.clear();
        self.max_ids.clear();
    }
}

/// Quarantine for operations whose causal dependencies are missing.
///
/// Retried by full reload, never in place: the document re-merges its
/// whole export (log plus quarantine) in Lamport order, at which point an
/// op whose dependency has since arrived succeeds.
#[derive(Debug, Clone, Default)]
pub struct FailedOps {
    ops: AvlMap<Id, Op>,
}

impl FailedOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Record a failed op. A failing bundle replaces any of its members
    /// recorded individually.
    pub fn put(&mut self, op: &Op) {
        if let Op::Multi(m) = op {
            for member in &m.ops {
                self.ops.remove(&member.id());
            }
        }
        self.ops.insert(op.id(), op.clone());
    }

    pub fn as_vec(&self) -> Vec<Op> {
        self.ops.iter().map(|(_, op)| op.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Side;
    use crate::op::{DeleteOp, InsertOp, MultiOp};

    fn insert(author: &str, seq: i64, text: &str) -> Op {
        Op::Insert(InsertOp {
            id: Id::new(author, seq),
            text: text.to_string(),
            parent_id: Id::none(),
            side: Side::Root,
        })
    }

    #[test]
    fn unit_ids_resolve_to_their_insert() {
        let mut log = OpLog::new();
        log.put(&insert("a", 0, "hello"));

        assert!(log.get_exact(&Id::new("a", 0)).is_some());
        assert!(log.get_exact(&Id::new("a", 3)).is_none());
        assert!(log.get(&Id::new("a", 3)).is_some());
        assert!(log.get(&Id::new("a", 5)).is_none());
        assert_eq!(log.max_ids().get("a"), Some(&4));
    }

    #[test]
    fn bundle_subsumes_members() {
        let del = Op::Delete(DeleteOp {
            id: Id::new("a", 5),
            target_id: Id::new("a", 0),
            span: 1,
        });
        let mut log = OpLog::new();
        log.put(&del);
        assert_eq!(log.len(), 1);

        let mut m = MultiOp::default();
        m.append(del);
        log.put(&Op::Multi(m));
        assert_eq!(log.len(), 1);
        assert!(matches!(log.get(&Id::new("a", 5)), Some(Op::Multi(_))));
    }

    #[test]
    fn next_smallest_steps_down() {
        let mut log = OpLog::new();
        log.put(&insert("a", 0, "x"));
        log.put(&insert("a", 1, "y"));
        log.put(&insert("a", 2, "z"));

        assert_eq!(log.next_smallest(&Id::new("a", 2)), Some(Id::new("a", 1)));
        assert_eq!(log.next_smallest(&Id::new("a", 0)), None);
    }
}
