//! Content addresses: causal cuts over the operation history.
//!
//! An address is a per-author high-water-mark vector plus the unit-id
//! bounds it was taken over. It answers one question — is this id
//! included as of that point in history — and everything else (filtered
//! reconstruction, rewind, scrubbing) is built on that answer.

use std::collections::HashMap;

use crate::doc::Doc;
use crate::error::{DocError, Result};
use crate::id::{Id, Side};
use crate::op::{DeleteOp, InsertOp, MultiOp, Op, ShowOp};
use crate::utf16::{str_to_utf16, utf16_to_str};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentAddress {
    pub start_id: Id,
    pub end_id: Id,
    pub max_ids: HashMap<String, i64>,
}

impl ContentAddress {
    pub fn new() -> Self {
        Self::default()
    }

    /// An id is contained iff its author has a mark at or above it.
    /// An unseen author contains nothing.
    pub fn contains(&self, id: &Id) -> bool {
        match self.max_ids.get(&id.author) {
            Some(max) => id.seq <= *max,
            None => false,
        }
    }

    /// Raise the author's mark to at least `id.seq`.
    pub fn add_id(&mut self, id: &Id) {
        let entry = self.max_ids.entry(id.author.clone()).or_insert(id.seq);
        if id.seq > *entry {
            *entry = id.seq;
        }
    }

    /// The author's mark as an id; seq -1 when unseen.
    pub fn max_author_id(&self, author: &str) -> Id {
        match self.max_ids.get(author) {
            Some(seq) => Id::new(author, *seq),
            None => Id::new(author, -1),
        }
    }

    /// Largest mark across authors in `(seq, author)` order.
    pub fn max_id(&self) -> Option<Id> {
        self.max_ids
            .iter()
            .map(|(a, s)| Id::new(a.clone(), *s))
            .max()
    }

    /// Smallest mark across authors in `(seq, author)` order.
    pub fn min_id(&self) -> Option<Id> {
        self.max_ids
            .iter()
            .map(|(a, s)| Id::new(a.clone(), *s))
            .min()
    }

    pub fn sorted_ids(&self, reverse: bool) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .max_ids
            .iter()
            .map(|(a, s)| Id::new(a.clone(), *s))
            .collect();
        ids.sort();
        if reverse {
            ids.reverse();
        }
        ids
    }

    /// Every mark at the floor: the address contains nothing.
    pub fn is_min(&self) -> bool {
        self.max_ids.values().all(|s| *s == -1)
    }

    /// Every mark at the "everything" sentinel.
    pub fn is_max(&self) -> bool {
        self.max_ids.values().all(|s| *s == i64::MAX)
    }

    /// Restriction of the address to the given authors.
    pub fn select_authors(&self, authors: &[&str]) -> Self {
        let mut out = self.clone();
        out.max_ids = authors
            .iter()
            .filter_map(|a| self.max_ids.get(*a).map(|s| (a.to_string(), *s)))
            .collect();
        out
    }
}

impl Doc {
    /// Address over the whole document containing nothing.
    pub fn get_empty_address(&self) -> Result<ContentAddress> {
        Ok(ContentAddress {
            start_id: self.first_tot_id()?,
            end_id: self.last_tot_id()?,
            max_ids: HashMap::new(),
        })
    }

    /// Address over the whole document containing everything logged so
    /// far: the log's running per-author maxima.
    pub fn get_full_address(&self) -> Result<ContentAddress> {
        Ok(ContentAddress {
            start_id: self.first_tot_id()?,
            end_id: self.last_tot_id()?,
            max_ids: self.log.max_ids().clone(),
        })
    }

    /// Address over `[start_id, end_id]`: the maximal id touching each
    /// unit, including its history markers and any format operations
    /// overlapping the span.
    pub fn get_address(&self, start_id: &Id, end_id: &Id) -> Result<ContentAddress> {
        self.rope.set_cache();
        let out = self.get_address_inner(start_id, end_id);
        self.rope.del_cache();
        out
    }

    fn get_address_inner(&self, start_id: &Id, end_id: &Id) -> Result<ContentAddress> {
        let mut address = ContentAddress {
            start_id: start_id.clone(),
            end_id: end_id.clone(),
            max_ids: HashMap::new(),
        };

        let tot = self.rope.get_tot_between(&self.arena, start_id, end_id)?;
        for id in &tot.ids {
            address.add_id(id);
            if let Some(markers) = self.history.markers(id) {
                for (marker_id, _) in markers.iter() {
                    address.add_id(marker_id);
                }
            }
        }

        let (_, start_ix) = self.get_index(start_id)?;
        let (_, end_ix) = self.get_index(end_id)?;
        self.visit_format_ops_overlapping(start_ix, end_ix, |id| address.add_id(id))?;

        Ok(address)
    }

    /// Call `f` with the id of every logged format op whose span overlaps
    /// `[start_ix, end_ix]` in total coordinates. The core holds no
    /// interval index over formats, so this scans the log.
    pub(crate) fn visit_format_ops_overlapping<F: FnMut(&Id)>(
        &self,
        start_ix: usize,
        end_ix: usize,
        mut f: F,
    ) -> Result<()> {
        fn visit<F: FnMut(&Id)>(
            doc: &Doc,
            op: &Op,
            start_ix: usize,
            end_ix: usize,
            f: &mut F,
        ) -> Result<()> {
            match op {
                Op::Format(fop) => {
                    let Ok((_, f_start)) = doc.get_index(&fop.start_id) else {
                        return Ok(());
                    };
                    let Ok((_, f_end)) = doc.get_index(&fop.end_id) else {
                        return Ok(());
                    };
                    if f_end >= start_ix && f_start <= end_ix {
                        f(&fop.id);
                    }
                    Ok(())
                }
                Op::Multi(m) => {
                    for member in &m.ops {
                        visit(doc, member, start_ix, end_ix, f)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        for (_, tree) in self.log.author_ops() {
            for (_, op) in tree.iter() {
                visit(self, op, start_ix, end_ix, &mut f)?;
            }
        }
        Ok(())
    }

    /// Does every id the address references resolve in the log?
    pub fn valid_address(&self, addr: &ContentAddress) -> bool {
        if !self.contains_id(&addr.start_id) || !self.contains_id(&addr.end_id) {
            return false;
        }
        addr.max_ids
            .iter()
            .all(|(a, s)| self.contains_id(&Id::new(a.clone(), *s)))
    }

    /// Standalone replica as of the cut, built by replaying the log in
    /// Lamport order and stopping at the first excluded operation.
    pub fn old_doc_at(&self, addr: &ContentAddress) -> Result<Doc> {
        let mut out = Doc::new(self.author.clone());
        let trees: Vec<_> = self.log.author_ops().map(|(_, t)| t).collect();

        let mut fail: Option<DocError> = None;
        copse::merge_visit(&trees, |_, op| {
            if !addr.contains(&op.id()) {
                return false;
            }
            if let Err(err) = out.merge_op(op) {
                fail = Some(err);
                return false;
            }
            true
        });
        match fail {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Standalone replica of exactly the address: operations straddling
    /// the boundary are trimmed to the covered part, with parent links
    /// renormalized so the result has no dangling references.
    pub fn doc_at(&self, addr: &ContentAddress) -> Result<Doc> {
        self.rope.set_cache();
        let out = self.doc_at_inner(addr);
        self.rope.del_cache();
        out
    }

    fn doc_at_inner(&self, addr: &ContentAddress) -> Result<Doc> {
        let (_, ca_start) = self.get_index(&addr.start_id)?;
        let (_, ca_end) = self.get_index(&addr.end_id)?;

        let mut ops: Vec<Op> = Vec::new();
        for (author, tree) in self.log.author_ops() {
            if !addr.max_ids.contains_key(author) {
                continue;
            }
            for (_, op) in tree.iter() {
                let iid = op.id();
                // The tree is in seq order: everything past the mark is
                // past the cut.
                if addr.max_ids.get(&iid.author).copied().unwrap_or(0) < iid.seq {
                    break;
                }
                ops.extend(self.trim_filter_op(ca_start, ca_end, addr, op)?);
            }
        }

        // Seq order gives breadth-first insertion: parents before
        // children.
        ops.sort_by_key(|op| op.id().seq);

        let mut out = Doc::new(self.author.clone());
        for op in &ops {
            out.merge_op(op)?;
        }
        Ok(out)
    }

    /// Clip `op` to `[ca_start, ca_end]` (total coordinates). An insert
    /// loses trimmed units and is re-rooted when its attachment edge is
    /// cut off; delete/show spans shrink; format bounds clamp; bundles
    /// trim member-wise. Returns nothing when the op lies fully outside.
    fn trim_filter_op(
        &self,
        ca_start: usize,
        ca_end: usize,
        addr: &ContentAddress,
        op: &Op,
    ) -> Result<Vec<Op>> {
        match op {
            Op::Insert(ins) => {
                let mut id = ins.id.clone();
                let mut units = str_to_utf16(&ins.text);
                let mut side = ins.side;

                let (_, mut start_ix) = self.get_index(&id)?;
                let end_id = id.offset(units.len() as i64 - 1);
                let (_, mut end_ix) = self.get_index(&end_id)?;
                if end_ix < ca_start || ca_end < start_ix {
                    return Ok(Vec::new());
                }

                if start_ix < ca_start {
                    while start_ix < ca_start {
                        id = id.offset(1);
                        units.remove(0);
                        start_ix = self.get_index(&id)?.1;
                    }
                    if side == Side::Right {
                        side = Side::Root;
                    }
                }

                if ca_end < end_ix {
                    let mut end_id = end_id;
                    while ca_end < end_ix {
                        units.pop();
                        end_id = end_id.offset(-1);
                        end_ix = self.get_index(&end_id)?.1;
                    }
                    if side == Side::Left {
                        side = Side::Root;
                    }
                }

                let mut parent_id = ins.parent_id.clone();
                if self.contains_id(&parent_id) {
                    let (_, parent_ix) = self.get_index(&parent_id)?;
                    if parent_ix < ca_start || ca_end < parent_ix {
                        side = Side::Root;
                    }
                }

                if units.is_empty() {
                    return Ok(Vec::new());
                }
                if side == Side::Root {
                    // The creation key of a re-rooted insert is its
                    // position inside the cut.
                    parent_id = Id::new("", start_ix as i64);
                }

                Ok(vec![Op::Insert(InsertOp {
                    id,
                    text: utf16_to_str(&units),
                    parent_id,
                    side,
                })])
            }
            Op::Delete(del) => {
                match self.trim_span(ca_start, ca_end, &del.target_id, del.span)? {
                    Some((target_id, span)) => Ok(vec![Op::Delete(DeleteOp {
                        id: del.id.clone(),
                        target_id,
                        span,
                    })]),
                    None => Ok(Vec::new()),
                }
            }
            Op::Show(show) => {
                match self.trim_span(ca_start, ca_end, &show.target_id, show.span)? {
                    Some((target_id, span)) => Ok(vec![Op::Show(ShowOp {
                        id: show.id.clone(),
                        target_id,
                        span,
                    })]),
                    None => Ok(Vec::new()),
                }
            }
            Op::Format(fop) => {
                let (_, f_start) = self.get_index(&fop.start_id)?;
                let (_, f_end) = self.get_index(&fop.end_id)?;
                if f_end < ca_start || ca_end < f_start {
                    return Ok(Vec::new());
                }
                let mut out = fop.clone();
                if f_start < ca_start {
                    out.start_id = addr.start_id.clone();
                }
                if f_end > ca_end {
                    out.end_id = Id::last();
                }
                Ok(vec![Op::Format(out)])
            }
            Op::Multi(m) => {
                let mut trimmed = MultiOp::default();
                for member in &m.ops {
                    trimmed
                        .ops
                        .extend(self.trim_filter_op(ca_start, ca_end, addr, member)?);
                }
                Ok(vec![Op::Multi(trimmed)])
            }
            Op::Rewind(_) | Op::Snapshot(_) => Ok(Vec::new()),
        }
    }

    /// Clip a delete/show span to the cut; `None` when fully outside.
    fn trim_span(
        &self,
        ca_start: usize,
        ca_end: usize,
        target_id: &Id,
        span: i64,
    ) -> Result<Option<(Id, i64)>> {
        let (_, mut start_ix) = self.get_index(target_id)?;
        if start_ix > ca_end {
            return Ok(None);
        }
        let end_id = target_id.offset(span - 1);
        let (_, mut end_ix) = self.get_index(&end_id)?;
        if end_ix < ca_start {
            return Ok(None);
        }

        let mut target = target_id.clone();
        let mut span = span;

        if start_ix < ca_start {
            for i in 1..span {
                let candidate = target_id.offset(i);
                start_ix = self.get_index(&candidate)?.1;
                if ca_start <= start_ix {
                    span -= i;
                    target = candidate;
                    break;
                }
            }
        }

        if end_ix > ca_end {
            for i in (0..span - 1).rev() {
                let candidate = target.offset(i);
                end_ix = self.get_index(&candidate)?.1;
                if end_ix <= ca_end {
                    span = i + 1;
                    break;
                }
            }
        }

        if end_ix < ca_start || ca_end < start_ix || span == 0 {
            return Ok(None);
        }
        Ok(Some((target, span)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_is_per_author_watermark() {
        let mut addr = ContentAddress::new();
        addr.add_id(&Id::new("a", 5));
        addr.add_id(&Id::new("a", 3));

        assert!(addr.contains(&Id::new("a", 5)));
        assert!(addr.contains(&Id::new("a", 0)));
        assert!(!addr.contains(&Id::new("a", 6)));
        assert!(!addr.contains(&Id::new("b", 0)));
    }

    #[test]
    fn min_max_sentinels() {
        let mut addr = ContentAddress::new();
        assert!(addr.is_min() && addr.is_max());

        addr.max_ids.insert("a".to_string(), -1);
        assert!(addr.is_min());
        assert!(!addr.is_max());

        addr.max_ids.insert("a".to_string(), i64::MAX);
        assert!(addr.is_max());
        assert!(addr.contains(&Id::new("a", 1 << 40)));
    }

    #[test]
    fn select_authors_restricts() {
        let mut addr = ContentAddress::new();
        addr.add_id(&Id::new("a", 1));
        addr.add_id(&Id::new("b", 2));

        let only_a = addr.select_authors(&["a", "missing"]);
        assert!(only_a.contains(&Id::new("a", 1)));
        assert!(!only_a.contains(&Id::new("b", 2)));
    }
}
