//! The document: one replica's full state and the merge engine.
//!
//! A `Doc` is a single-threaded owned value; callers serialize access to
//! one instance. Local edits mint identifiers from the document clock,
//! mutate the fugue tree and rope in place, and append to the log. Remote
//! operations come through [`Doc::merge_op`], which deduplicates by id,
//! dispatches by kind, and quarantines operations whose causal
//! dependencies have not arrived yet. The final state is a pure function
//! of the set of successfully merged operations, independent of order.

use rand::Rng;

use crate::error::{DocError, Result, Visit};
use crate::history::{CharHistory, Marker};
use crate::id::{Id, Side};
use crate::node::{FugueRef, NodeArena};
use crate::op::{DeleteOp, FormatOp, InsertOp, MultiOp, Op, SerializedDoc, ShowOp, SnapshotOp};
use crate::oplog::{FailedOps, OpLog};
use crate::rope::Rope;
use crate::scrub::ScrubState;
use crate::undo::UndoState;
use crate::utf16::{
    is_high_surrogate, is_low_surrogate, is_valid_utf16, str_to_utf16, utf16_to_str,
};

#[derive(Debug)]
pub struct Doc {
    pub(crate) author: String,
    pub(crate) vis_size: usize,
    pub(crate) tot_size: usize,
    pub(crate) clock: i64,
    pub(crate) arena: NodeArena,
    pub(crate) roots: Vec<FugueRef>,
    /// Creation keys of the root forest: the seq of the position each
    /// root replaced. Forest order is by this key, not arrival order.
    pub(crate) root_seqs: Vec<i64>,
    pub(crate) rope: Rope,
    pub(crate) log: OpLog,
    pub(crate) failed: FailedOps,
    pub(crate) history: CharHistory,
    pub(crate) undo: Option<UndoState>,
    pub(crate) scrub: Option<ScrubState>,
}

/// Random replica identifier in the style editor clients mint.
pub fn random_author() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..7)
        .map(|i| {
            if i == 4 {
                '-'
            } else {
                CHARSET[rng.gen_range(0..CHARSET.len())] as char
            }
        })
        .collect()
}

impl Doc {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            vis_size: 0,
            tot_size: 0,
            clock: 0,
            arena: NodeArena::new(),
            roots: Vec::new(),
            root_seqs: Vec::new(),
            rope: Rope::new(),
            log: OpLog::new(),
            failed: FailedOps::new(),
            history: CharHistory::new(),
            undo: None,
            scrub: None,
        }
    }

    /// New document with the editor seed: an anchor character that is
    /// immediately tombstoned plus one trailing newline, so the visible
    /// text starts as `"\n"` and every position has a neighbor to attach
    /// to.
    pub fn new_seeded(author: impl Into<String>) -> Self {
        let mut doc = Self::new(author);
        let seed = [
            Op::Insert(InsertOp {
                id: Id::root(),
                text: "x".to_string(),
                parent_id: Id::new("", 0),
                side: Side::Root,
            }),
            Op::Insert(InsertOp {
                id: Id::last(),
                text: "\n".to_string(),
                parent_id: Id::root(),
                side: Side::Right,
            }),
            Op::Delete(DeleteOp {
                id: Id::new("q", 2),
                target_id: Id::root(),
                span: 1,
            }),
        ];
        for op in seed {
            doc.merge_op(&op).expect("seed ops always apply");
        }
        doc
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = author.into();
    }

    pub fn vis_size(&self) -> usize {
        self.vis_size
    }

    pub fn tot_size(&self) -> usize {
        self.tot_size
    }

    pub fn clock(&self) -> i64 {
        self.clock
    }

    /// Mint the next local id, advancing the clock by `len`.
    pub fn next_id(&mut self, len: i64) -> Id {
        let id = Id::new(self.author.clone(), self.clock);
        self.clock += len;
        id
    }

    /// Absorb a remote id: every future local id is causally after it.
    pub(crate) fn observe_id(&mut self, id: &Id, len: i64) {
        self.clock = self.clock.max(id.seq + len);
    }

    /// Back to the empty document, keeping the author.
    pub fn reset(&mut self) {
        let author = std::mem::take(&mut self.author);
        *self = Self::new(author);
    }

    /// Rebuild from scratch out of this document's own export. This is
    /// the retry path for quarantined operations: once their dependencies
    /// are in the replay set, they apply.
    pub fn reload(&mut self) {
        let ops = self.to_ops();
        self.reset();
        for op in &ops {
            if let Err(err) = self.merge_op(op) {
                tracing::warn!(op = %op.id(), %err, "op failed during reload");
            }
        }
    }

    /// Every logged and quarantined operation, sorted by `(seq, author)`.
    pub fn to_ops(&self) -> Vec<Op> {
        let mut out = self.log.sorted_ops();
        out.extend(self.failed.as_vec());
        out.sort_by_key(Op::id);
        out
    }

    pub fn failed_ops(&self) -> Vec<Op> {
        self.failed.as_vec()
    }

    /// Is `id` known to the log (unit ids resolve to their insert)?
    pub fn contains_id(&self, id: &Id) -> bool {
        self.log.contains(id)
    }

    // ------------------------------------------------------------------
    // Text and position queries
    // ------------------------------------------------------------------

    pub fn text(&self) -> String {
        if self.tot_size == 0 {
            return String::new();
        }
        let first = match self.rope.get_tot_id(&self.arena, 0) {
            Ok(id) => id,
            Err(_) => return String::new(),
        };
        let mut out: Vec<u16> = Vec::with_capacity(self.vis_size);
        let _ = self.rope.walk_right(&self.arena, &first, |f| {
            for (_, c, del) in self.arena.units(f) {
                if !del {
                    out.push(c);
                }
            }
            Ok(Visit::Continue)
        });
        utf16_to_str(&out)
    }

    /// All text including tombstones.
    pub fn tot_text(&self) -> String {
        if self.tot_size == 0 {
            return String::new();
        }
        let first = match self.rope.get_tot_id(&self.arena, 0) {
            Ok(id) => id,
            Err(_) => return String::new(),
        };
        let mut out: Vec<u16> = Vec::with_capacity(self.tot_size);
        let _ = self.rope.walk_right(&self.arena, &first, |f| {
            for (_, c, _) in self.arena.units(f) {
                out.push(c);
            }
            Ok(Visit::Continue)
        });
        utf16_to_str(&out)
    }

    /// Tombstone bitmap in total order; pairs with [`Doc::tot_text`] when
    /// comparing replica states.
    pub fn tombstones(&self) -> Vec<bool> {
        if self.tot_size == 0 {
            return Vec::new();
        }
        let first = match self.rope.get_tot_id(&self.arena, 0) {
            Ok(id) => id,
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::with_capacity(self.tot_size);
        let _ = self.rope.walk_right(&self.arena, &first, |f| {
            out.extend(self.arena.node(f).is_deleted.iter().copied());
            Ok(Visit::Continue)
        });
        out
    }

    pub fn get_char(&self, vis_ix: usize) -> Result<u16> {
        let (vis_offset, leaf) = self.rope.get_node(&self.arena, vis_ix)?;
        let f = self.rope.leaf_of(leaf).expect("leaf");
        let tot_offset = self.arena.node(f).tot_offset(vis_offset)?;
        Ok(self.arena.node(f).text[tot_offset])
    }

    /// Code unit at `id`; an error if the unit is tombstoned.
    pub fn get_char_by_id(&self, id: &Id) -> Result<u16> {
        let (_, f) = self
            .rope
            .index
            .get(id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let n = self.arena.node(f);
        let tot = (id.seq - n.id.seq) as usize;
        if n.is_deleted[tot] {
            return Err(DocError::NotInRope(id.clone()));
        }
        Ok(n.text[tot])
    }

    /// Code unit at `id`, tombstoned or not.
    pub fn get_tot_char_by_id(&self, id: &Id) -> Result<u16> {
        let (_, f) = self
            .rope
            .index
            .get(id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let n = self.arena.node(f);
        Ok(n.text[(id.seq - n.id.seq) as usize])
    }

    pub fn first_id(&self) -> Result<Id> {
        self.rope.get_vis_id(&self.arena, 0)
    }

    pub fn last_id(&self) -> Result<Id> {
        if self.vis_size == 0 {
            return Err(DocError::EmptyDocument);
        }
        self.rope.get_vis_id(&self.arena, self.vis_size - 1)
    }

    pub fn first_tot_id(&self) -> Result<Id> {
        self.rope.get_tot_id(&self.arena, 0)
    }

    pub fn last_tot_id(&self) -> Result<Id> {
        if self.tot_size == 0 {
            return Err(DocError::EmptyDocument);
        }
        self.rope.get_tot_id(&self.arena, self.tot_size - 1)
    }

    pub fn is_deleted(&self, id: &Id) -> Result<bool> {
        self.rope.is_deleted(&self.arena, id)
    }

    pub fn get_index(&self, id: &Id) -> Result<(Option<usize>, usize)> {
        self.rope.get_index(&self.arena, id)
    }

    pub fn get_vis_id(&self, vis_ix: usize) -> Result<Id> {
        self.rope.get_vis_id(&self.arena, vis_ix)
    }

    pub fn get_tot_id(&self, tot_ix: usize) -> Result<Id> {
        self.rope.get_tot_id(&self.arena, tot_ix)
    }

    pub fn tot_left_of(&self, id: &Id) -> Result<Id> {
        self.rope.tot_left_of(&self.arena, id)
    }

    pub fn tot_right_of(&self, id: &Id) -> Result<Id> {
        self.rope.tot_right_of(&self.arena, id)
    }

    pub fn vis_left_of(&self, id: &Id) -> Result<Id> {
        self.rope.vis_left_of(&self.arena, id)
    }

    pub fn vis_right_of(&self, id: &Id) -> Result<Id> {
        self.rope.vis_right_of(&self.arena, id)
    }

    /// Scan visibly left from `id` (inclusive) for a unit satisfying
    /// `pred`; `None` when the left edge is reached first.
    pub fn vis_scan_left_of<F: Fn(u16) -> bool>(&self, id: &Id, pred: F) -> Result<Option<Id>> {
        let mut cur = id.clone();
        if self.is_deleted(&cur)? {
            match self.vis_left_of(&cur) {
                Ok(next) => cur = next,
                Err(DocError::NoLeftVisSibling(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        loop {
            if pred(self.get_char_by_id(&cur)?) {
                return Ok(Some(cur));
            }
            match self.vis_left_of(&cur) {
                Ok(next) => cur = next,
                Err(DocError::NoLeftVisSibling(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Scan visibly right from `id` (inclusive) for a unit satisfying
    /// `pred`.
    pub fn vis_scan_right_of<F: Fn(u16) -> bool>(&self, id: &Id, pred: F) -> Result<Option<Id>> {
        let mut cur = id.clone();
        if self.is_deleted(&cur)? {
            match self.vis_right_of(&cur) {
                Ok(next) => cur = next,
                Err(DocError::NoRightVisSibling(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        loop {
            if pred(self.get_char_by_id(&cur)?) {
                return Ok(Some(cur));
            }
            match self.vis_right_of(&cur) {
                Ok(next) => cur = next,
                Err(DocError::NoRightVisSibling(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Insert `text` at visible position `vis_ix`, returning the minted
    /// operation.
    pub fn insert(&mut self, vis_ix: usize, text: &str) -> Result<InsertOp> {
        self.undo = None;

        let units = str_to_utf16(text);
        if !is_valid_utf16(&units) {
            return Err(DocError::InvalidUtf16);
        }
        if vis_ix > self.vis_size {
            return Err(DocError::OutOfBounds {
                ix: vis_ix,
                size: self.vis_size,
            });
        }
        if units.is_empty() {
            return Err(DocError::EmptyText);
        }
        let len = units.len();

        if self.roots.is_empty() {
            // Completely empty document.
            let id = self.next_id(len as i64);
            let node = self.arena.alloc(id.clone(), units, Side::Root, None);
            self.roots.push(node);
            self.root_seqs.push(0);
            self.vis_size += len;
            self.tot_size += len;
            self.rope.insert_with_ix(&self.arena, 0, node)?;

            let op = InsertOp {
                id,
                text: text.to_string(),
                parent_id: Id::new("", 0),
                side: Side::Root,
            };
            self.log.put(&Op::Insert(op.clone()));
            return Ok(op);
        }

        if self.vis_size == 0 {
            // Only tombstones remain: attach right of the first one.
            let (_, rope_ref) = self.rope.get_tot_node(&self.arena, 0)?;
            let sib = self.rope.leaf_of(rope_ref).expect("leaf");
            let id = self.next_id(len as i64);
            let node = self.arena.alloc(id.clone(), units, Side::Root, None);
            self.arena.insert_right(sib, node);
            self.rope.insert(&self.arena, node)?;

            let op = InsertOp {
                id,
                text: text.to_string(),
                parent_id: self.arena.adjusted_parent_id(node),
                side: self.arena.node(node).side,
            };
            self.vis_size += len;
            self.tot_size += len;
            self.log.put(&Op::Insert(op.clone()));
            return Ok(op);
        }

        if vis_ix == 0 {
            // Left of the first visible unit.
            let (_, rope_ref) = self.rope.get_node(&self.arena, 0)?;
            let sib = self.rope.leaf_of(rope_ref).expect("leaf");
            let id = self.next_id(len as i64);
            let node = self.arena.alloc(id.clone(), units, Side::Root, None);
            self.arena.insert_left(sib, node);
            self.rope.insert(&self.arena, node)?;

            let op = InsertOp {
                id,
                text: text.to_string(),
                parent_id: self.arena.adjusted_parent_id(node),
                side: self.arena.node(node).side,
            };
            self.vis_size += len;
            self.tot_size += len;
            self.log.put(&Op::Insert(op.clone()));
            return Ok(op);
        }

        // Right of the unit at vis_ix - 1, splitting its run if the
        // insertion point falls inside it.
        let (vis_offset, rope_ref) = self.rope.get_node(&self.arena, vis_ix - 1)?;
        let sib = self.rope.leaf_of(rope_ref).expect("leaf");
        let tot_offset = self.arena.node(sib).tot_offset(vis_offset)?;

        if let Some(right) = self.arena.split_after(sib, tot_offset)? {
            self.rope.update_weight(&self.arena, rope_ref);
            self.rope.insert(&self.arena, right)?;
        }

        let id = self.next_id(len as i64);
        let sib_id = self.arena.node(sib).id.clone();
        let sib_len = self.arena.node(sib).len() as i64;

        if sib_id.author == id.author && sib_id.seq + sib_len == id.seq {
            // Sequential typing: extend the run instead of growing the tree.
            self.arena.append(sib, &units);
            self.rope.update_weight(&self.arena, rope_ref);
            self.vis_size += len;
            self.tot_size += len;

            let op = InsertOp {
                id: id.clone(),
                text: text.to_string(),
                parent_id: id.offset(-1),
                side: Side::Right,
            };
            self.log.put(&Op::Insert(op.clone()));
            return Ok(op);
        }

        let node = self.arena.alloc(id.clone(), units, Side::Root, None);
        self.arena.insert_right(sib, node);
        self.rope.insert(&self.arena, node)?;

        let op = InsertOp {
            id,
            text: text.to_string(),
            parent_id: self.arena.adjusted_parent_id(node),
            side: self.arena.node(node).side,
        };
        self.vis_size += len;
        self.tot_size += len;
        self.log.put(&Op::Insert(op.clone()));
        Ok(op)
    }

    /// Insert immediately to the right of the unit `id`, tombstoned or
    /// not. Used by editing layers that hold stable ids rather than
    /// positions.
    pub fn insert_right_of(&mut self, id: &Id, text: &str) -> Result<InsertOp> {
        let units = str_to_utf16(text);
        if !is_valid_utf16(&units) {
            return Err(DocError::InvalidUtf16);
        }
        if units.is_empty() {
            return Err(DocError::EmptyText);
        }
        let len = units.len();

        let (rope_ref, sib) = self
            .rope
            .index
            .get(id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let tot_offset = (id.seq - self.arena.node(sib).id.seq) as usize;

        if let Some(right) = self.arena.split_after(sib, tot_offset)? {
            self.rope.update_weight(&self.arena, rope_ref);
            self.rope.insert(&self.arena, right)?;
        }

        let new_id = self.next_id(len as i64);
        let node = self.arena.alloc(new_id.clone(), units, Side::Root, None);
        self.arena.insert_right(sib, node);
        self.rope.insert(&self.arena, node)?;
        self.vis_size += len;
        self.tot_size += len;

        let op = InsertOp {
            id: new_id,
            text: text.to_string(),
            parent_id: self.arena.adjusted_parent_id(node),
            side: self.arena.node(node).side,
        };
        self.log.put(&Op::Insert(op.clone()));
        Ok(op)
    }

    /// Tombstone `len` visible units starting at `vis_ix`. The span
    /// widens to whole surrogate pairs. Returns one delete per touched
    /// run, bundled when the span crosses runs.
    pub fn delete(&mut self, vis_ix: usize, len: usize) -> Result<Op> {
        self.undo = None;

        if vis_ix + len > self.vis_size {
            return Err(DocError::OutOfBounds {
                ix: vis_ix + len,
                size: self.vis_size,
            });
        }
        if len == 0 {
            return Err(DocError::EmptyText);
        }

        let mut vis_ix = vis_ix;
        let mut len = len;
        if is_low_surrogate(self.get_char(vis_ix)?) {
            vis_ix -= 1;
        }
        if is_high_surrogate(self.get_char(vis_ix + len - 1)?) {
            len += 1;
        }

        let (vis_offset, mut rope_ref) = self.rope.get_node(&self.arena, vis_ix)?;
        let mut fugue = self.rope.leaf_of(rope_ref).expect("leaf");
        let mut tot_offset = self.arena.node(fugue).tot_offset(vis_offset)?;

        let mut mop = MultiOp::default();
        let mut remaining = len;
        loop {
            let id = self.next_id(1);
            let target_id = self.arena.node(fugue).unit_id(tot_offset);
            let mut span = 0i64;

            let node_len = self.arena.node(fugue).len();
            for i in tot_offset..node_len {
                span += 1;
                if !self.arena.node(fugue).is_deleted[i] {
                    self.arena.node_mut(fugue).is_deleted[i] = true;
                    let unit = self.arena.node(fugue).unit_id(i);
                    self.history.add(
                        &unit,
                        Marker {
                            id: id.clone(),
                            is_del: true,
                        },
                    );
                    self.vis_size -= 1;
                    remaining -= 1;
                    if remaining == 0 {
                        break;
                    }
                }
            }

            mop.append(Op::Delete(DeleteOp {
                id,
                target_id,
                span,
            }));
            self.rope.update_weight(&self.arena, rope_ref);

            if remaining == 0 {
                let op = mop.flatten().expect("at least one delete");
                self.log.put(&op);
                return Ok(op);
            }

            rope_ref = self.rope.right_vis_sibling(&self.arena, rope_ref)?;
            fugue = self.rope.leaf_of(rope_ref).expect("leaf");
            tot_offset = 0;
        }
    }

    /// Flip one unit's tombstone bit to match `is_del`, maintaining sizes
    /// and rope weights.
    pub(crate) fn mark_char_del(&mut self, id: &Id, is_del: bool) -> Result<()> {
        let (rope_ref, fugue) = self
            .rope
            .index
            .get(id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let tot = (id.seq - self.arena.node(fugue).id.seq) as usize;
        if self.arena.node(fugue).is_deleted[tot] != is_del {
            if is_del {
                self.vis_size -= 1;
            } else {
                self.vis_size += 1;
            }
            self.arena.node_mut(fugue).is_deleted[tot] = is_del;
            self.rope.update_weight(&self.arena, rope_ref);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Merge engine
    // ------------------------------------------------------------------

    /// Merge one operation. Idempotent: re-merging a logged id is a
    /// no-op. A structurally inapplicable operation is quarantined and
    /// the error returned; the live structures stay untouched by it.
    pub fn merge_op(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Snapshot(s) => self.snapshot_op(s),
            Op::Multi(m) => {
                if m.ops.is_empty() {
                    return Ok(());
                }
                if let Some(Op::Multi(prev)) = self.log.get_exact(&op.id()) {
                    if prev.ops.len() != m.ops.len() {
                        return Err(DocError::MultiLengthMismatch {
                            id: op.id(),
                            have: prev.ops.len(),
                            got: m.ops.len(),
                        });
                    }
                    return Ok(());
                }
                for member in &m.ops {
                    if let Err(err) = self.merge_member(member) {
                        self.log.remove(op);
                        self.failed.put(op);
                        return Err(err);
                    }
                }
                self.log.put(op);
                Ok(())
            }
            _ => match self.merge_member(op) {
                Ok(()) => {
                    self.log.put(op);
                    Ok(())
                }
                Err(err) => {
                    self.log.remove(op);
                    self.failed.put(op);
                    Err(err)
                }
            },
        }
    }

    fn merge_member(&mut self, op: &Op) -> Result<()> {
        if self.log.get_exact(&op.id()).is_some() {
            return Ok(());
        }
        match op {
            Op::Insert(o) => self.insert_op(o),
            Op::Delete(o) => self.delete_op(o),
            Op::Show(o) => self.show_op(o),
            Op::Format(o) => self.format_op(o),
            Op::Rewind(o) => self.rewind_op(o),
            Op::Multi(_) => Err(DocError::NestedMulti),
            Op::Snapshot(_) => Err(DocError::NestedSnapshot),
        }
    }

    fn insert_op(&mut self, op: &InsertOp) -> Result<()> {
        if self.rope.index.get(&op.id, &self.arena).is_some() {
            return Ok(());
        }
        if op.side == Side::Root {
            return self.insert_new_root(op);
        }

        let units = str_to_utf16(&op.text);
        let len = units.len();
        let Some((parent_rope, parent_fugue)) = self.rope.index.get(&op.parent_id, &self.arena)
        else {
            return Err(DocError::ParentNotFound(op.parent_id.clone()));
        };

        // Same-author continuation lands as an in-place append.
        if op.side == Side::Right
            && op.parent_id.author == op.id.author
            && op.parent_id.seq == op.id.seq - 1
        {
            self.arena.append(parent_fugue, &units);
            self.observe_id(&op.id, len as i64);
            self.vis_size += len;
            self.tot_size += len;
            self.rope.update_weight(&self.arena, parent_rope);
            return Ok(());
        }

        let tot_offset = (op.parent_id.seq - self.arena.node(parent_fugue).id.seq) as usize;

        match op.side {
            Side::Right => {
                if let Some(right) = self.arena.split_after(parent_fugue, tot_offset)? {
                    self.rope.update_weight(&self.arena, parent_rope);
                    self.rope.insert(&self.arena, right)?;
                }
                let node = self
                    .arena
                    .alloc(op.id.clone(), units, Side::Right, Some(parent_fugue));
                self.arena.insert_child(parent_fugue, Side::Right, node);
                self.rope.insert(&self.arena, node)?;
            }
            Side::Left => {
                let attach = if tot_offset == 0 {
                    parent_fugue
                } else {
                    match self.arena.split_after(parent_fugue, tot_offset - 1)? {
                        Some(right) => {
                            self.rope.update_weight(&self.arena, parent_rope);
                            self.rope.insert(&self.arena, right)?;
                            right
                        }
                        None => parent_fugue,
                    }
                };
                let node = self
                    .arena
                    .alloc(op.id.clone(), units, Side::Left, Some(attach));
                self.arena.insert_child(attach, Side::Left, node);
                self.rope.insert(&self.arena, node)?;
            }
            Side::Root => unreachable!("handled above"),
        }

        self.observe_id(&op.id, len as i64);
        self.vis_size += len;
        self.tot_size += len;
        Ok(())
    }

    /// A root insert has no surviving neighbor; its slot in the forest is
    /// found by binary search on the creation keys, so replicas applying
    /// concurrent root inserts in any order produce the same forest.
    fn insert_new_root(&mut self, op: &InsertOp) -> Result<()> {
        let units = str_to_utf16(&op.text);
        let len = units.len();
        let new_root = self
            .arena
            .alloc(op.id.clone(), units, Side::Root, None);

        let seq_ix = self
            .root_seqs
            .partition_point(|s| *s < op.parent_id.seq);

        let rope_ix = if self.root_seqs.is_empty() {
            0
        } else if seq_ix < self.root_seqs.len() {
            let sib = self.arena.leftmost(self.roots[seq_ix]);
            let (_, tot) = self.rope.get_index(&self.arena, &self.arena.node(sib).id)?;
            tot
        } else {
            let sib = self.arena.rightmost(self.roots[seq_ix - 1]);
            let (_, tot) = self.rope.get_index(&self.arena, &self.arena.node(sib).id)?;
            tot + 1
        };

        self.root_seqs.insert(seq_ix, op.parent_id.seq);
        self.roots.insert(seq_ix, new_root);
        self.rope.insert_with_ix(&self.arena, rope_ix, new_root)?;

        self.observe_id(&op.id, len as i64);
        self.vis_size += len;
        self.tot_size += len;
        Ok(())
    }

    fn delete_op(&mut self, op: &DeleteOp) -> Result<()> {
        let Some((mut rope_ref, mut fugue)) = self.rope.index.get(&op.target_id, &self.arena)
        else {
            return Err(DocError::ParentNotFound(op.target_id.clone()));
        };
        if self.tot_size == 0 {
            return Err(DocError::EmptyDocument);
        }

        let mut target = op.target_id.clone();
        let mut tot_offset = (target.seq - self.arena.node(fugue).id.seq) as usize;
        self.observe_id(&op.id, 1);

        for _ in 0..op.span {
            if tot_offset == self.arena.node(fugue).len() {
                // The span continues in the next split of the same run.
                self.rope.update_weight(&self.arena, rope_ref);
                let Some((r, f)) = self.rope.index.get(&target, &self.arena) else {
                    return Err(DocError::ParentNotFound(target));
                };
                rope_ref = r;
                fugue = f;
                tot_offset = 0;
            }

            self.history.add(
                &target,
                Marker {
                    id: op.id.clone(),
                    is_del: true,
                },
            );
            // Act only if this delete is the newest marker: a concurrent
            // show with a higher Lamport id wins.
            let winner = self.history.max(&target);
            if !self.arena.node(fugue).is_deleted[tot_offset] && winner.is_del {
                self.arena.node_mut(fugue).is_deleted[tot_offset] = true;
                self.vis_size -= 1;
            }

            tot_offset += 1;
            target = self.arena.node(fugue).unit_id(tot_offset);
        }

        self.rope.update_weight(&self.arena, rope_ref);
        Ok(())
    }

    fn show_op(&mut self, op: &ShowOp) -> Result<()> {
        let Some((mut rope_ref, mut fugue)) = self.rope.index.get(&op.target_id, &self.arena)
        else {
            return Err(DocError::ParentNotFound(op.target_id.clone()));
        };
        if self.tot_size == 0 {
            return Err(DocError::EmptyDocument);
        }

        let mut target = op.target_id.clone();
        let mut tot_offset = (target.seq - self.arena.node(fugue).id.seq) as usize;
        self.observe_id(&op.id, 1);

        for _ in 0..op.span {
            if tot_offset == self.arena.node(fugue).len() {
                self.rope.update_weight(&self.arena, rope_ref);
                let Some((r, f)) = self.rope.index.get(&target, &self.arena) else {
                    return Err(DocError::ParentNotFound(target));
                };
                rope_ref = r;
                fugue = f;
                tot_offset = 0;
            }

            self.history.add(
                &target,
                Marker {
                    id: op.id.clone(),
                    is_del: false,
                },
            );
            let winner = self.history.max(&target);
            if self.arena.node(fugue).is_deleted[tot_offset] && !winner.is_del {
                self.arena.node_mut(fugue).is_deleted[tot_offset] = false;
                self.vis_size += 1;
            }

            tot_offset += 1;
            target = self.arena.node(fugue).unit_id(tot_offset);
        }

        self.rope.update_weight(&self.arena, rope_ref);
        Ok(())
    }

    /// Format semantics live in the external formatting layer; the core
    /// logs the op and advances the clock so its id participates in
    /// addresses.
    fn format_op(&mut self, op: &FormatOp) -> Result<()> {
        self.observe_id(&op.id, 1);
        Ok(())
    }

    /// Replace this document's state with the snapshot payload.
    fn snapshot_op(&mut self, op: &SnapshotOp) -> Result<()> {
        self.apply_serialized(&op.document);
        Ok(())
    }

    /// Reset and replay a serialized document. Ops that fail to merge are
    /// quarantined and logged, not fatal.
    pub fn apply_serialized(&mut self, doc: &SerializedDoc) {
        self.reset();
        if doc.version.is_none() {
            tracing::info!("replaying legacy pre-versioning document");
        }
        for op in &doc.ops {
            if let Err(err) = self.merge_op(op) {
                tracing::warn!(op = %op.id(), %err, "op failed during deserialization");
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check every structural invariant: fugue parent/side links, rope
    /// weights/heights/balance, and the size counters.
    pub fn validate(&self) -> Result<()> {
        for &root in &self.roots {
            self.arena.validate_parent_side(root)?;
        }
        self.rope.validate(&self.arena)?;
        if self.rope.vis_size() != self.vis_size {
            return Err(DocError::Corrupt(format!(
                "vis size counter {} disagrees with rope {}",
                self.vis_size,
                self.rope.vis_size()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_author_shape() {
        let a = random_author();
        assert_eq!(a.len(), 7);
        assert_eq!(a.chars().nth(4), Some('-'));
    }
}
