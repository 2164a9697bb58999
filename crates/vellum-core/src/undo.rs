//! Rewind and the address-based undo/redo stack.
//!
//! Undo here is not "pop the last local op": it inverts the operation at
//! the undo address's high-water mark, trimmed to the undo window, and
//! steps the address down — so undo keeps working across merges from
//! other replicas. Rewind is the bulk form: visibility over a whole span
//! is recomputed directly from character history constrained to a cut,
//! and the emitted op carries the address that reverses it.

use crate::address::ContentAddress;
use crate::doc::Doc;
use crate::error::{DocError, Result};
use crate::history::Marker;
use crate::id::Id;
use crate::op::{DeleteOp, MultiOp, Op, RewindOp, ShowOp};
use crate::utf16::utf16_len;

#[derive(Debug, Default)]
pub struct UndoState {
    pub(crate) address: Option<ContentAddress>,
    pub(crate) redo_stack: Vec<Op>,
}

impl Doc {
    pub fn can_redo(&self) -> bool {
        match &self.undo {
            Some(state) => !state.redo_stack.is_empty(),
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        // The undo address degenerates to the seed ops alone once
        // everything else is undone.
        let state_good = match self.undo.as_ref().and_then(|s| s.address.as_ref()) {
            Some(addr) => {
                !(addr.max_ids.contains_key("root")
                    && addr.max_ids.contains_key("q")
                    && addr.max_ids.len() == 2)
            }
            None => true,
        };
        state_good && self.clock > 3
    }

    /// Undo the newest operation over the whole document.
    pub fn undo_doc(&mut self) -> Result<Option<Op>> {
        let first = self.first_tot_id()?;
        let last = self.last_tot_id()?;
        self.undo(&first, &last)
    }

    /// Undo the operation at the undo address's high-water mark, trimmed
    /// to `[start_id, end_id]`. Returns the applied inverse, or `None`
    /// when the stepped op fell entirely outside the window.
    pub fn undo(&mut self, start_id: &Id, end_id: &Id) -> Result<Option<Op>> {
        if !self.can_undo() {
            return Ok(None);
        }

        let need_address = self
            .undo
            .as_ref()
            .map(|s| s.address.is_none())
            .unwrap_or(true);
        if need_address {
            let addr = self.get_full_address()?;
            match self.undo.as_mut() {
                Some(state) => {
                    state.address = Some(addr);
                    state.redo_stack.clear();
                }
                None => {
                    self.undo = Some(UndoState {
                        address: Some(addr),
                        redo_stack: Vec::new(),
                    });
                }
            }
        }

        let mut addr = self
            .undo
            .as_ref()
            .and_then(|s| s.address.clone())
            .expect("address prepared above");
        let step = self.undo_next(start_id, end_id, &mut addr)?;
        if let Some(state) = self.undo.as_mut() {
            state.address = Some(addr);
        }

        let Some((undo_op, redo_op)) = step else {
            return Ok(None);
        };
        self.merge_op(&undo_op)?;
        if let Some(state) = self.undo.as_mut() {
            state.redo_stack.push(redo_op);
        }
        Ok(Some(undo_op))
    }

    /// Replay the most recently undone operation with fresh ids.
    pub fn redo(&mut self) -> Result<Option<Op>> {
        let Some(state) = self.undo.as_mut() else {
            return Ok(None);
        };
        let Some(item) = state.redo_stack.pop() else {
            return Ok(None);
        };
        // Next undo restarts from the tip.
        state.address = None;

        let ops = match item {
            Op::Multi(m) => m.ops,
            other => vec![other],
        };

        let mut mop = MultiOp::default();
        for op in ops.into_iter().rev() {
            match op {
                Op::Delete(mut d) => {
                    d.id = self.next_id(1);
                    mop.append(Op::Delete(d));
                }
                Op::Show(mut s) => {
                    s.id = self.next_id(1);
                    mop.append(Op::Show(s));
                }
                Op::Format(mut f) => {
                    f.id = self.next_id(1);
                    mop.append(Op::Format(f));
                }
                Op::Rewind(r) => {
                    mop.append(Op::Rewind(RewindOp {
                        id: self.next_id(1),
                        address: r.undo_address,
                        undo_address: r.address,
                    }));
                }
                other => {
                    return Err(DocError::Corrupt(format!(
                        "{} is not a redoable operation",
                        other.id()
                    )))
                }
            }
        }

        match mop.flatten() {
            Some(op) => {
                self.merge_op(&op)?;
                Ok(Some(op))
            }
            None => Ok(None),
        }
    }

    /// Step the address past its max op and produce that op's inverse
    /// pair `(undo, redo)`, trimmed to the window.
    fn undo_next(
        &mut self,
        start_id: &Id,
        end_id: &Id,
        addr: &mut ContentAddress,
    ) -> Result<Option<(Op, Op)>> {
        if addr.max_ids.is_empty() {
            return Ok(None);
        }

        let (_, start_ix) = self.get_index(start_id)?;
        let (_, end_ix) = self.get_index(end_id)?;

        let Some(cur_id) = addr.max_id() else {
            return Ok(None);
        };
        let op = self
            .log
            .get(&cur_id)
            .cloned()
            .ok_or(DocError::UnknownRequiredId(cur_id))?;

        let op_id = op.id();
        match self.log.next_smallest(&op_id) {
            Some(next) => {
                addr.max_ids.insert(op_id.author.clone(), next.seq);
            }
            None => {
                addr.max_ids.remove(&op_id.author);
            }
        }

        self.invert_op(&op, start_ix, end_ix)
    }

    /// Clip `[i_start, i_end]` (unit ids of one run) to the window's
    /// total positions; `None` when disjoint.
    fn trim_unit_span(
        &self,
        start_ix: usize,
        end_ix: usize,
        i_start: &Id,
        i_end: &Id,
    ) -> Result<Option<(Id, Id)>> {
        let (_, mut is_ix) = self.get_index(i_start)?;
        let (_, mut ie_ix) = self.get_index(i_end)?;
        if ie_ix < start_ix || end_ix < is_ix {
            return Ok(None);
        }

        let mut i_start = i_start.clone();
        let mut i_end = i_end.clone();
        while is_ix < start_ix {
            i_start = i_start.offset(1);
            is_ix = self.get_index(&i_start)?.1;
        }
        while end_ix < ie_ix {
            i_end = i_end.offset(-1);
            ie_ix = self.get_index(&i_end)?.1;
        }
        Ok(Some((i_start, i_end)))
    }

    /// Inverse pair of one operation. The undo op gets a fresh id; the
    /// redo op is re-identified when replayed.
    fn invert_op(
        &mut self,
        op: &Op,
        start_ix: usize,
        end_ix: usize,
    ) -> Result<Option<(Op, Op)>> {
        match op {
            Op::Insert(ins) => {
                let i_end = ins.id.offset(utf16_len(&ins.text) as i64 - 1);
                let Some((t_start, t_end)) =
                    self.trim_unit_span(start_ix, end_ix, &ins.id, &i_end)?
                else {
                    return Ok(None);
                };
                let span = t_end.seq - t_start.seq + 1;
                let undo = Op::Delete(DeleteOp {
                    id: self.next_id(1),
                    target_id: t_start.clone(),
                    span,
                });
                let redo = Op::Show(ShowOp {
                    id: Id::none(),
                    target_id: t_start,
                    span,
                });
                Ok(Some((undo, redo)))
            }
            Op::Delete(del) => {
                let i_end = del.target_id.offset(del.span - 1);
                let Some((t_start, t_end)) =
                    self.trim_unit_span(start_ix, end_ix, &del.target_id, &i_end)?
                else {
                    return Ok(None);
                };
                let span = t_end.seq - t_start.seq + 1;
                let undo = Op::Show(ShowOp {
                    id: self.next_id(1),
                    target_id: t_start.clone(),
                    span,
                });
                let redo = Op::Delete(DeleteOp {
                    id: Id::none(),
                    target_id: t_start,
                    span,
                });
                Ok(Some((undo, redo)))
            }
            Op::Show(show) => {
                let i_end = show.target_id.offset(show.span - 1);
                let Some((t_start, t_end)) =
                    self.trim_unit_span(start_ix, end_ix, &show.target_id, &i_end)?
                else {
                    return Ok(None);
                };
                let span = t_end.seq - t_start.seq + 1;
                let undo = Op::Delete(DeleteOp {
                    id: self.next_id(1),
                    target_id: t_start.clone(),
                    span,
                });
                let redo = Op::Show(ShowOp {
                    id: Id::none(),
                    target_id: t_start,
                    span,
                });
                Ok(Some((undo, redo)))
            }
            Op::Format(_) => {
                // Format payloads are opaque to the core; their inversion
                // belongs to the formatting layer.
                Ok(None)
            }
            Op::Rewind(rw) => {
                let Some((t_start, t_end)) = self.trim_unit_span(
                    start_ix,
                    end_ix,
                    &rw.address.start_id,
                    &rw.address.end_id,
                )?
                else {
                    return Ok(None);
                };
                let address = ContentAddress {
                    start_id: t_start.clone(),
                    end_id: t_end.clone(),
                    max_ids: rw.undo_address.max_ids.clone(),
                };
                let undo_address = ContentAddress {
                    start_id: t_start,
                    end_id: t_end,
                    max_ids: rw.address.max_ids.clone(),
                };
                let inverse = Op::Rewind(RewindOp {
                    id: self.next_id(1),
                    address,
                    undo_address,
                });
                Ok(Some((inverse.clone(), inverse)))
            }
            Op::Multi(m) => {
                let mut undo = MultiOp::default();
                let mut redo = MultiOp::default();
                for member in m.ops.iter().rev() {
                    if let Some((u, r)) = self.invert_op(member, start_ix, end_ix)? {
                        undo.append(u);
                        redo.append(r);
                    }
                }
                match (undo.flatten(), redo.flatten()) {
                    (Some(u), Some(r)) => Ok(Some((u, r))),
                    _ => Ok(None),
                }
            }
            Op::Snapshot(_) => Err(DocError::NestedSnapshot),
        }
    }

    /// Restore `[start_id, end_id]` to its state at `address`, emitting a
    /// `Rewind` that carries the address needed to reverse it.
    pub fn rewind(
        &mut self,
        start_id: &Id,
        end_id: &Id,
        address: &ContentAddress,
    ) -> Result<Op> {
        self.undo = None;

        let (_, start_ix) = self.get_index(start_id)?;
        let (_, end_ix) = self.get_index(end_id)?;
        let (_, ca_start_ix) = self.get_index(&address.start_id)?;
        let (_, ca_end_ix) = self.get_index(&address.end_id)?;

        let mut address = address.clone();
        let mut start_id = start_id.clone();
        let mut end_id = end_id.clone();

        // Clamp to the overlap of the requested span and the address.
        if start_ix < ca_start_ix {
            start_id = address.start_id.clone();
        } else {
            address.start_id = start_id.clone();
        }
        if ca_end_ix < end_ix {
            end_id = address.end_id.clone();
        } else {
            address.end_id = end_id.clone();
        }

        let undo_address = self.get_address(&start_id, &end_id)?;

        let op = Op::Rewind(RewindOp {
            id: self.next_id(1),
            address,
            undo_address,
        });
        self.merge_op(&op)?;
        Ok(op)
    }

    /// Apply a rewind: write each unit's visibility at the cut straight
    /// into the tombstone bitmap, leaving markers carrying the rewind's
    /// own id so the rewrite itself wins by Lamport order.
    pub(crate) fn rewind_op(&mut self, op: &RewindOp) -> Result<()> {
        let start_id = op.address.start_id.clone();
        let end_id = op.address.end_id.clone();

        let Some((mut rope_ref, _)) = self.rope.index.get(&start_id, &self.arena) else {
            return Err(DocError::ParentNotFound(start_id));
        };

        loop {
            let fugue = self.rope.leaf_of(rope_ref).expect("leaf");
            let is_start = self.arena.node(fugue).contains_id(&start_id);
            let is_end = self.arena.node(fugue).contains_id(&end_id);
            let len = self.arena.node(fugue).len();

            for i in 0..len {
                let target = self.arena.node(fugue).unit_id(i);
                if is_start && target.seq < start_id.seq {
                    continue;
                }

                let is_del = if !op.address.contains(&target) {
                    // The unit did not exist at the cut.
                    true
                } else {
                    match self.history.max_at(&target, |m| op.address.contains(m)) {
                        Some(marker) => marker.is_del,
                        None => false,
                    }
                };
                self.history.add(
                    &target,
                    Marker {
                        id: op.id.clone(),
                        is_del,
                    },
                );
                let winner = self.history.max(&target);
                self.mark_char_del(&target, winner.is_del)?;

                if is_end && target.seq >= end_id.seq {
                    self.observe_id(&op.id, 1);
                    return Ok(());
                }
            }

            rope_ref = self.rope.right_tot_sibling(&self.arena, rope_ref)?;
        }
    }
}
