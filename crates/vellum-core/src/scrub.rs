//! History scrubbing: a cursor over operations in Lamport order.
//!
//! A scrub session indexes every relevant identifier once, then moves a
//! cursor one id at a time, adjusting the address's per-author marks
//! incrementally — a history slider never recomputes an address from
//! scratch per step.

use copse::AvlMap;

use crate::address::ContentAddress;
use crate::doc::Doc;
use crate::error::{DocError, Result, Visit};
use crate::id::Id;

#[derive(Debug)]
pub struct ScrubState {
    /// `Some` for a whole-document scrub over op ids; `None` for a
    /// range scrub over unit/marker ids.
    pub(crate) full_address: Option<ContentAddress>,
    pub(crate) start_id: Id,
    pub(crate) end_id: Id,
    pub(crate) id_tree: AvlMap<Id, ()>,
    pub(crate) cur_node: Option<u32>,
    pub(crate) cur_ix: i64,
    pub(crate) cur_address: ContentAddress,
}

/// One scrub position: the address at the cursor and the span's visible
/// text at that address.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrubStep {
    pub address: ContentAddress,
    pub text: String,
}

impl Doc {
    /// Start a scrub session. With no bounds the session covers every
    /// logged operation; with bounds it covers the ids, history markers
    /// and overlapping formats of that span. Returns the highest cursor
    /// index (the present).
    pub fn scrub_init(&mut self, start_id: Option<&Id>, end_id: Option<&Id>) -> Result<i64> {
        self.undo = None;

        if start_id.is_none() && end_id.is_none() {
            let address = self.get_full_address()?;
            let size = self.log.len() as i64 - 1;

            let mut id_tree = AvlMap::new();
            for (_, tree) in self.log.author_ops() {
                for (_, op) in tree.iter() {
                    id_tree.insert(op.id(), ());
                }
            }

            let first = self.first_tot_id()?;
            let last = self.last_tot_id()?;
            let cur_node = id_tree.last();
            self.scrub = Some(ScrubState {
                full_address: Some(address.clone()),
                start_id: first,
                end_id: last,
                id_tree,
                cur_node,
                cur_ix: size,
                cur_address: address,
            });
            return Ok(size);
        }

        let start = match start_id {
            Some(id) => id.clone(),
            None => self.first_tot_id()?,
        };
        let end = match end_id {
            Some(id) => id.clone(),
            None => self.last_tot_id()?,
        };

        let (id_tree, address) = self.compute_address_state(&start, &end)?;
        let size = id_tree.len() as i64 - 1;
        let cur_node = id_tree.last();
        self.scrub = Some(ScrubState {
            full_address: None,
            start_id: start,
            end_id: end,
            id_tree,
            cur_node,
            cur_ix: size,
            cur_address: address,
        });
        Ok(size)
    }

    /// Every id relevant to `[start_id, end_id]` in one Lamport-ordered
    /// tree, with the address containing all of them.
    fn compute_address_state(
        &self,
        start_id: &Id,
        end_id: &Id,
    ) -> Result<(AvlMap<Id, ()>, ContentAddress)> {
        let mut address = ContentAddress {
            start_id: start_id.clone(),
            end_id: end_id.clone(),
            max_ids: Default::default(),
        };
        let mut id_tree = AvlMap::new();

        let (_, start_ix) = self.get_index(start_id)?;
        let (_, end_ix) = self.get_index(end_id)?;
        self.visit_format_ops_overlapping(start_ix, end_ix, |id| {
            id_tree.insert(id.clone(), ());
            address.add_id(id);
        })?;

        let end_seq = end_id.seq;
        let end_author = end_id.author.clone();
        self.rope.walk_right(&self.arena, start_id, |f| {
            let node = self.arena.node(f);
            let is_start = node.contains_id(start_id);
            let is_end = node.contains_id(end_id);
            for (id, _, _) in self.arena.units(f) {
                if is_start && id.seq < start_id.seq {
                    continue;
                }
                id_tree.insert(id.clone(), ());
                address.add_id(&id);
                if let Some(markers) = self.history.markers(&id) {
                    for (marker_id, _) in markers.iter() {
                        id_tree.insert(marker_id.clone(), ());
                        address.add_id(marker_id);
                    }
                }
                if is_end && id.author == end_author && id.seq >= end_seq {
                    return Ok(Visit::Stop);
                }
            }
            Ok(Visit::Continue)
        })?;

        Ok((id_tree, address))
    }

    /// Move the cursor to `ix`, adjusting the address one id at a time.
    /// Returns `None` when the cursor is already there.
    pub fn scrub_to(&mut self, ix: i64) -> Result<Option<ScrubStep>> {
        let mut state = self.scrub.take().ok_or(DocError::ScrubNotInitialized)?;
        let out = self.scrub_to_inner(&mut state, ix);
        self.scrub = Some(state);
        out
    }

    fn scrub_to_inner(&self, state: &mut ScrubState, ix: i64) -> Result<Option<ScrubStep>> {
        if ix == state.cur_ix {
            return Ok(None);
        }

        let size = if state.full_address.is_some() {
            self.log.len() as i64
        } else {
            state.id_tree.len() as i64
        };
        if ix < 0 || ix >= size {
            return Err(DocError::ScrubOutOfRange(ix));
        }

        let full = state.full_address.is_some();
        while ix != state.cur_ix {
            if state.cur_ix < ix {
                let node = state
                    .cur_node
                    .and_then(|n| state.id_tree.next(n))
                    .ok_or_else(|| DocError::Corrupt("scrub cursor ran off the end".into()))?;
                let id = state.id_tree.key(node).clone();
                let max_seq = if full {
                    // Re-including an op re-includes all the ids it
                    // occupies.
                    self.log
                        .get(&id)
                        .map(|op| op.max_id().seq)
                        .unwrap_or(id.seq)
                } else {
                    id.seq
                };
                state.cur_address.max_ids.insert(id.author.clone(), max_seq);
                state.cur_node = Some(node);
                state.cur_ix += 1;
            } else {
                let node = state
                    .cur_node
                    .ok_or_else(|| DocError::Corrupt("scrub cursor ran off the end".into()))?;
                let id = state.id_tree.key(node).clone();
                state
                    .cur_address
                    .max_ids
                    .insert(id.author.clone(), id.seq - 1);
                state.cur_node = state.id_tree.prev(node);
                state.cur_ix -= 1;
            }
        }

        let text = self.get_text_between(
            &state.start_id,
            &state.end_id,
            Some(&state.cur_address),
        )?;
        Ok(Some(ScrubStep {
            address: state.cur_address.clone(),
            text,
        }))
    }
}
