//! Historical reads: what did a span look like as of a causal cut.
//!
//! Nothing here mutates live state. Visibility at an address is decided
//! per unit: the unit must be contained in the cut, and the latest
//! history marker inside the cut (if any) must not be a delete.

use crate::address::ContentAddress;
use crate::doc::Doc;
use crate::error::{DocError, Result, Visit};
use crate::id::Id;
use crate::utf16::utf16_to_str;

/// A filtered span: visible text at a cut with unit ids and their total
/// positions in the live document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filtered {
    pub text: Vec<u16>,
    pub ids: Vec<Id>,
    pub tot_ixs: Vec<usize>,
}

impl Filtered {
    pub fn text_string(&self) -> String {
        utf16_to_str(&self.text)
    }
}

impl Doc {
    /// Was the unit visible as of the cut? Without an address this is
    /// plain tombstone state.
    pub fn is_deleted_at(&self, id: &Id, addr: Option<&ContentAddress>) -> Result<bool> {
        let Some(addr) = addr else {
            return self.is_deleted(id);
        };
        if !addr.contains(id) {
            return Ok(true);
        }
        match self.history.max_at(id, |m| addr.contains(m)) {
            Some(marker) => Ok(marker.is_del),
            None => Ok(false),
        }
    }

    /// Nearest unit right of `id` that is visible at the cut.
    pub fn right_of_at(&self, id: &Id, addr: Option<&ContentAddress>) -> Result<Id> {
        let mut cur = id.clone();
        loop {
            cur = match self.tot_right_of(&cur) {
                Ok(next) => next,
                Err(DocError::NoRightTotSibling(_)) => {
                    return Err(DocError::NoRightSiblingAt(id.clone()))
                }
                Err(e) => return Err(e),
            };
            if !self.is_deleted_at(&cur, addr)? {
                return Ok(cur);
            }
        }
    }

    /// Nearest unit left of `id` that is visible at the cut.
    pub fn left_of_at(&self, id: &Id, addr: Option<&ContentAddress>) -> Result<Id> {
        let mut cur = id.clone();
        loop {
            cur = match self.tot_left_of(&cur) {
                Ok(next) => next,
                Err(DocError::NoLeftTotSibling(_)) => {
                    return Err(DocError::NoLeftSiblingAt(id.clone()))
                }
                Err(e) => return Err(e),
            };
            if !self.is_deleted_at(&cur, addr)? {
                return Ok(cur);
            }
        }
    }

    /// Reconstruct the visible content of `[start_id, end_id]` as of the
    /// cut. Units outside the address's own bounds show their live
    /// visibility. Returns `None` for an inverted span.
    pub fn filter(
        &self,
        start_id: &Id,
        end_id: &Id,
        addr: Option<&ContentAddress>,
    ) -> Result<Option<Filtered>> {
        self.rope.set_cache();
        let out = self.filter_inner(start_id, end_id, addr);
        self.rope.del_cache();
        out
    }

    fn filter_inner(
        &self,
        start_id: &Id,
        end_id: &Id,
        addr: Option<&ContentAddress>,
    ) -> Result<Option<Filtered>> {
        let (_, start_ix) = self.get_index(start_id)?;
        let (_, end_ix) = self.get_index(end_id)?;
        if start_ix > end_ix {
            return Ok(None);
        }

        let (addr_start, addr_end) = match addr {
            Some(a) => (self.get_index(&a.start_id)?.1, self.get_index(&a.end_id)?.1),
            None => (0, self.tot_size),
        };

        let tot = self.rope.get_tot_between(&self.arena, start_id, end_id)?;
        let mut out = Filtered {
            text: Vec::with_capacity(tot.ids.len()),
            ids: Vec::with_capacity(tot.ids.len()),
            tot_ixs: Vec::with_capacity(tot.ids.len()),
        };

        for (ix, id) in tot.ids.iter().enumerate() {
            let tot_ix = start_ix + ix;

            let visible = if addr.is_none() || tot_ix < addr_start || tot_ix > addr_end {
                !tot.is_deleted[ix]
            } else {
                let a = addr.expect("checked above");
                a.contains(id)
                    && match self.history.max_at(id, |m| a.contains(m)) {
                        Some(marker) => !marker.is_del,
                        None => true,
                    }
            };

            if visible {
                out.text.push(tot.text[ix]);
                out.ids.push(id.clone());
                out.tot_ixs.push(tot_ix);
            }
        }

        Ok(Some(out))
    }

    /// Visible text of the span, live or at a cut.
    pub fn get_text_between(
        &self,
        start_id: &Id,
        end_id: &Id,
        addr: Option<&ContentAddress>,
    ) -> Result<String> {
        match addr {
            None => {
                let vis = self.rope.get_between(&self.arena, start_id, end_id)?;
                Ok(utf16_to_str(&vis.text))
            }
            Some(_) => {
                let filtered = self.filter(start_id, end_id, addr)?;
                Ok(filtered.map(|f| f.text_string()).unwrap_or_default())
            }
        }
    }

    /// Walk units visible at the cut, rightward from `start_id`
    /// inclusive.
    pub fn walk_right_from_at<F>(
        &self,
        start_id: &Id,
        addr: Option<&ContentAddress>,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&Id, u16) -> Visit,
    {
        let (addr_start, addr_end) = match addr {
            Some(a) => (self.get_index(&a.start_id)?.1, self.get_index(&a.end_id)?.1),
            None => (0, self.tot_size),
        };
        let (_, mut ix) = self.get_index(start_id)?;

        let (mut rope_ref, _) = self
            .rope
            .index
            .get(start_id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(start_id.clone()))?;

        loop {
            let fugue = self.rope.leaf_of(rope_ref).expect("leaf");
            let is_start = self.arena.node(fugue).contains_id(start_id);

            for (id, c, del) in self.arena.units(fugue) {
                if is_start && id.seq < start_id.seq {
                    continue;
                }

                let visible = if addr.is_none() || ix < addr_start || addr_end < ix {
                    !del
                } else {
                    let a = addr.expect("checked above");
                    a.contains(&id)
                        && match self.history.max_at(&id, |m| a.contains(m)) {
                            Some(marker) => !marker.is_del,
                            None => true,
                        }
                };

                if visible && f(&id, c) == Visit::Stop {
                    return Ok(());
                }
                ix += 1;
            }

            let step = if addr.is_none() {
                self.rope.right_vis_sibling(&self.arena, rope_ref)
            } else {
                self.rope.right_tot_sibling(&self.arena, rope_ref)
            };
            match step {
                Ok(next) => rope_ref = next,
                Err(DocError::NoRightVisSibling(_)) | Err(DocError::NoRightTotSibling(_)) => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Walk units visible at the cut, leftward from `start_id` inclusive.
    pub fn walk_left_from_at<F>(
        &self,
        start_id: &Id,
        addr: Option<&ContentAddress>,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&Id, u16) -> Visit,
    {
        let (addr_start, addr_end) = match addr {
            Some(a) => (self.get_index(&a.start_id)?.1, self.get_index(&a.end_id)?.1),
            None => (0, self.tot_size),
        };
        let (_, mut ix) = self.get_index(start_id)?;

        let (mut rope_ref, _) = self
            .rope
            .index
            .get(start_id, &self.arena)
            .ok_or_else(|| DocError::NotInRope(start_id.clone()))?;

        loop {
            let fugue = self.rope.leaf_of(rope_ref).expect("leaf");
            let is_start = self.arena.node(fugue).contains_id(start_id);

            let units: Vec<_> = self.arena.units(fugue).collect();
            for (id, c, del) in units.into_iter().rev() {
                if is_start && id.seq > start_id.seq {
                    continue;
                }

                let visible = if addr.is_none() || ix < addr_start || addr_end < ix {
                    !del
                } else {
                    let a = addr.expect("checked above");
                    a.contains(&id)
                        && match self.history.max_at(&id, |m| a.contains(m)) {
                            Some(marker) => !marker.is_del,
                            None => true,
                        }
                };

                if visible && f(&id, c) == Visit::Stop {
                    return Ok(());
                }
                ix = ix.saturating_sub(1);
            }

            let step = if addr.is_none() {
                self.rope.left_vis_sibling(&self.arena, rope_ref)
            } else {
                self.rope.left_tot_sibling(&self.arena, rope_ref)
            };
            match step {
                Ok(prev) => rope_ref = prev,
                Err(DocError::NoLeftVisSibling(_)) | Err(DocError::NoLeftTotSibling(_)) => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        }
    }
}
