//! The Fugue conflict-resolution tree.
//!
//! Nodes are maximal runs of contiguously-typed code units by one author.
//! Parent/child links are handles into a [`NodeArena`]; splitting a run or
//! re-parenting children is handle reassignment, never a move. Nodes are
//! created on insert and tombstoned on delete — never freed, because
//! concurrent operations may still reference them.
//!
//! The attachment rules here are what make concurrent inserts converge:
//! a locally-minted node attaches as close to its insertion point as
//! possible (descending through existing children), while a remotely
//! replayed node is placed into its recorded parent's child list sorted by
//! `(author, seq)`. Both walks visit the same final order on every
//! replica.

use crate::error::{DocError, Result};
use crate::id::{Id, Side};
use crate::utf16::is_low_surrogate;

/// Handle of a fugue node inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FugueRef(pub(crate) u32);

/// A run of code units with per-unit tombstone bits.
#[derive(Debug, Clone)]
pub struct FugueNode {
    pub id: Id,
    pub text: Vec<u16>,
    pub is_deleted: Vec<bool>,
    pub side: Side,
    pub parent: Option<FugueRef>,
    pub left_children: Vec<FugueRef>,
    pub right_children: Vec<FugueRef>,
}

impl FugueNode {
    /// Does `id` name a unit inside this run?
    pub fn contains_id(&self, id: &Id) -> bool {
        self.id.author == id.author
            && self.id.seq <= id.seq
            && id.seq < self.id.seq + self.text.len() as i64
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn deleted(&self) -> usize {
        self.is_deleted.iter().filter(|d| **d).count()
    }

    pub fn visible(&self) -> usize {
        self.text.len() - self.deleted()
    }

    /// Id of the unit at `offset`.
    pub fn unit_id(&self, offset: usize) -> Id {
        self.id.offset(offset as i64)
    }

    /// First unit id of the run.
    pub fn leftmost_id(&self) -> Id {
        self.id.clone()
    }

    /// Last unit id of the run.
    pub fn rightmost_id(&self) -> Id {
        self.id.offset(self.text.len() as i64 - 1)
    }

    pub fn leftmost_vis_id(&self) -> Result<Id> {
        for (i, del) in self.is_deleted.iter().enumerate() {
            if !del {
                return Ok(self.unit_id(i));
            }
        }
        Err(DocError::NoVisibleText(self.id.clone()))
    }

    pub fn rightmost_vis_id(&self) -> Result<Id> {
        for (i, del) in self.is_deleted.iter().enumerate().rev() {
            if !del {
                return Ok(self.unit_id(i));
            }
        }
        Err(DocError::NoVisibleText(self.id.clone()))
    }

    /// Visible offset of the unit at `tot_offset`, `None` if tombstoned.
    pub fn vis_offset(&self, tot_offset: usize) -> Result<Option<usize>> {
        if tot_offset >= self.text.len() {
            return Err(DocError::InvalidOffset {
                id: Some(self.id.clone()),
                offset: tot_offset as i64,
            });
        }
        if self.is_deleted[tot_offset] {
            return Ok(None);
        }
        Ok(Some(
            self.is_deleted[..tot_offset].iter().filter(|d| !**d).count(),
        ))
    }

    /// Total offset of the `vis_offset`-th visible unit.
    pub fn tot_offset(&self, vis_offset: usize) -> Result<usize> {
        let mut remaining = vis_offset;
        for (i, del) in self.is_deleted.iter().enumerate() {
            if !del {
                if remaining == 0 {
                    return Ok(i);
                }
                remaining -= 1;
            }
        }
        Err(DocError::InvalidOffset {
            id: Some(self.id.clone()),
            offset: vis_offset as i64,
        })
    }
}

/// Child ordering inside a parent's child list: `(author, seq)`.
fn child_order(a: &Id, b: &Id) -> std::cmp::Ordering {
    a.author.cmp(&b.author).then(a.seq.cmp(&b.seq))
}

/// Arena owning every fugue node of one document.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<FugueNode>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(
        &mut self,
        id: Id,
        text: Vec<u16>,
        side: Side,
        parent: Option<FugueRef>,
    ) -> FugueRef {
        let is_deleted = vec![false; text.len()];
        self.nodes.push(FugueNode {
            id,
            text,
            is_deleted,
            side,
            parent,
            left_children: Vec::new(),
            right_children: Vec::new(),
        });
        FugueRef((self.nodes.len() - 1) as u32)
    }

    pub fn node(&self, h: FugueRef) -> &FugueNode {
        &self.nodes[h.0 as usize]
    }

    pub fn node_mut(&mut self, h: FugueRef) -> &mut FugueNode {
        &mut self.nodes[h.0 as usize]
    }

    /// Per-unit view of a run: `(id, code unit, tombstoned)`.
    pub fn units(&self, h: FugueRef) -> impl Iterator<Item = (Id, u16, bool)> + '_ {
        let n = self.node(h);
        n.text
            .iter()
            .zip(n.is_deleted.iter())
            .enumerate()
            .map(move |(i, (&c, &d))| (n.unit_id(i), c, d))
    }

    /// Leftmost node of the subtree rooted at `h` in logical order.
    pub fn leftmost(&self, mut h: FugueRef) -> FugueRef {
        while let Some(&first) = self.node(h).left_children.first() {
            h = first;
        }
        h
    }

    /// Rightmost node of the subtree rooted at `h` in logical order.
    pub fn rightmost(&self, mut h: FugueRef) -> FugueRef {
        while let Some(&last) = self.node(h).right_children.last() {
            h = last;
        }
        h
    }

    /// Attach a freshly minted node immediately to the right of `sib`.
    ///
    /// If `sib` already has right children the new node must order before
    /// all of them, so it descends to the leftmost node of the first right
    /// child's subtree and becomes its last left child.
    pub fn insert_right(&mut self, sib: FugueRef, node: FugueRef) {
        if self.node(sib).right_children.is_empty() {
            self.node_mut(node).parent = Some(sib);
            self.node_mut(node).side = Side::Right;
            self.node_mut(sib).right_children.push(node);
        } else {
            let first = self.node(sib).right_children[0];
            let right_sib = self.leftmost(first);
            self.node_mut(node).parent = Some(right_sib);
            self.node_mut(node).side = Side::Left;
            self.node_mut(right_sib).left_children.push(node);
        }
    }

    /// Attach a freshly minted node immediately to the left of `sib`.
    pub fn insert_left(&mut self, sib: FugueRef, node: FugueRef) {
        if self.node(sib).left_children.is_empty() {
            self.node_mut(node).parent = Some(sib);
            self.node_mut(node).side = Side::Left;
            self.node_mut(sib).left_children.push(node);
        } else {
            let last = *self.node(sib).left_children.last().expect("non-empty");
            let left_sib = self.rightmost(last);
            self.node_mut(node).parent = Some(left_sib);
            self.node_mut(node).side = Side::Right;
            self.node_mut(left_sib).right_children.push(node);
        }
    }

    /// Place a remotely replayed node into `parent`'s child list on the
    /// given side, keeping the list sorted by `(author, seq)`.
    pub fn insert_child(&mut self, parent: FugueRef, side: Side, child: FugueRef) {
        let child_id = self.node(child).id.clone();
        self.node_mut(child).parent = Some(parent);
        self.node_mut(child).side = side;

        let list = match side {
            Side::Left => &self.node(parent).left_children,
            _ => &self.node(parent).right_children,
        };
        let pos = list
            .binary_search_by(|h| child_order(&self.node(*h).id, &child_id))
            .unwrap_or_else(|e| e);

        match side {
            Side::Left => self.node_mut(parent).left_children.insert(pos, child),
            _ => self.node_mut(parent).right_children.insert(pos, child),
        }
    }

    /// Index of `h` in its parent's child list on its side; `None` for
    /// roots.
    pub fn child_index(&self, h: FugueRef) -> Result<Option<usize>> {
        let node = self.node(h);
        if node.side == Side::Root {
            return Ok(None);
        }
        let parent = node.parent.ok_or_else(|| {
            DocError::Corrupt(format!("node {} has a side but no parent", node.id))
        })?;
        let list = match node.side {
            Side::Left => &self.node(parent).left_children,
            _ => &self.node(parent).right_children,
        };
        list.iter()
            .position(|c| *c == h)
            .map(Some)
            .ok_or_else(|| {
                DocError::Corrupt(format!(
                    "node {} is not a child of its parent {}",
                    node.id,
                    self.node(parent).id
                ))
            })
    }

    /// The unit-level parent id recorded in emitted insert operations:
    /// left-attached nodes point at their parent's first unit, right-attached
    /// nodes at its last unit.
    pub fn adjusted_parent_id(&self, h: FugueRef) -> Id {
        let node = self.node(h);
        let Some(parent) = node.parent else {
            return Id::none();
        };
        let p = self.node(parent);
        match node.side {
            Side::Left => p.id.clone(),
            _ => p.id.offset((p.text.len() as i64 - 1).max(0)),
        }
    }

    /// Split the run after the unit at `tot_offset`. Returns the right
    /// half, or `None` when the cut falls at the end of the run. The right
    /// half inherits the run's right children.
    pub fn split_after(&mut self, h: FugueRef, tot_offset: usize) -> Result<Option<FugueRef>> {
        let len = self.node(h).text.len();
        if tot_offset + 1 >= len {
            return Ok(None);
        }
        let cut = tot_offset + 1;
        if is_low_surrogate(self.node(h).text[cut]) {
            return Err(DocError::SurrogateSplit(self.node(h).id.clone()));
        }

        let right_text = self.node_mut(h).text.split_off(cut);
        let right_del = self.node_mut(h).is_deleted.split_off(cut);
        let right_id = self.node(h).id.offset(cut as i64);

        let right = self.alloc(right_id, right_text, Side::Right, Some(h));
        self.node_mut(right).is_deleted = right_del;

        let moved = std::mem::take(&mut self.node_mut(h).right_children);
        for &c in &moved {
            self.node_mut(c).parent = Some(right);
        }
        self.node_mut(right).right_children = moved;
        self.node_mut(h).right_children = vec![right];

        Ok(Some(right))
    }

    /// Extend the run in place (sequential same-author typing fast-path).
    pub fn append(&mut self, h: FugueRef, text: &[u16]) {
        let node = self.node_mut(h);
        node.text.extend_from_slice(text);
        node.is_deleted.extend(std::iter::repeat(false).take(text.len()));
    }

    /// Check parent/side consistency of the subtree rooted at `root`.
    pub fn validate_parent_side(&self, root: FugueRef) -> Result<()> {
        let mut queue = vec![root];
        while let Some(h) = queue.pop() {
            let node = self.node(h);
            for &c in &node.left_children {
                let child = self.node(c);
                if child.parent != Some(h) {
                    return Err(DocError::Corrupt(format!(
                        "left child {} does not point back at {}",
                        child.id, node.id
                    )));
                }
                if child.side != Side::Left {
                    return Err(DocError::Corrupt(format!(
                        "left child {} has side {:?}",
                        child.id, child.side
                    )));
                }
                queue.push(c);
            }
            for &c in &node.right_children {
                let child = self.node(c);
                if child.parent != Some(h) {
                    return Err(DocError::Corrupt(format!(
                        "right child {} does not point back at {}",
                        child.id, node.id
                    )));
                }
                if child.side != Side::Right {
                    return Err(DocError::Corrupt(format!(
                        "right child {} has side {:?}",
                        child.id, child.side
                    )));
                }
                queue.push(c);
            }
        }
        Ok(())
    }
}

/// Visible units of a span: parallel ids and code units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisSpan {
    pub ids: Vec<Id>,
    pub text: Vec<u16>,
}

/// All units of a span, tombstones included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TotSpan {
    pub ids: Vec<Id>,
    pub text: Vec<u16>,
    pub is_deleted: Vec<bool>,
    pub deleted: usize,
}
