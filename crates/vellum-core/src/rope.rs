//! Dual-weighted AVL rope over the fugue tree's runs.
//!
//! The rope is a second tree over the same leaves: its in-order leaf walk
//! equals the fugue tree's logical order, but its shape is whatever AVL
//! rebalancing produces. Every internal node caches the visible and total
//! code-unit counts of its left subtree, so a position in either
//! coordinate space resolves to a leaf in O(log n), and a leaf resolves to
//! its positions by one walk to the root.
//!
//! Rope nodes live in an arena addressed by [`RopeRef`]; leaves point at
//! their [`FugueRef`] run. The rope never removes leaves — deletion only
//! tombstones, which shows up here as a weight update.

use std::cell::RefCell;
use std::collections::HashMap;

use copse::AvlMap;

use crate::error::{DocError, Result, Visit};
use crate::id::{Id, Side};
use crate::node::{FugueRef, NodeArena, TotSpan, VisSpan};

/// Handle of a rope node inside the rope's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RopeRef(pub(crate) u32);

#[derive(Debug, Clone)]
struct RopeNode {
    /// Visible units in the left subtree (for a leaf: in the run).
    vis_weight: usize,
    /// Total units in the left subtree (for a leaf: in the run).
    tot_weight: usize,
    height: i32,
    parent: Option<RopeRef>,
    left: Option<RopeRef>,
    right: Option<RopeRef>,
    /// `Some` marks a leaf.
    leaf: Option<FugueRef>,
}

/// Per-author map from first-unit seq to the owning rope leaf.
///
/// Lookup of an arbitrary unit id is a floor search on the seq plus a
/// containment check against the run's current length.
#[derive(Debug, Clone, Default)]
pub struct RopeIndex {
    authors: HashMap<String, AvlMap<i64, (RopeRef, FugueRef)>>,
}

impl RopeIndex {
    pub fn get(&self, id: &Id, arena: &NodeArena) -> Option<(RopeRef, FugueRef)> {
        let map = self.authors.get(&id.author)?;
        let h = map.left_sib(&id.seq)?;
        let &(rope, fugue) = map.value(h);
        if arena.node(fugue).contains_id(id) {
            Some((rope, fugue))
        } else {
            None
        }
    }

    fn put(&mut self, id: &Id, rope: RopeRef, fugue: FugueRef) {
        self.authors
            .entry(id.author.clone())
            .or_default()
            .insert(id.seq, (rope, fugue));
    }
}

type PosCache = HashMap<Id, (Option<usize>, usize)>;

#[derive(Debug, Default)]
pub struct Rope {
    nodes: Vec<RopeNode>,
    root: Option<RopeRef>,
    pub index: RopeIndex,
    cache: RefCell<Option<PosCache>>,
}

impl Clone for Rope {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            root: self.root,
            index: self.index.clone(),
            // The cache is scoped to a single traversal; never clone it.
            cache: RefCell::new(None),
        }
    }
}

impl Rope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the id-to-position cache for one read-only traversal.
    /// Must be paired with [`Rope::del_cache`] before any mutation.
    pub fn set_cache(&self) {
        *self.cache.borrow_mut() = Some(HashMap::new());
    }

    pub fn del_cache(&self) {
        *self.cache.borrow_mut() = None;
    }

    fn node(&self, h: RopeRef) -> &RopeNode {
        &self.nodes[h.0 as usize]
    }

    fn node_mut(&mut self, h: RopeRef) -> &mut RopeNode {
        &mut self.nodes[h.0 as usize]
    }

    pub fn leaf_of(&self, h: RopeRef) -> Option<FugueRef> {
        self.node(h).leaf
    }

    fn is_leaf(&self, h: RopeRef) -> bool {
        self.node(h).leaf.is_some()
    }

    fn side(&self, h: RopeRef) -> Side {
        match self.node(h).parent {
            None => Side::Root,
            Some(p) => {
                if self.node(p).left == Some(h) {
                    Side::Left
                } else {
                    Side::Right
                }
            }
        }
    }

    fn height(&self, h: Option<RopeRef>) -> i32 {
        match h {
            Some(i) => self.node(i).height,
            None => 0,
        }
    }

    fn update_height(&mut self, h: RopeRef) {
        let (l, r) = (self.node(h).left, self.node(h).right);
        self.node_mut(h).height = 1 + self.height(l).max(self.height(r));
    }

    fn balance_factor(&self, h: RopeRef) -> i32 {
        if self.is_leaf(h) {
            return 0;
        }
        self.height(self.node(h).left) - self.height(self.node(h).right)
    }

    fn alloc_leaf(&mut self, arena: &NodeArena, fugue: FugueRef) -> RopeRef {
        let tot = arena.node(fugue).len();
        let vis = tot - arena.node(fugue).deleted();
        self.nodes.push(RopeNode {
            vis_weight: vis,
            tot_weight: tot,
            height: 1,
            parent: None,
            left: None,
            right: None,
            leaf: Some(fugue),
        });
        RopeRef((self.nodes.len() - 1) as u32)
    }

    /// Point `n`'s parent (or the root slot) at `to` instead of `n`.
    fn replace_in_parent(&mut self, n: RopeRef, p: Option<RopeRef>, to: RopeRef) {
        match p {
            Some(pi) => {
                if self.node(pi).left == Some(n) {
                    self.node_mut(pi).left = Some(to);
                } else {
                    self.node_mut(pi).right = Some(to);
                }
            }
            None => self.root = Some(to),
        }
        self.node_mut(to).parent = p;
    }

    /// Left rotation; weights migrate so every internal node keeps its
    /// left-subtree counts. No-op when the pivot child is a leaf.
    fn rotate_left(&mut self, n: RopeRef) -> RopeRef {
        let Some(y) = self.node(n).right else {
            return n;
        };
        if self.is_leaf(y) {
            return n;
        }
        let p = self.node(n).parent;
        let yl = self.node(y).left.expect("internal node has children");

        self.node_mut(n).right = Some(yl);
        self.node_mut(yl).parent = Some(n);
        self.node_mut(y).left = Some(n);
        self.replace_in_parent(n, p, y);
        self.node_mut(n).parent = Some(y);

        let (nv, nt) = (self.node(n).vis_weight, self.node(n).tot_weight);
        self.node_mut(y).vis_weight += nv;
        self.node_mut(y).tot_weight += nt;
        self.update_height(n);
        self.update_height(y);
        y
    }

    fn rotate_right(&mut self, n: RopeRef) -> RopeRef {
        let Some(x) = self.node(n).left else {
            return n;
        };
        if self.is_leaf(x) {
            return n;
        }
        let p = self.node(n).parent;
        let xr = self.node(x).right.expect("internal node has children");

        self.node_mut(n).left = Some(xr);
        self.node_mut(xr).parent = Some(n);
        self.node_mut(x).right = Some(n);
        self.replace_in_parent(n, p, x);
        self.node_mut(n).parent = Some(x);

        let (xv, xt) = (self.node(x).vis_weight, self.node(x).tot_weight);
        self.node_mut(n).vis_weight -= xv;
        self.node_mut(n).tot_weight -= xt;
        self.update_height(n);
        self.update_height(x);
        x
    }

    fn rebalance(&mut self, n: RopeRef) -> RopeRef {
        if self.is_leaf(n) {
            return n;
        }
        let bal = self.balance_factor(n);
        if bal > 1 {
            let l = self.node(n).left.expect("left-heavy");
            if !self.is_leaf(l) && self.balance_factor(l) < 0 {
                self.rotate_left(l);
            }
            return self.rotate_right(n);
        }
        if bal < -1 {
            let r = self.node(n).right.expect("right-heavy");
            if !self.is_leaf(r) && self.balance_factor(r) > 0 {
                self.rotate_right(r);
            }
            return self.rotate_left(n);
        }
        n
    }

    /// Insert the run as a new leaf at total position `tot_ix`.
    pub fn insert_with_ix(
        &mut self,
        arena: &NodeArena,
        mut tot_ix: usize,
        fugue: FugueRef,
    ) -> Result<RopeRef> {
        let leaf = self.alloc_leaf(arena, fugue);
        let (new_vis, new_tot) = (self.node(leaf).vis_weight, self.node(leaf).tot_weight);

        if let Some(mut cur) = self.root {
            loop {
                if self.is_leaf(cur) {
                    let (l, r) = if tot_ix == 0 { (leaf, cur) } else { (cur, leaf) };
                    let p = self.node(cur).parent;
                    let (lv, lt) = (self.node(l).vis_weight, self.node(l).tot_weight);
                    self.nodes.push(RopeNode {
                        vis_weight: lv,
                        tot_weight: lt,
                        height: 2,
                        parent: None,
                        left: Some(l),
                        right: Some(r),
                        leaf: None,
                    });
                    let internal = RopeRef((self.nodes.len() - 1) as u32);
                    self.replace_in_parent(cur, p, internal);
                    self.node_mut(l).parent = Some(internal);
                    self.node_mut(r).parent = Some(internal);
                    break;
                }
                let weight = self.node(cur).tot_weight;
                if tot_ix <= weight {
                    self.node_mut(cur).vis_weight += new_vis;
                    self.node_mut(cur).tot_weight += new_tot;
                    cur = self.node(cur).left.expect("internal node has children");
                } else {
                    tot_ix -= weight;
                    cur = self.node(cur).right.expect("internal node has children");
                }
            }
        }

        // Rebalance from the new leaf to the root.
        let mut p = leaf;
        while let Some(parent) = self.node(p).parent {
            self.update_height(parent);
            p = self.rebalance(parent);
        }
        self.root = Some(p);

        let id = arena.node(fugue).id.clone();
        self.index.put(&id, leaf, fugue);
        Ok(leaf)
    }

    /// Insert the run at the position implied by its fugue-tree links.
    pub fn insert(&mut self, arena: &NodeArena, fugue: FugueRef) -> Result<RopeRef> {
        let tot_ix = self.insert_ix(arena, fugue)?;
        self.insert_with_ix(arena, tot_ix, fugue)
    }

    /// Total position a freshly attached fugue node occupies, derived from
    /// its neighbors in the conflict tree.
    fn insert_ix(&self, arena: &NodeArena, fugue: FugueRef) -> Result<usize> {
        if self.root.is_none() {
            return Ok(0);
        }
        let node = arena.node(fugue);

        if let Some(&first) = node.right_children.first() {
            let right_sib = arena.leftmost(first);
            let (_, tot) = self.get_index(arena, &arena.node(right_sib).id)?;
            return Ok(tot);
        }

        if let Some(&last) = node.left_children.last() {
            let left_sib = arena.rightmost(last);
            let (_, tot) = self.get_index(arena, &arena.node(left_sib).id)?;
            return Ok(tot + arena.node(left_sib).len());
        }

        let child_ix = arena
            .child_index(fugue)?
            .ok_or_else(|| DocError::Corrupt(format!("no sibling for root {}", node.id)))?;
        let parent = node.parent.expect("sided node has a parent");

        match node.side {
            Side::Right => {
                let left_sib = if child_ix == 0 {
                    parent
                } else {
                    arena.rightmost(arena.node(parent).right_children[child_ix - 1])
                };
                let (_, tot) = self.get_index(arena, &arena.node(left_sib).id)?;
                Ok(tot + arena.node(left_sib).len())
            }
            Side::Left => {
                let lc = &arena.node(parent).left_children;
                let right_sib = if child_ix == lc.len() - 1 {
                    parent
                } else {
                    arena.leftmost(lc[child_ix + 1])
                };
                let (_, tot) = self.get_index(arena, &arena.node(right_sib).id)?;
                Ok(tot)
            }
            Side::Root => Err(DocError::Corrupt(format!(
                "root node {} reached sibling search",
                node.id
            ))),
        }
    }

    /// Leaf containing the `vis_ix`-th visible unit, with the visible
    /// offset inside that leaf.
    pub fn get_node(&self, arena: &NodeArena, vis_ix: usize) -> Result<(usize, RopeRef)> {
        let mut cur = self.root.ok_or(DocError::InvalidOffset {
            id: None,
            offset: vis_ix as i64,
        })?;
        let mut ix = vis_ix;
        loop {
            if self.is_leaf(cur) {
                let f = self.node(cur).leaf.expect("leaf");
                if ix >= arena.node(f).visible() {
                    return Err(DocError::InvalidOffset {
                        id: Some(arena.node(f).id.clone()),
                        offset: vis_ix as i64,
                    });
                }
                return Ok((ix, cur));
            }
            let w = self.node(cur).vis_weight;
            if ix < w {
                cur = self.node(cur).left.expect("internal node has children");
            } else {
                ix -= w;
                cur = self.node(cur).right.expect("internal node has children");
            }
        }
    }

    /// Leaf containing the `tot_ix`-th unit, with the total offset inside
    /// that leaf.
    pub fn get_tot_node(&self, arena: &NodeArena, tot_ix: usize) -> Result<(usize, RopeRef)> {
        let mut cur = self.root.ok_or(DocError::InvalidOffset {
            id: None,
            offset: tot_ix as i64,
        })?;
        let mut ix = tot_ix;
        loop {
            if self.is_leaf(cur) {
                let f = self.node(cur).leaf.expect("leaf");
                if ix >= arena.node(f).len() {
                    return Err(DocError::InvalidOffset {
                        id: Some(arena.node(f).id.clone()),
                        offset: tot_ix as i64,
                    });
                }
                return Ok((ix, cur));
            }
            let w = self.node(cur).tot_weight;
            if ix < w {
                cur = self.node(cur).left.expect("internal node has children");
            } else {
                ix -= w;
                cur = self.node(cur).right.expect("internal node has children");
            }
        }
    }

    pub fn get_vis_id(&self, arena: &NodeArena, vis_ix: usize) -> Result<Id> {
        let (vis_offset, leaf) = self.get_node(arena, vis_ix)?;
        let f = self.node(leaf).leaf.expect("leaf");
        let tot_offset = arena.node(f).tot_offset(vis_offset)?;
        Ok(arena.node(f).unit_id(tot_offset))
    }

    pub fn get_tot_id(&self, arena: &NodeArena, tot_ix: usize) -> Result<Id> {
        let (tot_offset, leaf) = self.get_tot_node(arena, tot_ix)?;
        let f = self.node(leaf).leaf.expect("leaf");
        Ok(arena.node(f).unit_id(tot_offset))
    }

    /// Positions of a unit: `(visible, total)`. The visible position is
    /// `None` when the unit is tombstoned.
    pub fn get_index(&self, arena: &NodeArena, id: &Id) -> Result<(Option<usize>, usize)> {
        if let Some(cache) = self.cache.borrow().as_ref() {
            if let Some(hit) = cache.get(id) {
                return Ok(*hit);
            }
        }

        let (rope, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;

        let tot_offset = (id.seq - arena.node(fugue).id.seq) as usize;
        let mut vis = arena.node(fugue).vis_offset(tot_offset)?;
        let mut tot = tot_offset;

        let mut n = rope;
        while let Some(p) = self.node(n).parent {
            if self.node(p).right == Some(n) {
                if let Some(v) = vis.as_mut() {
                    *v += self.node(p).vis_weight;
                }
                tot += self.node(p).tot_weight;
            }
            n = p;
        }

        if let Some(cache) = self.cache.borrow_mut().as_mut() {
            cache.insert(id.clone(), (vis, tot));
        }
        Ok((vis, tot))
    }

    /// Recompute a leaf's weights from its run and propagate the change
    /// to every ancestor holding it in a left subtree.
    pub fn update_weight(&mut self, arena: &NodeArena, leaf: RopeRef) {
        let f = self.node(leaf).leaf.expect("leaf");
        let tot_len = arena.node(f).len();
        let vis_len = tot_len - arena.node(f).deleted();

        let tot_diff = tot_len as isize - self.node(leaf).tot_weight as isize;
        let vis_diff = vis_len as isize - self.node(leaf).vis_weight as isize;
        if tot_diff == 0 && vis_diff == 0 {
            return;
        }

        self.node_mut(leaf).tot_weight = tot_len;
        self.node_mut(leaf).vis_weight = vis_len;

        let mut n = leaf;
        while let Some(p) = self.node(n).parent {
            if self.node(p).left == Some(n) {
                let np = self.node_mut(p);
                np.vis_weight = (np.vis_weight as isize + vis_diff) as usize;
                np.tot_weight = (np.tot_weight as isize + tot_diff) as usize;
            }
            n = p;
        }
    }

    fn leftmost_leaf(&self, mut n: RopeRef) -> RopeRef {
        while !self.is_leaf(n) {
            n = self.node(n).left.expect("internal node has children");
        }
        n
    }

    fn rightmost_leaf(&self, mut n: RopeRef) -> RopeRef {
        while !self.is_leaf(n) {
            n = self.node(n).right.expect("internal node has children");
        }
        n
    }

    /// Visible units in the subtree rooted at `n`.
    fn subtree_vis_weight(&self, n: RopeRef) -> usize {
        let mut total = 0;
        let mut cur = n;
        loop {
            total += self.node(cur).vis_weight;
            if self.is_leaf(cur) {
                return total;
            }
            cur = self.node(cur).right.expect("internal node has children");
        }
    }

    fn leftmost_vis_leaf(&self, mut n: RopeRef) -> Result<RopeRef> {
        loop {
            if self.is_leaf(n) {
                if self.node(n).vis_weight == 0 {
                    return Err(DocError::Corrupt(
                        "visible weight led to an invisible leaf".to_string(),
                    ));
                }
                return Ok(n);
            }
            if self.node(n).vis_weight > 0 {
                n = self.node(n).left.expect("internal node has children");
            } else {
                n = self.node(n).right.expect("internal node has children");
            }
        }
    }

    fn rightmost_vis_leaf(&self, mut n: RopeRef) -> Result<RopeRef> {
        loop {
            if self.is_leaf(n) {
                if self.node(n).vis_weight == 0 {
                    return Err(DocError::Corrupt(
                        "visible weight led to an invisible leaf".to_string(),
                    ));
                }
                return Ok(n);
            }
            let right = self.node(n).right.expect("internal node has children");
            if self.subtree_vis_weight(right) > 0 {
                n = right;
            } else {
                n = self.node(n).left.expect("internal node has children");
            }
        }
    }

    fn leaf_id(&self, arena: &NodeArena, n: RopeRef) -> Id {
        let f = self.node(n).leaf.expect("leaf");
        arena.node(f).id.clone()
    }

    pub fn left_tot_sibling(&self, arena: &NodeArena, n: RopeRef) -> Result<RopeRef> {
        let mut cur = n;
        while let Some(p) = self.node(cur).parent {
            if self.side(cur) == Side::Right {
                return Ok(self.rightmost_leaf(self.node(p).left.expect("internal")));
            }
            cur = p;
        }
        Err(DocError::NoLeftTotSibling(self.leaf_id(arena, n)))
    }

    pub fn right_tot_sibling(&self, arena: &NodeArena, n: RopeRef) -> Result<RopeRef> {
        let mut cur = n;
        while let Some(p) = self.node(cur).parent {
            if self.side(cur) == Side::Left {
                return Ok(self.leftmost_leaf(self.node(p).right.expect("internal")));
            }
            cur = p;
        }
        Err(DocError::NoRightTotSibling(self.leaf_id(arena, n)))
    }

    pub fn left_vis_sibling(&self, arena: &NodeArena, n: RopeRef) -> Result<RopeRef> {
        let mut cur = n;
        while let Some(p) = self.node(cur).parent {
            if self.side(cur) == Side::Right && self.node(p).vis_weight > 0 {
                return self.rightmost_vis_leaf(self.node(p).left.expect("internal"));
            }
            cur = p;
        }
        Err(DocError::NoLeftVisSibling(self.leaf_id(arena, n)))
    }

    pub fn right_vis_sibling(&self, arena: &NodeArena, n: RopeRef) -> Result<RopeRef> {
        let mut cur = n;
        while let Some(p) = self.node(cur).parent {
            let right = self.node(p).right.expect("internal");
            if self.side(cur) == Side::Left && self.subtree_vis_weight(right) > 0 {
                return self.leftmost_vis_leaf(right);
            }
            cur = p;
        }
        Err(DocError::NoRightVisSibling(self.leaf_id(arena, n)))
    }

    /// Unit immediately right of `id` in total order.
    pub fn tot_right_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        let (rope, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        if *id == arena.node(fugue).rightmost_id() {
            let sib = self.right_tot_sibling(arena, rope)?;
            let f = self.node(sib).leaf.expect("leaf");
            return Ok(arena.node(f).leftmost_id());
        }
        Ok(id.offset(1))
    }

    /// Unit immediately left of `id` in total order.
    pub fn tot_left_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        let (rope, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        if *id == arena.node(fugue).leftmost_id() {
            let sib = self.left_tot_sibling(arena, rope)?;
            let f = self.node(sib).leaf.expect("leaf");
            return Ok(arena.node(f).rightmost_id());
        }
        Ok(id.offset(-1))
    }

    /// Nearest visible unit right of `id`.
    pub fn vis_right_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        let (rope, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let n = arena.node(fugue);
        let tot_offset = (id.seq - n.id.seq) as usize;
        for i in tot_offset + 1..n.len() {
            if !n.is_deleted[i] {
                return Ok(n.unit_id(i));
            }
        }
        let sib = self.right_vis_sibling(arena, rope)?;
        let f = self.node(sib).leaf.expect("leaf");
        arena.node(f).leftmost_vis_id()
    }

    /// Nearest visible unit left of `id`.
    pub fn vis_left_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        let (rope, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let n = arena.node(fugue);
        let tot_offset = (id.seq - n.id.seq) as usize;
        for i in (0..tot_offset).rev() {
            if !n.is_deleted[i] {
                return Ok(n.unit_id(i));
            }
        }
        let sib = self.left_vis_sibling(arena, rope)?;
        let f = self.node(sib).leaf.expect("leaf");
        arena.node(f).rightmost_vis_id()
    }

    pub fn is_deleted(&self, arena: &NodeArena, id: &Id) -> Result<bool> {
        let (_, fugue) = self
            .index
            .get(id, arena)
            .ok_or_else(|| DocError::NotInRope(id.clone()))?;
        let n = arena.node(fugue);
        Ok(n.is_deleted[(id.seq - n.id.seq) as usize])
    }

    /// `id` itself if visible, otherwise the nearest visible unit to the
    /// left.
    pub fn nearest_vis_left_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        if !self.is_deleted(arena, id)? {
            return Ok(id.clone());
        }
        self.vis_left_of(arena, id)
    }

    /// `id` itself if visible, otherwise the nearest visible unit to the
    /// right.
    pub fn nearest_vis_right_of(&self, arena: &NodeArena, id: &Id) -> Result<Id> {
        if !self.is_deleted(arena, id)? {
            return Ok(id.clone());
        }
        self.vis_right_of(arena, id)
    }

    /// Visible text and ids between two unit ids, inclusive. Tombstoned
    /// endpoints clamp inward; an empty span is not an error.
    pub fn get_between(&self, arena: &NodeArena, start_id: &Id, end_id: &Id) -> Result<VisSpan> {
        let mut start = start_id.clone();
        let mut end = end_id.clone();

        if self.is_deleted(arena, &start)? {
            match self.vis_right_of(arena, &start) {
                Ok(id) => start = id,
                Err(DocError::NoRightVisSibling(_)) => return Ok(VisSpan::default()),
                Err(e) => return Err(e),
            }
        }
        if self.is_deleted(arena, &end)? {
            match self.vis_left_of(arena, &end) {
                Ok(id) => end = id,
                Err(DocError::NoLeftVisSibling(_)) => return Ok(VisSpan::default()),
                Err(e) => return Err(e),
            }
        }

        let (start_vis, _) = self.get_index(arena, &start)?;
        let (end_vis, _) = self.get_index(arena, &end)?;
        let (Some(start_vis), Some(end_vis)) = (start_vis, end_vis) else {
            return Err(DocError::Corrupt(
                "clamped span endpoint is not visible".to_string(),
            ));
        };
        if start_vis > end_vis {
            return Ok(VisSpan::default());
        }

        let mut out = VisSpan {
            ids: Vec::with_capacity(end_vis - start_vis + 1),
            text: Vec::with_capacity(end_vis - start_vis + 1),
        };

        let (mut rope, _) = self
            .index
            .get(&start, arena)
            .ok_or_else(|| DocError::NotInRope(start.clone()))?;
        loop {
            let f = self.node(rope).leaf.expect("leaf");
            let is_start = arena.node(f).contains_id(&start);
            let is_end = arena.node(f).contains_id(&end);

            for (id, c, del) in arena.units(f) {
                if is_start && id.seq < start.seq {
                    continue;
                }
                if !del {
                    out.ids.push(id.clone());
                    out.text.push(c);
                }
                if is_end && id.seq >= end.seq {
                    return Ok(out);
                }
            }

            rope = self.right_vis_sibling(arena, rope)?;
        }
    }

    /// Every unit between two unit ids, inclusive, tombstones included.
    pub fn get_tot_between(&self, arena: &NodeArena, start_id: &Id, end_id: &Id) -> Result<TotSpan> {
        let (_, start_tot) = self.get_index(arena, start_id)?;
        let (_, end_tot) = self.get_index(arena, end_id)?;
        if start_tot > end_tot {
            return Ok(TotSpan::default());
        }

        let mut out = TotSpan {
            ids: Vec::with_capacity(end_tot - start_tot + 1),
            text: Vec::with_capacity(end_tot - start_tot + 1),
            is_deleted: Vec::with_capacity(end_tot - start_tot + 1),
            deleted: 0,
        };

        let (mut rope, _) = self
            .index
            .get(start_id, arena)
            .ok_or_else(|| DocError::NotInRope(start_id.clone()))?;
        loop {
            let f = self.node(rope).leaf.expect("leaf");
            let is_start = arena.node(f).contains_id(start_id);
            let is_end = arena.node(f).contains_id(end_id);

            for (id, c, del) in arena.units(f) {
                if is_start && id.seq < start_id.seq {
                    continue;
                }
                let at_end = is_end && id.seq >= end_id.seq;
                out.ids.push(id);
                out.text.push(c);
                out.is_deleted.push(del);
                if del {
                    out.deleted += 1;
                }
                if at_end {
                    return Ok(out);
                }
            }

            rope = self.right_tot_sibling(arena, rope)?;
        }
    }

    /// Walk leaves left to right starting at the leaf containing
    /// `start_id`.
    pub fn walk_right<F>(&self, arena: &NodeArena, start_id: &Id, mut f: F) -> Result<()>
    where
        F: FnMut(FugueRef) -> Result<Visit>,
    {
        let (mut rope, _) = self
            .index
            .get(start_id, arena)
            .ok_or_else(|| DocError::NotInRope(start_id.clone()))?;
        loop {
            let leaf = self.node(rope).leaf.expect("leaf");
            if f(leaf)? == Visit::Stop {
                return Ok(());
            }
            match self.right_tot_sibling(arena, rope) {
                Ok(next) => rope = next,
                Err(DocError::NoRightTotSibling(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Visible size derived from the right spine.
    pub fn vis_size(&self) -> usize {
        let mut size = 0;
        let mut cur = self.root;
        while let Some(n) = cur {
            size += self.node(n).vis_weight;
            cur = self.node(n).right;
        }
        size
    }

    pub fn vis_to_tot_ix(&self, arena: &NodeArena, vis_ix: usize) -> Result<usize> {
        let id = self.get_vis_id(arena, vis_ix)?;
        let (_, tot) = self.get_index(arena, &id)?;
        Ok(tot)
    }

    /// Full structural validation: cached weights, heights, AVL balance,
    /// parent links.
    pub fn validate(&self, arena: &NodeArena) -> Result<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        if self.node(root).parent.is_some() {
            return Err(DocError::Corrupt("rope root has a parent".to_string()));
        }
        self.validate_node(arena, root)?;
        Ok(())
    }

    /// Returns `(vis, tot, height)` of the subtree.
    fn validate_node(&self, arena: &NodeArena, h: RopeRef) -> Result<(usize, usize, i32)> {
        let n = self.node(h);
        if let Some(f) = n.leaf {
            if n.left.is_some() || n.right.is_some() {
                return Err(DocError::Corrupt("leaf with children".to_string()));
            }
            let tot = arena.node(f).len();
            let vis = tot - arena.node(f).deleted();
            if n.tot_weight != tot || n.vis_weight != vis {
                return Err(DocError::Corrupt(format!(
                    "stale leaf weights for {}",
                    arena.node(f).id
                )));
            }
            if n.height != 1 {
                return Err(DocError::Corrupt("leaf height != 1".to_string()));
            }
            return Ok((vis, tot, 1));
        }

        let (Some(l), Some(r)) = (n.left, n.right) else {
            return Err(DocError::Corrupt("internal node missing a child".to_string()));
        };
        if self.node(l).parent != Some(h) || self.node(r).parent != Some(h) {
            return Err(DocError::Corrupt("bad rope parent pointer".to_string()));
        }
        let (lv, lt, lh) = self.validate_node(arena, l)?;
        let (rv, rt, rh) = self.validate_node(arena, r)?;
        if n.vis_weight != lv || n.tot_weight != lt {
            return Err(DocError::Corrupt(format!(
                "cached weights ({}, {}) disagree with left subtree ({lv}, {lt})",
                n.vis_weight, n.tot_weight
            )));
        }
        if n.height != 1 + lh.max(rh) {
            return Err(DocError::Corrupt("bad rope height".to_string()));
        }
        if (lh - rh).abs() > 1 {
            return Err(DocError::Corrupt("rope out of balance".to_string()));
        }
        Ok((lv + rv, lt + rt, n.height))
    }
}
