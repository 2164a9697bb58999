//! The AVL map itself.

use std::cmp::Ordering;

use crate::node::AvlNode;

/// Ordered map over a `Vec`-backed arena.
///
/// Slots of removed entries become `None` and are recycled through a free
/// list, so a handle returned by a lookup stays valid until that entry is
/// removed. Heights are maintained on every structural change;
/// `|height(l) - height(r)| <= 1` holds at every node (checked by
/// [`AvlMap::assert_valid`]).
#[derive(Debug, Clone)]
pub struct AvlMap<K, V> {
    nodes: Vec<Option<AvlNode<K, V>>>,
    root: Option<u32>,
    free: Vec<u32>,
    len: usize,
}

impl<K: Ord, V> Default for AvlMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> AvlMap<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    fn node(&self, h: u32) -> &AvlNode<K, V> {
        self.nodes[h as usize].as_ref().expect("live handle")
    }

    fn node_mut(&mut self, h: u32) -> &mut AvlNode<K, V> {
        self.nodes[h as usize].as_mut().expect("live handle")
    }

    pub fn key(&self, h: u32) -> &K {
        &self.node(h).k
    }

    pub fn value(&self, h: u32) -> &V {
        &self.node(h).v
    }

    pub fn value_mut(&mut self, h: u32) -> &mut V {
        &mut self.node_mut(h).v
    }

    fn height(&self, h: Option<u32>) -> i32 {
        match h {
            Some(i) => self.node(i).height,
            None => 0,
        }
    }

    fn balance_factor(&self, h: u32) -> i32 {
        let n = self.node(h);
        self.height(n.l) - self.height(n.r)
    }

    fn update_height(&mut self, h: u32) {
        let (l, r) = {
            let n = self.node(h);
            (n.l, n.r)
        };
        let height = 1 + self.height(l).max(self.height(r));
        self.node_mut(h).height = height;
    }

    fn alloc(&mut self, k: K, v: V) -> u32 {
        match self.free.pop() {
            Some(i) => {
                self.nodes[i as usize] = Some(AvlNode::new(k, v));
                i
            }
            None => {
                self.nodes.push(Some(AvlNode::new(k, v)));
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Point `n`'s parent (or the root slot) at `to` instead of `n`.
    fn replace_in_parent(&mut self, n: u32, p: Option<u32>, to: Option<u32>) {
        match p {
            Some(pi) => {
                if self.node(pi).l == Some(n) {
                    self.node_mut(pi).l = to;
                } else {
                    self.node_mut(pi).r = to;
                }
            }
            None => self.root = to,
        }
        if let Some(t) = to {
            self.node_mut(t).p = p;
        }
    }

    fn rotate_right(&mut self, n: u32) -> u32 {
        let x = self.node(n).l.expect("left child exists");
        let xr = self.node(x).r;
        let p = self.node(n).p;

        self.node_mut(n).l = xr;
        if let Some(c) = xr {
            self.node_mut(c).p = Some(n);
        }
        self.node_mut(x).r = Some(n);
        self.node_mut(n).p = Some(x);
        self.replace_in_parent(n, p, Some(x));

        self.update_height(n);
        self.update_height(x);
        x
    }

    fn rotate_left(&mut self, n: u32) -> u32 {
        let y = self.node(n).r.expect("right child exists");
        let yl = self.node(y).l;
        let p = self.node(n).p;

        self.node_mut(n).r = yl;
        if let Some(c) = yl {
            self.node_mut(c).p = Some(n);
        }
        self.node_mut(y).l = Some(n);
        self.node_mut(n).p = Some(y);
        self.replace_in_parent(n, p, Some(y));

        self.update_height(n);
        self.update_height(y);
        y
    }

    /// Restore the AVL invariant at `n`; returns the root of the
    /// rebalanced subtree.
    fn rebalance(&mut self, n: u32) -> u32 {
        self.update_height(n);
        let bf = self.balance_factor(n);
        if bf > 1 {
            let l = self.node(n).l.expect("left-heavy");
            if self.balance_factor(l) < 0 {
                self.rotate_left(l);
            }
            return self.rotate_right(n);
        }
        if bf < -1 {
            let r = self.node(n).r.expect("right-heavy");
            if self.balance_factor(r) > 0 {
                self.rotate_right(r);
            }
            return self.rotate_left(n);
        }
        n
    }

    /// Rebalance every ancestor starting at `from` up to the root.
    fn rebalance_up(&mut self, mut from: Option<u32>) {
        while let Some(n) = from {
            let sub = self.rebalance(n);
            from = self.node(sub).p;
            if from.is_none() {
                self.root = Some(sub);
            }
        }
    }

    /// Insert `v` under `k`, returning the previous value if the key was
    /// already present.
    pub fn insert(&mut self, k: K, v: V) -> Option<V> {
        let mut cur = match self.root {
            Some(r) => r,
            None => {
                let h = self.alloc(k, v);
                self.root = Some(h);
                self.len = 1;
                return None;
            }
        };

        loop {
            match k.cmp(&self.node(cur).k) {
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.node_mut(cur).v, v));
                }
                Ordering::Less => match self.node(cur).l {
                    Some(l) => cur = l,
                    None => {
                        let h = self.alloc(k, v);
                        self.node_mut(h).p = Some(cur);
                        self.node_mut(cur).l = Some(h);
                        self.len += 1;
                        self.rebalance_up(Some(cur));
                        return None;
                    }
                },
                Ordering::Greater => match self.node(cur).r {
                    Some(r) => cur = r,
                    None => {
                        let h = self.alloc(k, v);
                        self.node_mut(h).p = Some(cur);
                        self.node_mut(cur).r = Some(h);
                        self.len += 1;
                        self.rebalance_up(Some(cur));
                        return None;
                    }
                },
            }
        }
    }

    pub fn find(&self, k: &K) -> Option<u32> {
        let mut cur = self.root;
        while let Some(i) = cur {
            match k.cmp(&self.node(i).k) {
                Ordering::Equal => return Some(i),
                Ordering::Less => cur = self.node(i).l,
                Ordering::Greater => cur = self.node(i).r,
            }
        }
        None
    }

    pub fn get(&self, k: &K) -> Option<&V> {
        self.find(k).map(|i| &self.node(i).v)
    }

    pub fn get_mut(&mut self, k: &K) -> Option<&mut V> {
        match self.find(k) {
            Some(i) => Some(&mut self.node_mut(i).v),
            None => None,
        }
    }

    pub fn contains_key(&self, k: &K) -> bool {
        self.find(k).is_some()
    }

    /// Greatest entry with key `<= k` (floor).
    pub fn left_sib(&self, k: &K) -> Option<u32> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(i) = cur {
            match self.node(i).k.cmp(k) {
                Ordering::Equal => return Some(i),
                Ordering::Less => {
                    best = Some(i);
                    cur = self.node(i).r;
                }
                Ordering::Greater => cur = self.node(i).l,
            }
        }
        best
    }

    /// Least entry with key `>= k` (ceiling).
    pub fn right_sib(&self, k: &K) -> Option<u32> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(i) = cur {
            match self.node(i).k.cmp(k) {
                Ordering::Equal => return Some(i),
                Ordering::Less => cur = self.node(i).r,
                Ordering::Greater => {
                    best = Some(i);
                    cur = self.node(i).l;
                }
            }
        }
        best
    }

    pub fn first(&self) -> Option<u32> {
        let mut cur = self.root?;
        while let Some(l) = self.node(cur).l {
            cur = l;
        }
        Some(cur)
    }

    pub fn last(&self) -> Option<u32> {
        let mut cur = self.root?;
        while let Some(r) = self.node(cur).r {
            cur = r;
        }
        Some(cur)
    }

    /// In-order successor of `h`.
    pub fn next(&self, h: u32) -> Option<u32> {
        if let Some(r) = self.node(h).r {
            let mut cur = r;
            while let Some(l) = self.node(cur).l {
                cur = l;
            }
            return Some(cur);
        }
        let mut cur = h;
        let mut p = self.node(h).p;
        while let Some(pi) = p {
            if self.node(pi).l == Some(cur) {
                return Some(pi);
            }
            cur = pi;
            p = self.node(pi).p;
        }
        None
    }

    /// In-order predecessor of `h`.
    pub fn prev(&self, h: u32) -> Option<u32> {
        if let Some(l) = self.node(h).l {
            let mut cur = l;
            while let Some(r) = self.node(cur).r {
                cur = r;
            }
            return Some(cur);
        }
        let mut cur = h;
        let mut p = self.node(h).p;
        while let Some(pi) = p {
            if self.node(pi).r == Some(cur) {
                return Some(pi);
            }
            cur = pi;
            p = self.node(pi).p;
        }
        None
    }

    pub fn remove(&mut self, k: &K) -> Option<V> {
        let mut target = self.find(k)?;

        // Two children: swap payload with the in-order successor, which has
        // no left child, and unlink that node instead.
        if self.node(target).l.is_some() && self.node(target).r.is_some() {
            let succ = self.next(target).expect("right subtree is non-empty");
            let (a, b) = (target as usize, succ as usize);
            let (lo, hi) = (a.min(b), a.max(b));
            let (head, tail) = self.nodes.split_at_mut(hi);
            let x = head[lo].as_mut().expect("live handle");
            let y = tail[0].as_mut().expect("live handle");
            std::mem::swap(&mut x.k, &mut y.k);
            std::mem::swap(&mut x.v, &mut y.v);
            target = succ;
        }

        let p = self.node(target).p;
        let child = self.node(target).l.or(self.node(target).r);
        self.replace_in_parent(target, p, child);
        self.rebalance_up(p);

        self.len -= 1;
        self.free.push(target);
        let node = self.nodes[target as usize].take().expect("live handle");
        Some(node.v)
    }

    /// Visit entries in order; the callback returns `false` to stop early.
    pub fn for_each<F: FnMut(&K, &V) -> bool>(&self, mut f: F) {
        let mut cur = self.first();
        while let Some(h) = cur {
            let n = self.node(h);
            if !f(&n.k, &n.v) {
                return;
            }
            cur = self.next(h);
        }
    }

    /// Visit entries in reverse order; the callback returns `false` to
    /// stop early.
    pub fn for_each_rev<F: FnMut(&K, &V) -> bool>(&self, mut f: F) {
        let mut cur = self.last();
        while let Some(h) = cur {
            let n = self.node(h);
            if !f(&n.k, &n.v) {
                return;
            }
            cur = self.prev(h);
        }
    }

    /// Visit every entry with `lo <= key <= hi` in order; the callback
    /// returns `false` to stop early.
    pub fn visit_between<F: FnMut(&K, &V) -> bool>(&self, lo: &K, hi: &K, mut f: F) {
        let mut cur = self.right_sib(lo);
        while let Some(h) = cur {
            let n = self.node(h);
            if n.k > *hi {
                return;
            }
            if !f(&n.k, &n.v) {
                return;
            }
            cur = self.next(h);
        }
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            cur: self.first(),
        }
    }

    /// Structural validation: BST order, heights, balance, parent links.
    pub fn assert_valid(&self) -> Result<(), String> {
        let mut count = 0usize;
        if let Some(root) = self.root {
            if self.node(root).p.is_some() {
                return Err("root has a parent".to_string());
            }
            self.validate_node(root, &mut count)?;
        }
        if count != self.len {
            return Err(format!("len {} but {} reachable nodes", self.len, count));
        }
        Ok(())
    }

    fn validate_node(&self, h: u32, count: &mut usize) -> Result<i32, String> {
        *count += 1;
        let n = self.node(h);
        let mut lh = 0;
        let mut rh = 0;
        if let Some(l) = n.l {
            if self.node(l).p != Some(h) {
                return Err(format!("bad parent link at {l}"));
            }
            if self.node(l).k >= n.k {
                return Err(format!("order violation at {h}"));
            }
            lh = self.validate_node(l, count)?;
        }
        if let Some(r) = n.r {
            if self.node(r).p != Some(h) {
                return Err(format!("bad parent link at {r}"));
            }
            if self.node(r).k <= n.k {
                return Err(format!("order violation at {h}"));
            }
            rh = self.validate_node(r, count)?;
        }
        if n.height != 1 + lh.max(rh) {
            return Err(format!("bad height at {h}"));
        }
        if (lh - rh).abs() > 1 {
            return Err(format!("unbalanced at {h}"));
        }
        Ok(n.height)
    }
}

/// In-order iterator over `(&K, &V)`.
pub struct Iter<'a, K, V> {
    map: &'a AvlMap<K, V>,
    cur: Option<u32>,
}

impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.cur?;
        self.cur = self.map.next(h);
        let n = self.map.nodes[h as usize].as_ref().expect("live handle");
        Some((&n.k, &n.v))
    }
}
