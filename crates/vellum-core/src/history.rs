//! Per-character tombstone/resurrection history.
//!
//! Every delete, show, and rewind that touches a unit leaves a marker in
//! that unit's history tree. The largest marker id wins: visibility is
//! last-writer-wins by Lamport order, which is what lets a delete and a
//! concurrent undo of an earlier delete coexist without diverging.

use std::collections::HashMap;

use copse::AvlMap;

use crate::id::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: Id,
    pub is_del: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CharHistory {
    map: HashMap<Id, AvlMap<Id, bool>>,
}

impl CharHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target: &Id, marker: Marker) {
        self.map
            .entry(target.clone())
            .or_default()
            .insert(marker.id, marker.is_del);
    }

    /// Current winner for `target`. A unit with no history is visible.
    pub fn max(&self, target: &Id) -> Marker {
        if let Some(tree) = self.map.get(target) {
            if let Some(h) = tree.last() {
                return Marker {
                    id: tree.key(h).clone(),
                    is_del: *tree.value(h),
                };
            }
        }
        Marker {
            id: target.clone(),
            is_del: false,
        }
    }

    /// Oldest marker for `target`, if any.
    pub fn min(&self, target: &Id) -> Option<Marker> {
        let tree = self.map.get(target)?;
        let h = tree.first()?;
        Some(Marker {
            id: tree.key(h).clone(),
            is_del: *tree.value(h),
        })
    }

    /// Marker tree for `target`, ordered by marker id.
    pub fn markers(&self, target: &Id) -> Option<&AvlMap<Id, bool>> {
        self.map.get(target)
    }

    /// Latest marker at or before the causal cut `contains` describes;
    /// `None` when no marker is inside the cut.
    pub fn max_at<F: Fn(&Id) -> bool>(&self, target: &Id, contains: F) -> Option<Marker> {
        let tree = self.map.get(target)?;
        let mut cur = tree.last();
        while let Some(h) = cur {
            if contains(tree.key(h)) {
                return Some(Marker {
                    id: tree.key(h).clone(),
                    is_del: *tree.value(h),
                });
            }
            cur = tree.prev(h);
        }
        None
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_is_last_writer_by_lamport_order() {
        let target = Id::new("a", 0);
        let mut h = CharHistory::new();
        assert!(!h.max(&target).is_del);

        h.add(
            &target,
            Marker {
                id: Id::new("b", 5),
                is_del: true,
            },
        );
        h.add(
            &target,
            Marker {
                id: Id::new("c", 3),
                is_del: false,
            },
        );
        // Seq 5 beats seq 3 regardless of arrival order.
        assert!(h.max(&target).is_del);

        h.add(
            &target,
            Marker {
                id: Id::new("a", 9),
                is_del: false,
            },
        );
        assert!(!h.max(&target).is_del);
    }

    #[test]
    fn max_at_respects_the_cut() {
        let target = Id::new("a", 0);
        let mut h = CharHistory::new();
        h.add(
            &target,
            Marker {
                id: Id::new("b", 2),
                is_del: true,
            },
        );
        h.add(
            &target,
            Marker {
                id: Id::new("b", 8),
                is_del: false,
            },
        );

        let at_five = h.max_at(&target, |id| id.seq <= 5).unwrap();
        assert_eq!(at_five.id, Id::new("b", 2));
        assert!(at_five.is_del);
        assert!(h.max_at(&target, |id| id.seq <= 1).is_none());
    }
}
