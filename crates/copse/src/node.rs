//! Arena node for the AVL map.

/// One arena slot. Links are handles into the owning arena rather than
/// references, so re-linking during rotations is plain index assignment.
#[derive(Debug, Clone)]
pub struct AvlNode<K, V> {
    pub(crate) p: Option<u32>,
    pub(crate) l: Option<u32>,
    pub(crate) r: Option<u32>,
    /// Height of the subtree rooted here; a leaf has height 1.
    pub(crate) height: i32,
    pub(crate) k: K,
    pub(crate) v: V,
}

impl<K, V> AvlNode<K, V> {
    pub(crate) fn new(k: K, v: V) -> Self {
        Self {
            p: None,
            l: None,
            r: None,
            height: 1,
            k,
            v,
        }
    }

    pub fn key(&self) -> &K {
        &self.k
    }

    pub fn value(&self) -> &V {
        &self.v
    }
}
