//! Arena-based AVL ordered-map utilities.
//!
//! Tree structures that need parent pointers and in-place surgery are
//! awkward to express with owned references in Rust, so every "pointer"
//! here is an `Option<u32>` index into a [`Vec`]-backed arena. Node handles
//! are stable for the lifetime of the entry: they survive rotations and are
//! only recycled after the entry is removed.
//!
//! The crate provides:
//!
//! - [`AvlMap`] — an ordered map with the usual insert/get/remove plus the
//!   operations ordered CRDT indexes lean on: floor/ceiling search
//!   ([`AvlMap::left_sib`] / [`AvlMap::right_sib`]), handle-based in-order
//!   stepping ([`AvlMap::next`] / [`AvlMap::prev`]), and bounded range
//!   visitation ([`AvlMap::visit_between`]).
//! - [`merge_visit`] — in-order traversal across several maps at once.
//! - [`AvlMap::assert_valid`] — structural validation used by tests.

mod map;
mod merge;
mod node;

pub use map::{AvlMap, Iter};
pub use merge::merge_visit;
pub use node::AvlNode;
