//! B-link tree node definitions.

use common::BlockPointer;
use serde::{Deserialize, Serialize};
use types::Storable;

/// The type of a B-link tree node. Fixed when the node is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Internal,
    #[default]
    Leaf,
}

/// A node of the index.
///
/// `keys` and `pointers` always have the same length. In a leaf,
/// `pointers[i]` is the head of the value-list chain for `keys[i]`; in an
/// internal node it is the child whose largest key is `keys[i]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexNode<K> {
    pub kind: NodeKind,
    /// Largest key in this node's subtree.
    pub high_key: K,
    /// Loosely maintained back-reference; `None` on the root.
    pub parent: Option<BlockPointer>,
    /// Right sibling on the same level.
    pub link: Option<BlockPointer>,
    pub keys: Vec<K>,
    pub pointers: Vec<BlockPointer>,
}

impl<K: Storable + Ord> IndexNode<K> {
    /// A single-entry leaf, used when the tree is empty.
    pub fn new_leaf(key: K, value_head: BlockPointer) -> Self {
        Self {
            kind: NodeKind::Leaf,
            high_key: key.clone(),
            parent: None,
            link: None,
            keys: vec![key],
            pointers: vec![value_head],
        }
    }

    /// A root whose only child is `child`, about to be split.
    pub fn new_root(child_high_key: K, child: BlockPointer) -> Self {
        Self {
            kind: NodeKind::Internal,
            high_key: child_high_key.clone(),
            parent: None,
            link: None,
            keys: vec![child_high_key],
            pointers: vec![child],
        }
    }

    /// Slot size needed to store a node of the given degree.
    ///
    /// One entry of slack is reserved above `degree`.
    pub fn slot_size(degree: usize) -> usize {
        let entries = degree + 1;
        4 // kind
            + K::MAX_SIZE // high_key
            + 2 * (1 + BlockPointer::MAX_SIZE) // parent, link
            + 8 + entries * K::MAX_SIZE
            + 8 + entries * BlockPointer::MAX_SIZE
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the first key `>= key`, or `len()` when every key is smaller.
    pub fn upper_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// Index of the last key `<= key`, clamped to `0` when every key is larger.
    pub fn lower_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key).saturating_sub(1)
    }

    pub fn insert_entry(&mut self, pos: usize, key: K, pointer: BlockPointer) {
        self.keys.insert(pos, key);
        self.pointers.insert(pos, pointer);
    }

    pub fn remove_entry(&mut self, pos: usize) -> (K, BlockPointer) {
        (self.keys.remove(pos), self.pointers.remove(pos))
    }

    /// Make `high_key` mirror the last key. A no-op on an empty node.
    pub fn refresh_high_key(&mut self) {
        if let Some(last) = self.keys.last() {
            self.high_key = last.clone();
        }
    }

    /// Move entries `[at, len)` into a new right sibling.
    ///
    /// The sibling inherits this node's kind, high key and link; the caller
    /// allocates it and retargets `self.link`.
    pub fn split_off(&mut self, at: usize) -> Self {
        let right = Self {
            kind: self.kind,
            high_key: self.high_key.clone(),
            parent: self.parent,
            link: self.link,
            keys: self.keys.split_off(at),
            pointers: self.pointers.split_off(at),
        };
        self.refresh_high_key();
        right
    }

    /// Append every entry of the right sibling `right`, taking over its
    /// high key and link.
    pub fn absorb(&mut self, mut right: Self) {
        self.keys.append(&mut right.keys);
        self.pointers.append(&mut right.pointers);
        self.high_key = right.high_key;
        self.link = right.link;
    }
}
