//! Persistent B-link tree multimap.
//!
//! Keys live in [`IndexNode`]s stored in one block file; every key of a leaf
//! points at the head of a sorted value-list chain stored in a second block
//! file. Every node carries the largest key of its subtree (`high_key`) and
//! a link to its right sibling, so a descent that overshoots can always move
//! right instead of failing.
//!
//! Mutations record the root-to-leaf [`Route`] they took and reuse it for
//! bottom-up maintenance: splits after an insert, borrowing and merging
//! after an erase.

mod cache;
mod check;
mod node;
pub mod vlist;


pub use cache::HeadCache;
pub use check::TreeStats;
pub use node::{IndexNode, NodeKind};
pub use vlist::ValueListNode;

use std::fmt;
use std::fs;
use std::hash::Hash;

use common::{BlockPointer, Config, DbError, DbResult};
use serde::{Deserialize, Serialize};
use storage::{BlockFile, BlockStore};
use tracing::{debug, trace};
use types::Storable;

/// Key record accepted by the tree.
pub trait IndexKey: Storable + Ord + Hash + fmt::Debug {}

impl<T: Storable + Ord + Hash + fmt::Debug> IndexKey for T {}

/// Value record accepted by the tree.
pub trait IndexValue: Storable + Ord + fmt::Debug {}

impl<T: Storable + Ord + fmt::Debug> IndexValue for T {}

/// Info record of the index-node store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeInfo {
    pub root: Option<BlockPointer>,
    pub degree: u64,
}

impl Storable for TreeInfo {
    const MAX_SIZE: usize = 1 + BlockPointer::MAX_SIZE + 8;
}

type NodeFile<K> = BlockFile<IndexNode<K>, TreeInfo>;
type ValueFile<V> = BlockFile<ValueListNode<V>, ()>;

/// One `(node, position)` pair of a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteStep {
    pub node: BlockPointer,
    pub pos: usize,
}

/// Root-to-leaf path recorded by a descent.
///
/// For internal nodes `pos` is the index of the child that was followed. For
/// the leaf it is the bound that was asked for; `pos == leaf.len()` means the
/// key sorts past every key in the leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    steps: Vec<RouteStep>,
}

impl Route {
    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn leaf(&self) -> Option<RouteStep> {
        self.steps.last().copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    Upper,
    Lower,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sibling {
    Left,
    Right,
}

/// Result of a descent: the route plus the leaf it ended in.
struct Descent<K> {
    route: Route,
    leaf_ptr: BlockPointer,
    pos: usize,
    leaf: IndexNode<K>,
}

fn invariant(msg: impl Into<String>) -> DbError {
    DbError::Invariant(msg.into())
}

/// An open multimap session over one pair of block files.
pub struct BLinkTree<K: IndexKey, V: IndexValue> {
    name: String,
    degree: usize,
    root: Option<BlockPointer>,
    nodes: NodeFile<K>,
    values: ValueFile<V>,
    cache: HeadCache<K>,
}

impl<K: IndexKey, V: IndexValue> BLinkTree<K, V> {
    /// Open (or create) the session stored under `config.data_dir` with the
    /// given file name prefix.
    pub fn open(config: &Config, name: &str) -> DbResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let (mut nodes, existed) = NodeFile::<K>::open(
            &config.index_path(name),
            config.node_capacity,
            IndexNode::<K>::slot_size(config.degree),
        )?;
        let (values, _) = ValueFile::<V>::open(
            &config.vlist_path(name),
            config.value_capacity,
            ValueListNode::<V>::MAX_SIZE,
        )?;

        let mut info = nodes.read_info();
        if existed {
            if info.degree != config.degree as u64 {
                return Err(DbError::Layout(format!(
                    "{name}: created with degree {}, opened with {}",
                    info.degree, config.degree
                )));
            }
        } else {
            info.degree = config.degree as u64;
            nodes.write_info(&info);
        }

        debug!(tree = name, root = ?info.root, existed, degree = config.degree, "opened multimap");

        Ok(Self {
            name: name.to_string(),
            degree: config.degree,
            root: info.root,
            nodes,
            values,
            cache: HeadCache::new(config.cache_capacity),
        })
    }

    /// Persist the root pointer and store metadata.
    pub fn flush(&mut self) -> DbResult<()> {
        self.nodes.flush()?;
        self.values.flush()
    }

    pub fn close(mut self) -> DbResult<()> {
        self.flush()?;
        debug!(tree = %self.name, "closed multimap");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn root(&self) -> Option<BlockPointer> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Route to the first key `>= key`. Empty when the tree is empty.
    pub fn route_to_upper_bound(&mut self, key: &K) -> DbResult<Route> {
        Ok(self
            .descend(key, Bound::Upper, false)?
            .map(|d| d.route)
            .unwrap_or_default())
    }

    /// Route to the last key `<= key`; the leaf position is `0` when every key
    /// of the leaf is larger.
    pub fn route_to_lower_bound(&mut self, key: &K) -> DbResult<Route> {
        Ok(self
            .descend(key, Bound::Lower, false)?
            .map(|d| d.route)
            .unwrap_or_default())
    }

    /// Every value stored under `key`, ascending. Empty when the key is absent.
    pub fn find(&mut self, key: &K) -> DbResult<Vec<V>> {
        if let Some(head) = self.cache.get(key) {
            return vlist::collect(&mut self.values, head);
        }

        let Some(Descent { pos, leaf, .. }) = self.descend(key, Bound::Upper, false)? else {
            return Ok(Vec::new());
        };
        match leaf.keys.get(pos) {
            Some(found) if found == key => {
                let head = leaf.pointers[pos];
                self.cache.put(key.clone(), head);
                vlist::collect(&mut self.values, head)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Add `value` under `key`. Returns `false` when the pair was already
    /// present.
    pub fn insert(&mut self, key: K, value: V) -> DbResult<bool> {
        let Some(Descent {
            route,
            leaf_ptr,
            pos,
            mut leaf,
        }) = self.descend(&key, Bound::Upper, true)?
        else {
            let head = vlist::new_chain(&mut self.values, value)?;
            let root = self
                .nodes
                .allocate_with(&IndexNode::new_leaf(key.clone(), head))?;
            self.set_root(Some(root));
            self.cache.put(key, head);
            debug!(%root, "created root leaf");
            return Ok(true);
        };

        if leaf.keys.get(pos) == Some(&key) {
            let old_head = leaf.pointers[pos];
            let outcome = vlist::insert_sorted(&mut self.values, old_head, value)?;
            if outcome.head != old_head {
                leaf.pointers[pos] = outcome.head;
                self.nodes.write(leaf_ptr, &leaf)?;
            }
            self.cache.put(key, outcome.head);
            return Ok(outcome.inserted);
        }

        let head = vlist::new_chain(&mut self.values, value)?;
        let appended = pos == leaf.len();
        leaf.insert_entry(pos, key.clone(), head);
        if appended {
            leaf.high_key = key.clone();
        }
        self.nodes.write(leaf_ptr, &leaf)?;
        self.cache.put(key.clone(), head);

        let leaf_level = route.len() - 1;
        if appended {
            self.sync_separators(&route, leaf_level, &key)?;
        }
        if leaf.len() >= self.degree {
            self.split_upward(&route)?;
        }
        Ok(true)
    }

    /// Remove `value` from `key`. Returns `false` when the pair was absent.
    pub fn erase(&mut self, key: &K, value: &V) -> DbResult<bool> {
        let Some(Descent {
            route,
            leaf_ptr,
            pos,
            mut leaf,
        }) = self.descend(key, Bound::Upper, true)?
        else {
            return Ok(false);
        };
        if leaf.keys.get(pos) != Some(key) {
            return Ok(false);
        }

        let old_head = leaf.pointers[pos];
        let outcome = vlist::remove(&mut self.values, old_head, value)?;
        if !outcome.removed {
            return Ok(false);
        }
        if let Some(head) = outcome.head {
            if head != old_head {
                leaf.pointers[pos] = head;
                self.nodes.write(leaf_ptr, &leaf)?;
            }
            self.cache.put(key.clone(), head);
            return Ok(true);
        }

        // The chain is gone, so the key leaves the index.
        self.cache.invalidate(key);
        leaf.remove_entry(pos);

        let leaf_level = route.len() - 1;
        if leaf_level == 0 {
            if leaf.is_empty() {
                self.nodes.free(leaf_ptr)?;
                self.set_root(None);
                debug!(root = %leaf_ptr, "freed last leaf, tree is empty");
            } else {
                leaf.refresh_high_key();
                self.nodes.write(leaf_ptr, &leaf)?;
            }
            return Ok(true);
        }

        let high_changed = pos == leaf.len() && !leaf.is_empty();
        leaf.refresh_high_key();
        self.nodes.write(leaf_ptr, &leaf)?;
        if high_changed {
            let high = leaf.high_key.clone();
            self.sync_separators(&route, leaf_level, &high)?;
        }
        if leaf.len() < self.min_size() {
            self.rebalance_upward(&route)?;
        }
        Ok(true)
    }

    /// Split the child at `pos` of `parent_ptr` in two, returning the parent's
    /// new size.
    pub fn split(&mut self, parent_ptr: BlockPointer, pos: usize) -> DbResult<usize> {
        let mut parent = self.read_node(parent_ptr)?;
        let left_ptr = *parent
            .pointers
            .get(pos)
            .ok_or_else(|| invariant(format!("split: {parent_ptr} has no child at {pos}")))?;
        let mut left = self.read_node(left_ptr)?;

        let mut right = left.split_off(left.len() / 2);
        right.parent = Some(parent_ptr);
        let right_ptr = self.nodes.allocate_with(&right)?;

        left.link = Some(right_ptr);
        left.parent = Some(parent_ptr);
        self.nodes.write(left_ptr, &left)?;

        parent.keys.insert(pos, left.high_key.clone());
        parent.pointers.insert(pos + 1, right_ptr);
        self.nodes.write(parent_ptr, &parent)?;

        debug!(
            left = %left_ptr,
            right = %right_ptr,
            left_len = left.len(),
            right_len = right.len(),
            leaf = left.is_leaf(),
            "split node"
        );
        Ok(parent.len())
    }

    /// Shift the last entry of the child at `left_pos` into its right sibling.
    pub fn move_from_left(&mut self, parent_ptr: BlockPointer, left_pos: usize) -> DbResult<()> {
        let (mut parent, left_ptr, right_ptr) = self.sibling_pair(parent_ptr, left_pos)?;
        let mut left = self.read_node(left_ptr)?;
        let mut right = self.read_node(right_ptr)?;
        if left.len() < 2 {
            return Err(invariant(format!("move_from_left: {left_ptr} has nothing to lend")));
        }

        let (key, pointer) = left.remove_entry(left.len() - 1);
        right.insert_entry(0, key, pointer);
        left.refresh_high_key();
        parent.keys[left_pos] = left.high_key.clone();

        self.nodes.write(left_ptr, &left)?;
        self.nodes.write(right_ptr, &right)?;
        self.nodes.write(parent_ptr, &parent)?;
        debug!(from = %left_ptr, to = %right_ptr, "borrowed from left sibling");
        Ok(())
    }

    /// Shift the first entry of the child at `left_pos + 1` into the child at
    /// `left_pos`.
    pub fn move_from_right(&mut self, parent_ptr: BlockPointer, left_pos: usize) -> DbResult<()> {
        let (mut parent, left_ptr, right_ptr) = self.sibling_pair(parent_ptr, left_pos)?;
        let mut left = self.read_node(left_ptr)?;
        let mut right = self.read_node(right_ptr)?;
        if right.len() < 2 {
            return Err(invariant(format!("move_from_right: {right_ptr} has nothing to lend")));
        }

        let (key, pointer) = right.remove_entry(0);
        let end = left.len();
        left.insert_entry(end, key, pointer);
        left.refresh_high_key();
        parent.keys[left_pos] = left.high_key.clone();

        self.nodes.write(left_ptr, &left)?;
        self.nodes.write(right_ptr, &right)?;
        self.nodes.write(parent_ptr, &parent)?;
        debug!(from = %right_ptr, to = %left_ptr, "borrowed from right sibling");
        Ok(())
    }

    /// Fold the child at `left_pos + 1` into the child at `left_pos` and free it.
    pub fn merge(&mut self, parent_ptr: BlockPointer, left_pos: usize) -> DbResult<()> {
        let (mut parent, left_ptr, right_ptr) = self.sibling_pair(parent_ptr, left_pos)?;
        let mut left = self.read_node(left_ptr)?;
        let right = self.read_node(right_ptr)?;

        left.absorb(right);
        self.nodes.write(left_ptr, &left)?;
        self.nodes.free(right_ptr)?;

        parent.keys.remove(left_pos);
        parent.pointers.remove(left_pos + 1);
        self.nodes.write(parent_ptr, &parent)?;
        debug!(into = %left_ptr, freed = %right_ptr, len = left.len(), "merged siblings");
        Ok(())
    }

    /// Spread the entries of two adjacent children evenly between them.
    ///
    /// Merges then re-splits in memory, so the right sibling keeps its slot
    /// and neither node is ever written above its capacity.
    pub fn average(&mut self, parent_ptr: BlockPointer, left_pos: usize) -> DbResult<()> {
        let (mut parent, left_ptr, right_ptr) = self.sibling_pair(parent_ptr, left_pos)?;
        let mut left = self.read_node(left_ptr)?;
        let right = self.read_node(right_ptr)?;

        left.absorb(right);
        let mut right = left.split_off(left.len() / 2);
        right.parent = Some(parent_ptr);
        left.link = Some(right_ptr);
        parent.keys[left_pos] = left.high_key.clone();

        self.nodes.write(left_ptr, &left)?;
        self.nodes.write(right_ptr, &right)?;
        self.nodes.write(parent_ptr, &parent)?;
        debug!(
            left = %left_ptr,
            right = %right_ptr,
            left_len = left.len(),
            right_len = right.len(),
            "averaged siblings"
        );
        Ok(())
    }

    /// Read a node, rejecting a slot whose key and pointer counts disagree.
    fn read_node(&mut self, ptr: BlockPointer) -> DbResult<IndexNode<K>> {
        let node = self.nodes.read(ptr)?;
        if node.keys.len() != node.pointers.len() {
            return Err(invariant(format!(
                "{ptr}: {} keys but {} pointers",
                node.keys.len(),
                node.pointers.len()
            )));
        }
        Ok(node)
    }

    /// Keys of the leaf level, read left to right through the sibling links.
    pub fn keys_in_leaf_order(&mut self) -> DbResult<Vec<K>> {
        let mut keys = Vec::new();
        let Some(mut ptr) = self.root else {
            return Ok(keys);
        };

        let mut node = self.read_node(ptr)?;
        while !node.is_leaf() {
            ptr = *node
                .pointers
                .first()
                .ok_or_else(|| invariant(format!("internal node {ptr} has no children")))?;
            node = self.read_node(ptr)?;
        }
        loop {
            keys.extend(node.keys.iter().cloned());
            match node.link {
                Some(next) => node = self.read_node(next)?,
                None => return Ok(keys),
            }
        }
    }

    fn min_size(&self) -> usize {
        self.degree / 2
    }

    fn set_root(&mut self, root: Option<BlockPointer>) {
        self.root = root;
        self.nodes.write_info(&TreeInfo {
            root,
            degree: self.degree as u64,
        });
    }

    /// Walk from the root to the leaf responsible for `key`.
    ///
    /// Internal nodes always follow the first child whose high key is
    /// `>= key` (the last child when `key` is beyond them all); `bound` only
    /// picks the leaf position. With `repair`, stale parent pointers met on
    /// the way are rewritten.
    fn descend(&mut self, key: &K, bound: Bound, repair: bool) -> DbResult<Option<Descent<K>>> {
        let Some(mut ptr) = self.root else {
            return Ok(None);
        };
        let mut steps: Vec<RouteStep> = Vec::new();

        loop {
            let mut node = self.read_node(ptr)?;
            while *key > node.high_key {
                let Some(next) = node.link else { break };
                trace!(from = %ptr, to = %next, "moving right");
                if let Some(parent_step) = steps.last_mut() {
                    let parent = self.read_node(parent_step.node)?;
                    if parent.pointers.get(parent_step.pos + 1) == Some(&next) {
                        parent_step.pos += 1;
                    }
                }
                ptr = next;
                node = self.read_node(ptr)?;
            }
            if node.is_empty() {
                return Err(invariant(format!("node {ptr} on the search path is empty")));
            }

            if repair {
                let expected = steps.last().map(|step| step.node);
                if node.parent != expected {
                    trace!(
                        node = %ptr,
                        stale = ?node.parent,
                        fresh = ?expected,
                        "refreshing parent pointer"
                    );
                    node.parent = expected;
                    self.nodes.write(ptr, &node)?;
                }
            }

            if node.is_leaf() {
                let pos = match bound {
                    Bound::Upper => node.upper_bound(key),
                    Bound::Lower => node.lower_bound(key),
                };
                steps.push(RouteStep { node: ptr, pos });
                return Ok(Some(Descent {
                    route: Route { steps },
                    leaf_ptr: ptr,
                    pos,
                    leaf: node,
                }));
            }

            let pos = node.upper_bound(key).min(node.len() - 1);
            steps.push(RouteStep { node: ptr, pos });
            ptr = node.pointers[pos];
        }
    }

    /// Write `high` as the separator of the node at `child_level` and keep
    /// going up while that node is its parent's last child.
    fn sync_separators(&mut self, route: &Route, child_level: usize, high: &K) -> DbResult<()> {
        for step in route.steps()[..child_level].iter().rev() {
            let mut parent = self.read_node(step.node)?;
            let separator = parent.keys.get_mut(step.pos).ok_or_else(|| {
                invariant(format!("{} has no separator at {}", step.node, step.pos))
            })?;
            *separator = high.clone();
            let last = step.pos + 1 == parent.len();
            if last {
                parent.high_key = high.clone();
            }
            self.nodes.write(step.node, &parent)?;
            if !last {
                break;
            }
        }
        Ok(())
    }

    /// Split overflowing nodes along `route`, from the leaf up, growing a new
    /// root when the old one overflows.
    fn split_upward(&mut self, route: &Route) -> DbResult<()> {
        let steps = route.steps();
        let mut level = steps.len() - 1;
        loop {
            if level == 0 {
                let old_root_ptr = steps[0].node;
                let mut old_root = self.read_node(old_root_ptr)?;
                if old_root.len() < self.degree {
                    return Ok(());
                }
                let new_root_ptr = self
                    .nodes
                    .allocate_with(&IndexNode::new_root(old_root.high_key.clone(), old_root_ptr))?;
                old_root.parent = Some(new_root_ptr);
                self.nodes.write(old_root_ptr, &old_root)?;
                self.set_root(Some(new_root_ptr));
                debug!(root = %new_root_ptr, child = %old_root_ptr, "grew new root");
                self.split(new_root_ptr, 0)?;
                return Ok(());
            }

            let parent = steps[level - 1];
            if self.split(parent.node, parent.pos)? < self.degree {
                return Ok(());
            }
            level -= 1;
        }
    }

    /// Fix underflowing nodes along `route`, from the leaf up.
    fn rebalance_upward(&mut self, route: &Route) -> DbResult<()> {
        let steps = route.steps();
        let min = self.min_size();
        for level in (1..steps.len()).rev() {
            let node = self.read_node(steps[level].node)?;
            if node.len() >= min {
                break;
            }
            let parent = steps[level - 1];
            self.rebalance_child(parent.node, parent.pos)?;
        }
        self.collapse_root()
    }

    /// Restore the minimum size of the child at `pos` by borrowing from the
    /// richer sibling, or merging when neither has entries to spare.
    fn rebalance_child(&mut self, parent_ptr: BlockPointer, pos: usize) -> DbResult<()> {
        let parent = self.read_node(parent_ptr)?;
        if parent.len() < 2 {
            return Err(invariant(format!(
                "{parent_ptr} has fewer than two children during rebalance"
            )));
        }

        let left_len = match pos.checked_sub(1) {
            Some(left) => Some(self.read_node(parent.pointers[left])?.len()),
            None => None,
        };
        let right_len = match parent.pointers.get(pos + 1) {
            Some(&right) => Some(self.read_node(right)?.len()),
            None => None,
        };

        let (side, sibling_len) = match (left_len, right_len) {
            (Some(l), Some(r)) if l >= r => (Sibling::Left, l),
            (_, Some(r)) => (Sibling::Right, r),
            (Some(l), None) => (Sibling::Left, l),
            (None, None) => {
                return Err(invariant(format!("child {pos} of {parent_ptr} has no sibling")));
            }
        };
        let left_pos = match side {
            Sibling::Left => pos - 1,
            Sibling::Right => pos,
        };

        if sibling_len <= self.min_size() {
            return self.merge(parent_ptr, left_pos);
        }
        if sibling_len + 1 >= self.degree {
            return self.average(parent_ptr, left_pos);
        }
        match side {
            Sibling::Left => self.move_from_left(parent_ptr, left_pos),
            Sibling::Right => self.move_from_right(parent_ptr, left_pos),
        }
    }

    /// Replace an internal root that is down to one child by that child.
    fn collapse_root(&mut self) -> DbResult<()> {
        while let Some(root_ptr) = self.root {
            let root = self.read_node(root_ptr)?;
            if root.is_leaf() || root.len() > 1 {
                break;
            }
            let child_ptr = *root
                .pointers
                .first()
                .ok_or_else(|| invariant(format!("internal root {root_ptr} has no children")))?;
            let mut child = self.read_node(child_ptr)?;
            child.parent = None;
            self.nodes.write(child_ptr, &child)?;
            self.nodes.free(root_ptr)?;
            self.set_root(Some(child_ptr));
            debug!(old = %root_ptr, root = %child_ptr, "collapsed root");
        }
        Ok(())
    }

    /// Validate `left_pos` and return the parent with both sibling pointers.
    fn sibling_pair(
        &mut self,
        parent_ptr: BlockPointer,
        left_pos: usize,
    ) -> DbResult<(IndexNode<K>, BlockPointer, BlockPointer)> {
        let parent = self.read_node(parent_ptr)?;
        if left_pos + 1 >= parent.len() {
            return Err(invariant(format!(
                "{parent_ptr} has no sibling pair at {left_pos} (size {})",
                parent.len()
            )));
        }
        let left = parent.pointers[left_pos];
        let right = parent.pointers[left_pos + 1];
        Ok((parent, left, right))
    }
}

impl<K: IndexKey, V: IndexValue> fmt::Debug for BLinkTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BLinkTree")
            .field("name", &self.name)
            .field("degree", &self.degree)
            .field("root", &self.root)
            .field("nodes", &self.nodes)
            .field("values", &self.values)
            .finish()
    }
}
