//! Whole-tree invariant checker.

use common::{BlockPointer, DbResult};
use storage::BlockStore;

use crate::{invariant, vlist, BLinkTree, IndexKey, IndexValue};

/// Shape of a tree that passed [`BLinkTree::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub nodes: u64,
    pub leaves: u64,
    pub keys: u64,
    pub values: u64,
}

impl<K: IndexKey, V: IndexValue> BLinkTree<K, V> {
    /// Walk the whole tree level by level and verify its structure.
    ///
    /// Checked: keys strictly increase within and across the nodes of each
    /// level, `high_key` equals the last key, every separator equals its
    /// child's high key, sizes stay within bounds, all leaves sit at the same
    /// depth, each level's link chain visits its nodes left to right and ends
    /// in `None`, and every value chain is non-empty and strictly ascending.
    /// Finally the live slots of both stores must match what was reached, so
    /// leaked nodes or chain entries are reported too.
    pub fn check(&mut self) -> DbResult<TreeStats> {
        let mut stats = TreeStats::default();
        let Some(root) = self.root else {
            return self.check_allocated(&stats).map(|()| stats);
        };

        let min = self.min_size();
        let mut level: Vec<(BlockPointer, Option<K>)> = vec![(root, None)];

        loop {
            stats.height += 1;
            let mut next_level = Vec::new();
            let mut leaf_level = None;
            let mut prev_high: Option<K> = None;

            for (i, (ptr, expected_high)) in level.iter().enumerate() {
                let node = self.read_node(*ptr)?;
                stats.nodes += 1;

                let is_root = *ptr == root;
                if is_root && node.parent.is_some() {
                    return Err(invariant(format!("root {ptr} has a parent pointer")));
                }
                if node.is_empty() || node.len() >= self.degree {
                    return Err(invariant(format!("{ptr}: size {} out of bounds", node.len())));
                }
                if !is_root && node.len() < min {
                    return Err(invariant(format!("{ptr}: size {} below {min}", node.len())));
                }
                if is_root && !node.is_leaf() && node.len() < 2 {
                    return Err(invariant(format!("internal root {ptr} has one child")));
                }
                if !node.keys.windows(2).all(|w| w[0] < w[1]) {
                    return Err(invariant(format!("{ptr}: keys are not strictly increasing")));
                }
                if node.keys.last() != Some(&node.high_key) {
                    return Err(invariant(format!("{ptr}: high key differs from last key")));
                }
                if let Some(expected) = expected_high {
                    if *expected != node.high_key {
                        return Err(invariant(format!("{ptr}: separator differs from high key")));
                    }
                }
                if let Some(prev) = &prev_high {
                    if node.keys[0] <= *prev {
                        return Err(invariant(format!("{ptr}: overlaps its left sibling")));
                    }
                }
                let expected_link = level.get(i + 1).map(|(next, _)| *next);
                if node.link != expected_link {
                    return Err(invariant(format!(
                        "{ptr}: link {:?} but right neighbour is {expected_link:?}",
                        node.link
                    )));
                }
                match leaf_level {
                    None => leaf_level = Some(node.is_leaf()),
                    Some(leaf) if leaf != node.is_leaf() => {
                        return Err(invariant(format!(
                            "level {} mixes leaves and internal nodes",
                            stats.height
                        )));
                    }
                    Some(_) => {}
                }

                if node.is_leaf() {
                    stats.leaves += 1;
                    stats.keys += node.len() as u64;
                    for &head in &node.pointers {
                        let values = vlist::collect(&mut self.values, head)?;
                        if !values.windows(2).all(|w| w[0] < w[1]) {
                            return Err(invariant(format!(
                                "{ptr}: value chain {head} is not strictly ascending"
                            )));
                        }
                        stats.values += values.len() as u64;
                    }
                } else {
                    next_level.extend(
                        node.pointers
                            .iter()
                            .zip(&node.keys)
                            .map(|(&child, key)| (child, Some(key.clone()))),
                    );
                }
                prev_high = Some(node.high_key);
            }

            if leaf_level == Some(true) {
                break;
            }
            level = next_level;
        }

        self.check_allocated(&stats)?;
        Ok(stats)
    }

    fn check_allocated(&self, stats: &TreeStats) -> DbResult<()> {
        if self.nodes.allocated() != stats.nodes {
            return Err(invariant(format!(
                "{} index nodes allocated, {} reachable",
                self.nodes.allocated(),
                stats.nodes
            )));
        }
        if self.values.allocated() != stats.values {
            return Err(invariant(format!(
                "{} value nodes allocated, {} reachable",
                self.values.allocated(),
                stats.values
            )));
        }
        Ok(())
    }
}
