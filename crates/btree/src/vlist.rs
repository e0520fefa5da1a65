//! Sorted value-list chains.
//!
//! Every key of a leaf owns one singly linked chain of values, ascending and
//! free of duplicates, stored in the value-list block store.

use common::{BlockPointer, DbResult};
use serde::{Deserialize, Serialize};
use storage::BlockStore;
use types::Storable;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueListNode<V> {
    pub value: V,
    pub next: Option<BlockPointer>,
}

impl<V: Storable> Storable for ValueListNode<V> {
    const MAX_SIZE: usize = V::MAX_SIZE + 1 + BlockPointer::MAX_SIZE;
}

/// Outcome of [`insert_sorted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInsert {
    /// Head of the chain after the call; differs from the old head when the
    /// value sorted first.
    pub head: BlockPointer,
    pub inserted: bool,
}

/// Outcome of [`remove`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainRemove {
    /// `None` once the last value is gone.
    pub head: Option<BlockPointer>,
    pub removed: bool,
}

/// Start a chain holding just `value`.
pub fn new_chain<V, S>(store: &mut S, value: V) -> DbResult<BlockPointer>
where
    S: BlockStore<ValueListNode<V>>,
{
    store.allocate_with(&ValueListNode { value, next: None })
}

/// Insert `value` keeping the chain sorted. An exact duplicate is left alone.
pub fn insert_sorted<V, S>(store: &mut S, head: BlockPointer, value: V) -> DbResult<ChainInsert>
where
    V: Ord,
    S: BlockStore<ValueListNode<V>>,
{
    let first = store.read(head)?;
    if value == first.value {
        return Ok(ChainInsert {
            head,
            inserted: false,
        });
    }
    if value < first.value {
        let new_head = store.allocate_with(&ValueListNode {
            value,
            next: Some(head),
        })?;
        return Ok(ChainInsert {
            head: new_head,
            inserted: true,
        });
    }

    let mut prev_ptr = head;
    let mut prev = first;
    while let Some(next_ptr) = prev.next {
        let next = store.read(next_ptr)?;
        if next.value == value {
            return Ok(ChainInsert {
                head,
                inserted: false,
            });
        }
        if next.value > value {
            break;
        }
        prev_ptr = next_ptr;
        prev = next;
    }

    let node_ptr = store.allocate_with(&ValueListNode {
        value,
        next: prev.next,
    })?;
    prev.next = Some(node_ptr);
    store.write(prev_ptr, &prev)?;

    Ok(ChainInsert {
        head,
        inserted: true,
    })
}

/// Unlink and free the node holding `value`, if any.
pub fn remove<V, S>(store: &mut S, head: BlockPointer, value: &V) -> DbResult<ChainRemove>
where
    V: Ord,
    S: BlockStore<ValueListNode<V>>,
{
    let first = store.read(head)?;
    if first.value == *value {
        store.free(head)?;
        return Ok(ChainRemove {
            head: first.next,
            removed: true,
        });
    }

    let mut prev_ptr = head;
    let mut prev = first;
    while let Some(cur_ptr) = prev.next {
        let cur = store.read(cur_ptr)?;
        if cur.value > *value {
            break;
        }
        if cur.value == *value {
            prev.next = cur.next;
            store.write(prev_ptr, &prev)?;
            store.free(cur_ptr)?;
            return Ok(ChainRemove {
                head: Some(head),
                removed: true,
            });
        }
        prev_ptr = cur_ptr;
        prev = cur;
    }

    Ok(ChainRemove {
        head: Some(head),
        removed: false,
    })
}

/// Every value of the chain, in ascending order.
pub fn collect<V, S>(store: &mut S, head: BlockPointer) -> DbResult<Vec<V>>
where
    S: BlockStore<ValueListNode<V>>,
{
    let mut values = Vec::new();
    let mut cursor = Some(head);
    while let Some(ptr) = cursor {
        let node = store.read(ptr)?;
        values.push(node.value);
        cursor = node.next;
    }
    Ok(values)
}
