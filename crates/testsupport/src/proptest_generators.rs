//! Property-based test generators using proptest.
//!
//! Scripts draw keys and values from small ranges so that duplicates,
//! repeated erases and erases of absent pairs all show up often.

use proptest::prelude::*;

/// One multimap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert { key: u32, value: i32 },
    Erase { key: u32, value: i32 },
    Find { key: u32 },
}

/// Strategy for a single operation over `keys` distinct keys and `values`
/// distinct values. Inserts are weighted up so trees grow deep enough to
/// split and merge.
pub fn arb_op(keys: u32, values: i32) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..keys, 0..values).prop_map(|(key, value)| Op::Insert { key, value }),
        3 => (0..keys, 0..values).prop_map(|(key, value)| Op::Erase { key, value }),
        1 => (0..keys).prop_map(|key| Op::Find { key }),
    ]
}

/// Strategy for a script of up to `max_len` operations.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_script;
///
/// proptest! {
///     #[test]
///     fn scripts_are_bounded(script in arb_script(20)) {
///         assert!(script.len() <= 20);
///     }
/// }
/// ```
pub fn arb_script(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(64, 4), 0..=max_len)
}

/// Strategy for a set of distinct keys, inserted in random order.
pub fn arb_distinct_keys(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(0u32..10_000, 1..=max_len)
        .prop_map(|keys| keys.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Strategy for a title key that always fits a 64-byte key.
pub fn arb_title_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{1,64}"
}
