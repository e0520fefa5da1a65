//! Random operation scripts checked against an in-memory model.

use std::collections::BTreeMap;

use btree::BLinkTree;
use proptest::prelude::*;
use testsupport::prelude::*;
use testsupport::proptest_generators::{arb_distinct_keys, arb_script, arb_title_text, Op};

fn run_script(degree: usize, script: &[Op]) -> Result<(), TestCaseError> {
    let ctx = TestContext::new(degree).unwrap();
    let mut tree: BLinkTree<u32, i32> = BLinkTree::open(ctx.config(), "model").unwrap();
    let mut model = ModelMultimap::new();

    for op in script {
        let actual = match *op {
            Op::Insert { key, value } => Expected::Changed(tree.insert(key, value).unwrap()),
            Op::Erase { key, value } => Expected::Changed(tree.erase(&key, &value).unwrap()),
            Op::Find { key } => Expected::Values(tree.find(&key).unwrap()),
        };
        prop_assert_eq!(actual, model.apply(op), "after {:?}", op);

        let stats = tree.check().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(stats.keys as usize, model.keys().len());
        prop_assert_eq!(stats.values as usize, model.value_count());
    }

    prop_assert_eq!(tree.keys_in_leaf_order().unwrap(), model.keys());
    prop_assert_eq!(tree.is_empty(), model.is_empty());
    for key in model.keys() {
        prop_assert_eq!(tree.find(&key).unwrap(), model.find(key));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_degree_four_matches_model(script in arb_script(200)) {
        run_script(4, &script)?;
    }

    #[test]
    fn prop_degree_seven_matches_model(script in arb_script(200)) {
        run_script(7, &script)?;
    }

    #[test]
    fn prop_insert_then_erase_all_empties_tree(keys in arb_distinct_keys(80)) {
        let ctx = TestContext::new(4).unwrap();
        let mut tree: BLinkTree<u32, i32> = BLinkTree::open(ctx.config(), "drain").unwrap();

        for &k in &keys {
            prop_assert!(tree.insert(k, 1).unwrap());
        }
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        prop_assert_eq!(tree.keys_in_leaf_order().unwrap(), sorted);

        for &k in keys.iter().rev() {
            prop_assert!(tree.erase(&k, &1).unwrap());
        }
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.check().unwrap().nodes, 0);
    }

    #[test]
    fn prop_reopen_preserves_contents(script in arb_script(120)) {
        let ctx = TestContext::new(5).unwrap();
        let mut model = ModelMultimap::new();

        let mut tree: BLinkTree<u32, i32> = BLinkTree::open(ctx.config(), "reopen").unwrap();
        for op in &script {
            match *op {
                Op::Insert { key, value } => { tree.insert(key, value).unwrap(); }
                Op::Erase { key, value } => { tree.erase(&key, &value).unwrap(); }
                Op::Find { .. } => {}
            }
            model.apply(op);
        }
        tree.close().unwrap();

        let mut tree: BLinkTree<u32, i32> = BLinkTree::open(ctx.config(), "reopen").unwrap();
        tree.check().unwrap();
        for key in model.keys() {
            prop_assert_eq!(tree.find(&key).unwrap(), model.find(key));
        }
    }
}

#[test]
fn bookshelf_titles_round_trip() {
    let ctx = TestContext::new(4).unwrap();
    let mut tree: BLinkTree<Title, i32> = BLinkTree::open(ctx.config(), "books").unwrap();

    for (name, year) in bookshelf() {
        tree.insert(title(name).unwrap(), year).unwrap();
    }
    tree.check().unwrap();

    for name in ["CppPrimer", "Dune", "Emma", "Missing"] {
        assert_eq!(tree.find(&title(name).unwrap()).unwrap(), years_of(name));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_long_titles_keep_their_years(
        titles in prop::collection::vec(arb_title_text(), 1..40),
    ) {
        let ctx = TestContext::new(5).unwrap();
        let mut tree: BLinkTree<Title, i32> = BLinkTree::open(ctx.config(), "titles").unwrap();
        let mut expected: BTreeMap<&str, Vec<i32>> = BTreeMap::new();

        for (year, text) in (1900..).zip(&titles) {
            tree.insert(title(text).unwrap(), year).unwrap();
            expected.entry(text.as_str()).or_default().push(year);
        }
        tree.check().unwrap();

        for (text, years) in expected {
            prop_assert_eq!(tree.find(&title(text).unwrap()).unwrap(), years);
        }
    }
}
