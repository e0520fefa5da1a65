use super::*;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use tempfile::{TempDir, tempdir};
use types::FixedString;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Shelf {
    year: i32,
    title: FixedString<16>,
}

const SHELF_SLOT: usize = 4 + FixedString::<16>::MAX_SIZE;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Meta {
    generation: u64,
}

impl Storable for Meta {
    const MAX_SIZE: usize = 8;
}

type ShelfFile = BlockFile<Shelf, Meta>;

fn shelf(year: i32, title: &str) -> Shelf {
    Shelf {
        year,
        title: FixedString::new(title).unwrap(),
    }
}

fn temp_store(capacity: u64) -> (ShelfFile, TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shelf.blk");
    let (store, existed) = ShelfFile::open(&path, capacity, SHELF_SLOT).unwrap();
    assert!(!existed);
    (store, dir, path)
}

#[test]
fn allocate_and_read_round_trip() {
    let (mut store, _dir, _) = temp_store(8);

    let ptr = store.allocate_with(&shelf(1966, "Algernon")).unwrap();
    assert_eq!(store.read(ptr).unwrap(), shelf(1966, "Algernon"));
    assert_eq!(store.allocated(), 1);
}

#[test]
fn write_overwrites_slot() {
    let (mut store, _dir, _) = temp_store(8);

    let ptr = store.allocate_with(&shelf(2001, "CppPrimer")).unwrap();
    store.write(ptr, &shelf(2012, "CppPrimer")).unwrap();
    assert_eq!(store.read(ptr).unwrap().year, 2012);
}

#[test]
fn default_allocation_holds_default_record() {
    let (mut store, _dir, _) = temp_store(4);

    let ptr = store.allocate().unwrap();
    assert_eq!(store.read(ptr).unwrap(), Shelf::default());
}

#[test]
fn read_after_free_is_rejected() {
    let (mut store, _dir, _) = temp_store(4);

    let ptr = store.allocate_with(&shelf(2021, "Dune")).unwrap();
    store.free(ptr).unwrap();

    let err = store.read(ptr).unwrap_err();
    assert!(matches!(err, DbError::Unallocated { offset, .. } if offset == ptr.0));
    let err = store.write(ptr, &shelf(2021, "Dune")).unwrap_err();
    assert!(matches!(err, DbError::Unallocated { .. }));
}

#[test]
fn double_free_is_rejected() {
    let (mut store, _dir, _) = temp_store(4);

    let ptr = store.allocate().unwrap();
    store.free(ptr).unwrap();
    assert!(matches!(store.free(ptr), Err(DbError::Unallocated { .. })));
    assert_eq!(store.allocated(), 0);
}

#[test]
fn out_of_range_pointer_is_rejected() {
    let (mut store, _dir, _) = temp_store(4);

    let err = store.read(BlockPointer(4)).unwrap_err();
    assert!(matches!(
        err,
        DbError::OutOfRange {
            offset: 4,
            capacity: 4,
            ..
        }
    ));
    assert!(!store.is_allocated(BlockPointer(99)));
}

#[test]
fn full_store_reports_store_full() {
    let (mut store, _dir, _) = temp_store(3);

    for _ in 0..3 {
        store.allocate().unwrap();
    }
    assert!(matches!(store.allocate(), Err(DbError::StoreFull { .. })));
}

#[test]
fn freed_slots_are_reused_after_wrapping() {
    let (mut store, _dir, _) = temp_store(3);

    let a = store.allocate().unwrap();
    let _b = store.allocate().unwrap();
    let _c = store.allocate().unwrap();
    store.free(a).unwrap();

    let reused = store.allocate_with(&shelf(1, "again")).unwrap();
    assert_eq!(reused, a);
    assert_eq!(store.read(reused).unwrap(), shelf(1, "again"));
}

#[test]
fn oversized_record_does_not_leak_a_slot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.blk");
    // Too small for the title's length prefix.
    let (mut store, _) = ShelfFile::open(&path, 2, 6).unwrap();

    let err = store.allocate_with(&shelf(1, "x")).unwrap_err();
    assert!(matches!(err, DbError::Codec(_)));
    assert_eq!(store.allocated(), 0);
}

#[test]
fn info_and_bitmap_survive_reopen() {
    let (mut store, _dir, path) = temp_store(8);

    let kept = store.allocate_with(&shelf(1966, "Algernon")).unwrap();
    let dropped = store.allocate_with(&shelf(2021, "Dune")).unwrap();
    store.free(dropped).unwrap();
    store.write_info(&Meta { generation: 7 });
    store.close().unwrap();

    let (mut store, existed) = ShelfFile::open(&path, 8, SHELF_SLOT).unwrap();
    assert!(existed);
    assert_eq!(store.read_info(), Meta { generation: 7 });
    assert_eq!(store.allocated(), 1);
    assert!(store.is_allocated(kept));
    assert!(!store.is_allocated(dropped));
    assert_eq!(store.read(kept).unwrap(), shelf(1966, "Algernon"));
}

#[test]
fn drop_persists_metadata() {
    let (mut store, _dir, path) = temp_store(8);

    let ptr = store.allocate_with(&shelf(1, "a")).unwrap();
    store.write_info(&Meta { generation: 3 });
    drop(store);

    let (store, _) = ShelfFile::open(&path, 8, SHELF_SLOT).unwrap();
    assert!(store.is_allocated(ptr));
    assert_eq!(store.read_info().generation, 3);
}

#[test]
fn reopen_with_other_layout_fails() {
    let (store, _dir, path) = temp_store(8);
    store.close().unwrap();

    let err = ShelfFile::open(&path, 16, SHELF_SLOT).unwrap_err();
    assert!(matches!(err, DbError::Layout(_)));
    let err = ShelfFile::open(&path, 8, SHELF_SLOT + 1).unwrap_err();
    assert!(matches!(err, DbError::Layout(_)));
}

#[test]
fn foreign_file_is_not_a_block_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, vec![b'x'; 4096]).unwrap();

    let err = ShelfFile::open(&path, 8, SHELF_SLOT).unwrap_err();
    assert!(matches!(err, DbError::Layout(_)));
}

#[test]
fn zero_capacity_is_rejected() {
    let dir = tempdir().unwrap();
    let err = ShelfFile::open(&dir.path().join("z.blk"), 0, SHELF_SLOT).unwrap_err();
    assert!(matches!(err, DbError::Layout(_)));
}
