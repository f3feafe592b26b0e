#![allow(missing_docs)]

use semgraph::storage::{IterParam, Store, StoreOptions, Triple, TripleIter, TripleKind};
use semgraph::types::{ElementId, ElementType, Result, StoreError};
use tempfile::tempdir;

fn open(dir: &tempfile::TempDir) -> Result<Store> {
    Store::open(StoreOptions::new(dir.path().join("repo")))
}

#[test]
fn two_connector_families_never_mix() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;

    let mut access = Vec::new();
    for _ in 0..640 {
        let tgt = store.create_node(ElementType::NODE_CONST)?;
        access.push(store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, tgt)?);
    }
    for _ in 0..512 {
        let tgt = store.create_node(ElementType::NODE_CONST)?;
        store.create_connector(ElementType::ARC_COMMON_CONST, src, tgt)?;
    }

    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::EDGE_ACCESS, ElementType::NODE).collect();
    assert_eq!(rows.len(), 640, "exactly the access family");
    for (row, expected) in rows.iter().zip(&access) {
        assert_eq!(row[1], *expected, "insertion order per family");
    }

    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::ARC_COMMON, ElementType::NODE).collect();
    assert_eq!(rows.len(), 512, "exactly the common family");

    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::UNKNOWN, ElementType::NODE).collect();
    assert_eq!(rows.len(), 1152, "catch-all mask sees both families");
    Ok(())
}

#[test]
fn const_mask_sees_one_connector_of_each_family() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;
    let t1 = store.create_node(ElementType::NODE_CONST)?;
    let t2 = store.create_node(ElementType::NODE_CONST)?;
    let access = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, t1)?;
    let common = store.create_connector(ElementType::ARC_COMMON_CONST, src, t2)?;

    // Both families sit in their own partially filled slot of the shared
    // constancy chain; the walk must reach the second one.
    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::CONST, ElementType::NODE).collect();
    assert_eq!(rows, vec![[src, access, t1], [src, common, t2]]);
    Ok(())
}

#[test]
fn fixed_target_finds_the_single_source() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let class = store.create_node(ElementType::NODE_CONST)?;
    let member = store.create_node(ElementType::NODE_CONST)?;
    let arc = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, class, member)?;
    // Noise towards other targets.
    for _ in 0..10 {
        let other = store.create_node(ElementType::NODE_CONST)?;
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, class, other)?;
    }

    let rows: Vec<Triple> = TripleIter::a_a_f(
        &store,
        ElementType::NODE_CONST,
        ElementType::EDGE_ACCESS_CONST_POS_PERM,
        member,
    )
    .collect();
    assert_eq!(rows, vec![[class, arc, member]]);
    Ok(())
}

#[test]
fn fixed_connector_variants_resolve_in_place() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let a = store.create_node(ElementType::NODE_CONST)?;
    let b = store.create_link(ElementType::LINK_CONST)?;
    let e = store.create_connector(ElementType::ARC_COMMON_CONST, a, b)?;

    let mut it = TripleIter::a_f_a(&store, ElementType::NODE, e, ElementType::LINK);
    assert_eq!(it.next(), Some([a, e, b]));
    assert_eq!(it.value(0), Some(a));
    assert_eq!(it.value(2), Some(b));
    assert_eq!(it.next(), None, "fixed-connector shape yields once");

    // Mismatching endpoint masks yield nothing.
    let mut it = TripleIter::a_f_a(&store, ElementType::LINK, e, ElementType::LINK);
    assert_eq!(it.next(), None);

    let mut it = TripleIter::f_f_a(&store, a, e, ElementType::LINK);
    assert_eq!(it.next(), Some([a, e, b]));
    let mut it = TripleIter::a_f_f(&store, ElementType::NODE, e, b);
    assert_eq!(it.next(), Some([a, e, b]));
    let mut it = TripleIter::f_f_f(&store, a, e, b);
    assert_eq!(it.next(), Some([a, e, b]));
    let mut it = TripleIter::f_f_f(&store, b, e, a);
    assert_eq!(it.next(), None, "swapped endpoints never match");
    Ok(())
}

#[test]
fn shape_mismatch_is_invalid_params() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let n = store.create_node(ElementType::NODE_CONST)?;

    let err = TripleIter::new(
        &store,
        TripleKind::Aaf,
        IterParam::Fixed(n),
        IterParam::Typed(ElementType::EDGE_ACCESS),
        IterParam::Typed(ElementType::NODE),
    );
    assert!(matches!(err, Err(StoreError::InvalidParams(_))));

    let ok = TripleIter::new(
        &store,
        TripleKind::Faa,
        IterParam::Fixed(n),
        IterParam::Typed(ElementType::EDGE_ACCESS),
        IterParam::Typed(ElementType::NODE),
    )?;
    assert_eq!(ok.count(), 0);
    Ok(())
}

#[test]
fn tombstones_are_filtered_not_reported() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;
    let keep = store.create_node(ElementType::NODE_CONST)?;
    let drop_tgt = store.create_node(ElementType::NODE_CONST)?;
    let keep_arc = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, keep)?;
    let drop_arc =
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, drop_tgt)?;

    store.free_element(drop_arc)?;
    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::EDGE_ACCESS, ElementType::NODE).collect();
    assert_eq!(rows, vec![[src, keep_arc, keep]]);

    store.free_element(drop_tgt)?;
    store.free_element(src)?;
    // A tombstoned anchor builds an empty iterator instead of failing.
    let rows: Vec<Triple> =
        TripleIter::f_a_a(&store, src, ElementType::UNKNOWN, ElementType::UNKNOWN).collect();
    assert!(rows.is_empty());
    let rows: Vec<Triple> = TripleIter::f_a_a(
        &store,
        ElementId(99_999),
        ElementType::UNKNOWN,
        ElementType::UNKNOWN,
    )
    .collect();
    assert!(rows.is_empty(), "unknown anchor is empty, not an error");
    Ok(())
}
