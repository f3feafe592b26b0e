#![allow(missing_docs)]

use semgraph::storage::{Store, StoreOptions};
use semgraph::template::{SearchFlow, Template, TemplateItem, TemplateParams};
use semgraph::types::{ElementId, ElementType, Result, StoreError};
use tempfile::tempdir;

fn open(dir: &tempfile::TempDir) -> Result<Store> {
    Store::open(StoreOptions::new(dir.path().join("repo")))
}

#[test]
fn fully_variable_triple_finds_every_connector() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let n = 17;
    let mut arcs = Vec::new();
    for _ in 0..n {
        let a = store.create_node(ElementType::NODE_CONST)?;
        let b = store.create_node(ElementType::NODE_CONST)?;
        arcs.push(store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, a, b)?);
    }

    let mut t = Template::new();
    t.triple(
        ElementType::NODE_VAR,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        ElementType::NODE_VAR,
    )?;
    let result = t.search(&store)?;
    assert_eq!(result.len(), n, "one row per connector");
    let mut found: Vec<ElementId> = result.iter().filter_map(|row| row.at(1)).collect();
    found.sort();
    arcs.sort();
    assert_eq!(found, arcs);
    Ok(())
}

#[test]
fn shared_variable_joins_two_triples() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let root = store.create_node(ElementType::NODE_CONST)?;
    let leafs = store.create_node(ElementType::NODE_CONST)?;

    // root -> mid -> leafs for three mids; one dangling mid without the
    // second hop.
    let mut mids = Vec::new();
    for _ in 0..3 {
        let mid = store.create_node(ElementType::NODE_CONST)?;
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, root, mid)?;
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, mid, leafs)?;
        mids.push(mid);
    }
    let dangling = store.create_node(ElementType::NODE_CONST)?;
    store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, root, dangling)?;

    let mut t = Template::new();
    t.triple(
        root,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        TemplateItem::typed(ElementType::NODE_VAR).named("mid"),
    )?;
    t.triple(
        TemplateItem::replacement("mid"),
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        leafs,
    )?;

    let result = t.search(&store)?;
    assert_eq!(result.len(), 3, "dangling mid has no second hop");
    for row in result.iter() {
        let mid = row.get("mid").unwrap();
        assert!(mids.contains(&mid));
        assert_eq!(row.at(2), Some(mid), "first triple target is the join");
        assert_eq!(row.at(3), Some(mid), "second triple source is the join");
    }
    Ok(())
}

#[test]
fn equal_triples_bind_distinct_connectors() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;
    for _ in 0..2 {
        let tgt = store.create_node(ElementType::NODE_CONST)?;
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, tgt)?;
    }

    let mut t = Template::new();
    t.triple(
        src,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        ElementType::NODE_VAR,
    )?;
    t.triple(
        src,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        ElementType::NODE_VAR,
    )?;

    let result = t.search(&store)?;
    assert_eq!(result.len(), 2, "two ordered pairings of two connectors");
    for row in result.iter() {
        assert_ne!(
            row.at(1),
            row.at(4),
            "one connector never satisfies both equal triples in a row"
        );
    }
    Ok(())
}

#[test]
fn quintuple_finds_attributed_relation() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let a = store.create_node(ElementType::NODE_CONST)?;
    let b = store.create_node(ElementType::NODE_CONST)?;
    let rel = store.create_node(ElementType::NODE_CONST)?;
    let edge = store.create_connector(ElementType::ARC_COMMON_CONST, a, b)?;
    let attr = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, rel, edge)?;

    let mut t = Template::new();
    t.quintuple(
        a,
        TemplateItem::typed(ElementType::ARC_COMMON_VAR).named("edge"),
        ElementType::NODE_VAR,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        rel,
    )?;

    let result = t.search(&store)?;
    assert_eq!(result.len(), 1);
    let row = result.row(0).unwrap();
    assert_eq!(row.len(), 6, "a quintuple occupies two triples");
    assert_eq!(row.get("edge"), Some(edge));
    assert_eq!(row.at(4), Some(attr));
    Ok(())
}

#[test]
fn search_in_struct_filters_rows() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;
    let inside = store.create_node(ElementType::NODE_CONST)?;
    let outside = store.create_node(ElementType::NODE_CONST)?;
    let arc_in = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, inside)?;
    let _arc_out =
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, outside)?;

    // The bounding structure contains src, inside and the first arc.
    let bounds = store.create_node(ElementType::NODE_CONST)?;
    for member in [src, inside, arc_in] {
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, bounds, member)?;
    }

    let mut t = Template::new();
    t.triple(
        src,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        TemplateItem::typed(ElementType::NODE_VAR).named("x"),
    )?;
    let result = t.search_in_struct(&store, bounds)?;
    assert_eq!(result.len(), 1);
    assert_eq!(result.row(0).unwrap().get("x"), Some(inside));
    Ok(())
}

#[test]
fn callback_stop_halts_after_current_row() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let src = store.create_node(ElementType::NODE_CONST)?;
    for _ in 0..10 {
        let tgt = store.create_node(ElementType::NODE_CONST)?;
        store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, src, tgt)?;
    }

    let mut t = Template::new();
    t.triple(
        src,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        ElementType::NODE_VAR,
    )?;

    let mut seen = 0;
    let delivered = t.search_with_callback(&store, |_row| {
        seen += 1;
        if seen == 3 {
            SearchFlow::Stop
        } else {
            SearchFlow::Continue
        }
    })?;
    assert_eq!(delivered, 3, "stop keeps the current row and halts");

    let err = t.search_with_callback(&store, |_row| SearchFlow::Error);
    assert!(matches!(err, Err(StoreError::Internal(_))));
    Ok(())
}

#[test]
fn no_match_is_empty_not_an_error() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let lonely = store.create_node(ElementType::NODE_CONST)?;

    let mut t = Template::new();
    t.triple(
        lonely,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        ElementType::NODE_VAR,
    )?;
    let result = t.search(&store)?;
    assert!(result.is_empty());

    // Empty templates match nothing as well.
    let empty = Template::new();
    assert!(empty.search(&store)?.is_empty());
    let _ = TemplateParams::new();
    Ok(())
}
